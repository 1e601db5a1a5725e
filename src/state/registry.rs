//! Peer Registry
//!
//! Static rank → address book for the sites taking part in elections.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Rank of a site. Higher ranks win elections.
pub type SiteId = u32;

/// A participating site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    /// Unique rank
    pub id: SiteId,
    /// Network endpoint (host:port)
    pub address: String,
}

impl Site {
    /// Create a new site entry
    pub fn new(id: SiteId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }
}

/// Immutable set of known sites, ordered by rank
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    sites: BTreeMap<SiteId, Site>,
    highest: SiteId,
}

impl PeerRegistry {
    /// Build a registry, rejecting duplicate ranks and empty tables
    pub fn new(sites: impl IntoIterator<Item = Site>) -> Result<Self> {
        let mut table = BTreeMap::new();
        for site in sites {
            let id = site.id;
            if table.insert(id, site).is_some() {
                return Err(Error::Config(format!("site {} is listed more than once", id)));
            }
        }

        let highest = match table.keys().next_back() {
            Some(id) => *id,
            None => return Err(Error::Config("at least one site must be configured".into())),
        };

        Ok(Self {
            sites: table,
            highest,
        })
    }

    /// Look up a site by rank
    pub fn get(&self, id: SiteId) -> Option<&Site> {
        self.sites.get(&id)
    }

    /// Address of a site, or `UnknownSite`
    pub fn address(&self, id: SiteId) -> Result<&str> {
        self.sites
            .get(&id)
            .map(|site| site.address.as_str())
            .ok_or(Error::UnknownSite(id))
    }

    /// Whether the rank is configured
    pub fn contains(&self, id: SiteId) -> bool {
        self.sites.contains_key(&id)
    }

    /// Sites ranked strictly above `id`, lowest first
    pub fn higher_than(&self, id: SiteId) -> impl Iterator<Item = &Site> {
        self.sites
            .range((std::ops::Bound::Excluded(id), std::ops::Bound::Unbounded))
            .map(|(_, site)| site)
    }

    /// Every site except `id`
    pub fn others(&self, id: SiteId) -> impl Iterator<Item = &Site> {
        self.sites.values().filter(move |site| site.id != id)
    }

    /// Highest configured rank
    pub fn highest(&self) -> SiteId {
        self.highest
    }

    /// All ranks in ascending order
    pub fn ids(&self) -> Vec<SiteId> {
        self.sites.keys().copied().collect()
    }

    /// Iterate all sites in rank order
    pub fn iter(&self) -> impl Iterator<Item = &Site> {
        self.sites.values()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}
