//! WolfElect Configuration
//!
//! This module provides configuration structures for a WolfElect site:
//! which rank it runs as, the static address book of all sites, and the
//! election timing knobs.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::state::{ElectionConfig, PeerRegistry, Site, SiteId};

/// Main WolfElect configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfElectConfig {
    /// Node-specific configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Address book of every site, including this one
    #[serde(default)]
    pub sites: Vec<SiteConfig>,

    /// Election timing
    #[serde(default)]
    pub election: ElectionSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This site's rank (prompted for at startup when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SiteId>,

    /// Coordinator assumed at startup (defaults to the highest rank)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_coordinator: Option<SiteId>,

    /// Address to bind (defaults to this site's entry in `sites`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
}

/// One entry of the address book
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Unique rank
    pub id: SiteId,

    /// Address other sites dial (host:port)
    pub address: String,
}

/// Election timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSettings {
    /// Bound on each election, announcement and ping call in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Automatic heartbeat interval in milliseconds (0 = only on demand)
    #[serde(default)]
    pub heartbeat_interval_ms: u64,

    /// Random delay added to each automatic heartbeat in milliseconds
    #[serde(default = "default_heartbeat_jitter_ms")]
    pub heartbeat_jitter_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_call_timeout_ms() -> u64 {
    3000
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_heartbeat_jitter_ms() -> u64 {
    250
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ElectionSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_interval_ms: 0,
            heartbeat_jitter_ms: default_heartbeat_jitter_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for WolfElectConfig {
    /// Five sites on localhost ports 3000-3004, site 5 as coordinator
    fn default() -> Self {
        Self {
            node: NodeConfig {
                id: None,
                default_coordinator: Some(5),
                bind_address: None,
            },
            sites: (1..=5)
                .map(|id| SiteConfig {
                    id,
                    address: format!("127.0.0.1:{}", 2999 + id),
                })
                .collect(),
            election: ElectionSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl WolfElectConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfElectConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.sites.is_empty() {
            return Err(crate::Error::Config("at least one [[sites]] entry is required".into()));
        }

        let mut seen = HashSet::new();
        for site in &self.sites {
            if !seen.insert(site.id) {
                return Err(crate::Error::Config(format!("site {} is listed more than once", site.id)));
            }
            if site.address.is_empty() {
                return Err(crate::Error::Config(format!("site {} has an empty address", site.id)));
            }
        }

        if let Some(id) = self.node.id {
            if !seen.contains(&id) {
                return Err(crate::Error::Config(format!("node.id {} is not a configured site", id)));
            }
        }

        if let Some(id) = self.node.default_coordinator {
            if !seen.contains(&id) {
                return Err(crate::Error::Config(format!(
                    "node.default_coordinator {} is not a configured site",
                    id
                )));
            }
        }

        if self.election.call_timeout_ms == 0 {
            return Err(crate::Error::Config("election.call_timeout_ms must be positive".into()));
        }

        if self.election.connect_timeout_ms == 0 {
            return Err(crate::Error::Config("election.connect_timeout_ms must be positive".into()));
        }

        Ok(())
    }

    /// Build the site registry
    pub fn registry(&self) -> crate::Result<PeerRegistry> {
        PeerRegistry::new(
            self.sites
                .iter()
                .map(|site| Site::new(site.id, site.address.clone())),
        )
    }

    /// Coordinator assumed at startup
    pub fn default_coordinator(&self) -> Option<SiteId> {
        self.node
            .default_coordinator
            .or_else(|| self.sites.iter().map(|site| site.id).max())
    }

    /// Address to listen on when running as `site_id`
    pub fn bind_address(&self, site_id: SiteId) -> crate::Result<String> {
        if let Some(address) = &self.node.bind_address {
            return Ok(address.clone());
        }

        self.sites
            .iter()
            .find(|site| site.id == site_id)
            .map(|site| site.address.clone())
            .ok_or(crate::Error::UnknownSite(site_id))
    }

    /// Engine settings
    pub fn election_config(&self) -> ElectionConfig {
        ElectionConfig {
            call_timeout: self.call_timeout(),
        }
    }

    /// Get call timeout as Duration
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.election.call_timeout_ms)
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.election.connect_timeout_ms)
    }

    /// Automatic heartbeat interval, if enabled
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        match self.election.heartbeat_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn heartbeat_jitter(&self) -> Duration {
        Duration::from_millis(self.election.heartbeat_jitter_ms)
    }
}
