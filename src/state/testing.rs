//! In-process network used by the election tests

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::election::{ElectionConfig, ElectionEngine, ElectionPhase};
use super::registry::{PeerRegistry, Site, SiteId};
use crate::error::{Error, Result};
use crate::network::{Message, Transport};

pub(crate) fn address_of(id: SiteId) -> String {
    format!("site-{}", id)
}

/// Routes calls straight into the target engine's `dispatch`
pub(crate) struct LocalNetwork {
    engines: RwLock<HashMap<String, Arc<ElectionEngine>>>,
    down: RwLock<HashSet<String>>,
    hanging: RwLock<HashSet<String>>,
    refusing: RwLock<HashSet<String>>,
    held: RwLock<HashSet<String>>,
    release: watch::Sender<bool>,
    calls: Mutex<Vec<(String, Message)>>,
}

impl LocalNetwork {
    pub(crate) fn new() -> Self {
        let (release, _) = watch::channel(false);
        Self {
            engines: RwLock::new(HashMap::new()),
            down: RwLock::new(HashSet::new()),
            hanging: RwLock::new(HashSet::new()),
            refusing: RwLock::new(HashSet::new()),
            held: RwLock::new(HashSet::new()),
            release,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, engine: Arc<ElectionEngine>) {
        self.engines
            .write()
            .unwrap()
            .insert(address_of(engine.site_id()), engine);
    }

    /// Calls to the site fail as if nothing listens there
    pub(crate) fn set_down(&self, id: SiteId) {
        self.down.write().unwrap().insert(address_of(id));
    }

    /// Calls to the site never complete
    pub(crate) fn set_hanging(&self, id: SiteId) {
        self.hanging.write().unwrap().insert(address_of(id));
    }

    /// Election calls to the site are answered with `ok=false`
    pub(crate) fn refuse_elections(&self, id: SiteId) {
        self.refusing.write().unwrap().insert(address_of(id));
    }

    /// Calls to the site wait until `release`
    pub(crate) fn hold(&self, id: SiteId) {
        self.held.write().unwrap().insert(address_of(id));
    }

    pub(crate) fn release(&self) {
        let _ = self.release.send(true);
    }

    pub(crate) fn election_calls_to(&self, id: SiteId) -> usize {
        let address = address_of(id);
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, msg)| *to == address && matches!(msg, Message::Election { .. }))
            .count()
    }

    pub(crate) fn election_calls_from(&self, id: SiteId) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, msg)| matches!(msg, Message::Election { invoker_id } if *invoker_id == id))
            .count()
    }

    pub(crate) fn ping_calls_to(&self, id: SiteId) -> usize {
        let address = address_of(id);
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, msg)| *to == address && matches!(msg, Message::Ping { .. }))
            .count()
    }

    pub(crate) fn announcements_from(&self, id: SiteId) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, msg)| matches!(msg, Message::NewCoordinator { new_id } if *new_id == id))
            .count()
    }

    pub(crate) async fn wait_for_election_calls(&self, id: SiteId, count: usize) {
        for _ in 0..200 {
            if self.election_calls_to(id) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("site {} never saw {} election calls", id, count);
    }
}

#[async_trait]
impl Transport for LocalNetwork {
    async fn call(&self, address: &str, request: Message) -> Result<Message> {
        self.calls
            .lock()
            .unwrap()
            .push((address.to_string(), request.clone()));

        let held = self.held.read().unwrap().contains(address);
        if held {
            let mut rx = self.release.subscribe();
            let _ = rx.wait_for(|released| *released).await;
        }

        let hanging = self.hanging.read().unwrap().contains(address);
        if hanging {
            futures::future::pending::<()>().await;
        }

        let down = self.down.read().unwrap().contains(address);
        if down {
            return Err(Error::ConnectionFailed {
                address: address.to_string(),
                reason: "connection refused".into(),
            });
        }

        let refusing = self.refusing.read().unwrap().contains(address);
        if refusing && matches!(request, Message::Election { .. }) {
            return Ok(Message::ElectionResponse { ok: false });
        }

        let engine = self.engines.read().unwrap().get(address).cloned();
        match engine {
            Some(engine) => Ok(engine.dispatch(request).await),
            None => Err(Error::Network(format!("no site at {}", address))),
        }
    }
}

/// Build one engine per rank, all wired to the same local network
pub(crate) fn cluster(
    ids: &[SiteId],
    coordinator: SiteId,
) -> (Arc<LocalNetwork>, Vec<Arc<ElectionEngine>>) {
    let net = Arc::new(LocalNetwork::new());
    let registry = Arc::new(
        PeerRegistry::new(ids.iter().map(|id| Site::new(*id, address_of(*id)))).unwrap(),
    );
    let config = ElectionConfig {
        call_timeout: Duration::from_millis(200),
    };

    let engines: Vec<Arc<ElectionEngine>> = ids
        .iter()
        .map(|id| {
            let engine = Arc::new(
                ElectionEngine::new(
                    *id,
                    coordinator,
                    Arc::clone(&registry),
                    net.clone(),
                    config.clone(),
                )
                .unwrap(),
            );
            net.register(Arc::clone(&engine));
            engine
        })
        .collect();

    (net, engines)
}

/// Wait until every engine names `expected` and none is mid-election
pub(crate) async fn wait_for_agreement(engines: &[Arc<ElectionEngine>], expected: SiteId) {
    for _ in 0..400 {
        let mut settled = true;
        for engine in engines {
            let snapshot = engine.snapshot().await;
            if snapshot.coordinator_id != expected
                || snapshot.phase == ElectionPhase::ElectionInProgress
            {
                settled = false;
            }
        }
        if settled {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut states = Vec::new();
    for engine in engines {
        states.push(engine.snapshot().await);
    }
    panic!("no agreement on {}: {:?}", expected, states);
}
