//! Coordinator Client
//!
//! Checks that the known coordinator is still alive and starts an
//! election when it is not.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;

use super::election::{ElectionEngine, ElectionOutcome, ElectionPhase};
use super::registry::SiteId;
use crate::network::{call_with_timeout, Message};

/// Result of one heartbeat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// This site is the coordinator; nothing to probe
    SelfIsCoordinator,
    /// The coordinator answered
    Alive { coordinator_id: SiteId },
    /// The coordinator did not answer and an election was triggered
    Failed {
        coordinator_id: SiteId,
        election: ElectionOutcome,
    },
}

/// Heartbeats the current coordinator on behalf of one site
#[derive(Clone)]
pub struct CoordinatorClient {
    engine: Arc<ElectionEngine>,
}

impl CoordinatorClient {
    /// Create a client driving `engine`
    pub fn new(engine: Arc<ElectionEngine>) -> Self {
        Self { engine }
    }

    /// Ping the coordinator once, electing a new one if it is gone
    pub async fn heartbeat(&self) -> HeartbeatOutcome {
        let site_id = self.engine.site_id();
        let snapshot = self.engine.snapshot().await;
        let coordinator_id = snapshot.coordinator_id;

        if snapshot.phase == ElectionPhase::Coordinator {
            tracing::debug!("Site {} is the coordinator", site_id);
            return HeartbeatOutcome::SelfIsCoordinator;
        }

        if coordinator_id == site_id {
            // Named but never confirmed, or stepped back after a deferred round
            tracing::warn!(
                "Site {} follows itself without being coordinator, invoking election",
                site_id
            );
        } else {
            tracing::info!("Site {} communicating with coordinator {}", site_id, coordinator_id);

            if self.coordinator_alive(coordinator_id).await {
                tracing::info!("Coordinator {} is alive", coordinator_id);
                return HeartbeatOutcome::Alive { coordinator_id };
            }

            tracing::warn!(
                "Communicating with coordinator {} failed, invoking election",
                coordinator_id
            );
        }
        let election = self.engine.start_election().await;

        HeartbeatOutcome::Failed {
            coordinator_id,
            election,
        }
    }

    async fn coordinator_alive(&self, coordinator_id: SiteId) -> bool {
        let address = match self.engine.registry().address(coordinator_id) {
            Ok(address) => address.to_string(),
            Err(e) => {
                tracing::error!("Cannot resolve coordinator: {}", e);
                return false;
            }
        };

        let request = Message::Ping {
            requester_id: self.engine.site_id(),
        };
        match call_with_timeout(self.engine.transport(), &address, request, self.engine.call_timeout()).await {
            Ok(Message::PingResponse { ok }) => ok,
            Ok(other) => {
                tracing::warn!(
                    "Unexpected {} from coordinator {}",
                    other.type_name(),
                    coordinator_id
                );
                false
            }
            Err(e) => {
                tracing::debug!("Ping to coordinator {} failed: {}", coordinator_id, e);
                false
            }
        }
    }

    /// Heartbeat every `interval` (plus up to `jitter` of random delay)
    /// until `shutdown` turns true or its sender is dropped
    pub async fn run(self, interval: Duration, jitter: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Heartbeat loop started for site {} (every {:?})",
            self.engine.site_id(),
            interval
        );

        loop {
            let delay = interval + random_jitter(jitter);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    self.heartbeat().await;
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Heartbeat loop stopped");
    }
}

fn random_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(0..=max.as_millis() as u64))
}
