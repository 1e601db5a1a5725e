//! Coordinator Election
//!
//! Implements Bully-style election over a fixed set of ranked sites.
//! A site that suspects the coordinator is gone asks every higher-ranked
//! site whether it is alive. If any answers, the site steps back and lets
//! the superior carry on; if none does, the site promotes itself and
//! announces the result to everyone.
//!
//! All election state lives in one record behind a single lock. Each round
//! is tagged with an epoch, and a round whose epoch is no longer current
//! when its calls complete is discarded.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::registry::{PeerRegistry, Site, SiteId};
use crate::error::{Error, Result};
use crate::network::{call_with_timeout, ErrorCode, Message, Transport};

/// Election phase of a site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionPhase {
    /// Following the known coordinator
    Idle,
    /// Waiting on higher-ranked sites
    ElectionInProgress,
    /// This site is the coordinator
    Coordinator,
}

impl std::fmt::Display for ElectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElectionPhase::Idle => write!(f, "IDLE"),
            ElectionPhase::ElectionInProgress => write!(f, "ELECTION_IN_PROGRESS"),
            ElectionPhase::Coordinator => write!(f, "COORDINATOR"),
        }
    }
}

/// Election configuration
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Upper bound on every outbound call of a fan-out
    pub call_timeout: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(3000),
        }
    }
}

/// Point-in-time copy of a site's election state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSnapshot {
    pub site_id: SiteId,
    pub coordinator_id: SiteId,
    pub phase: ElectionPhase,
    pub epoch: u64,
}

/// Result of one call to `start_election`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// Another round was already running; nothing was started
    AlreadyInProgress,
    /// At least one higher site answered, so this site stepped back
    Deferred { epoch: u64, superiors: Vec<SiteId> },
    /// No higher site answered; this site is now coordinator
    Promoted { epoch: u64, acknowledged: Vec<SiteId> },
    /// The round was overtaken (newer epoch or an announcement) and ignored
    Stale { epoch: u64 },
}

/// How a higher site answered an election call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallOutcome {
    RespondedOk,
    /// A correct peer never refuses; counted as alive
    RespondedNotOk,
    /// Unreachable, timed out, or replied with garbage
    NoResponse,
}

impl CallOutcome {
    fn responded(self) -> bool {
        !matches!(self, CallOutcome::NoResponse)
    }
}

/// Mutable election record
#[derive(Debug)]
struct ElectionState {
    coordinator_id: SiteId,
    phase: ElectionPhase,
    epoch: u64,
}

/// Election engine for one site
pub struct ElectionEngine {
    /// This site's rank
    site_id: SiteId,
    /// Known sites
    registry: Arc<PeerRegistry>,
    /// Outbound calls
    transport: Arc<dyn Transport>,
    config: ElectionConfig,
    state: Mutex<ElectionState>,
}

impl ElectionEngine {
    /// Create an engine in `Idle` following `default_coordinator`
    pub fn new(
        site_id: SiteId,
        default_coordinator: SiteId,
        registry: Arc<PeerRegistry>,
        transport: Arc<dyn Transport>,
        config: ElectionConfig,
    ) -> Result<Self> {
        if !registry.contains(site_id) {
            return Err(Error::UnknownSite(site_id));
        }
        if !registry.contains(default_coordinator) {
            return Err(Error::UnknownSite(default_coordinator));
        }

        Ok(Self {
            site_id,
            registry,
            transport,
            config,
            state: Mutex::new(ElectionState {
                coordinator_id: default_coordinator,
                phase: ElectionPhase::Idle,
                epoch: 0,
            }),
        })
    }

    pub fn site_id(&self) -> SiteId {
        self.site_id
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Per-call timeout used for every outbound call
    pub fn call_timeout(&self) -> Duration {
        self.config.call_timeout
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> ElectionSnapshot {
        let state = self.state.lock().await;
        ElectionSnapshot {
            site_id: self.site_id,
            coordinator_id: state.coordinator_id,
            phase: state.phase,
            epoch: state.epoch,
        }
    }

    pub async fn coordinator_id(&self) -> SiteId {
        self.state.lock().await.coordinator_id
    }

    pub async fn phase(&self) -> ElectionPhase {
        self.state.lock().await.phase
    }

    pub async fn epoch(&self) -> u64 {
        self.state.lock().await.epoch
    }

    /// Run an election round, unless one is already in flight
    pub async fn start_election(&self) -> ElectionOutcome {
        match self.begin_round().await {
            Some(epoch) => self.run_round(epoch).await,
            None => {
                tracing::debug!("Site {}: election already in progress", self.site_id);
                ElectionOutcome::AlreadyInProgress
            }
        }
    }

    /// Claim a new epoch if no round is running
    async fn begin_round(&self) -> Option<u64> {
        let mut state = self.state.lock().await;
        if state.phase == ElectionPhase::ElectionInProgress {
            return None;
        }
        state.epoch += 1;
        state.phase = ElectionPhase::ElectionInProgress;
        Some(state.epoch)
    }

    async fn run_round(&self, epoch: u64) -> ElectionOutcome {
        let superiors: Vec<&Site> = self.registry.higher_than(self.site_id).collect();
        tracing::info!(
            "Site {} starting election epoch {} ({} higher sites)",
            self.site_id,
            epoch,
            superiors.len()
        );

        let calls = superiors.into_iter().map(|site| async move {
            (site.id, self.ask_superior(site).await)
        });
        let responders: Vec<SiteId> = join_all(calls)
            .await
            .into_iter()
            .filter(|(_, outcome)| outcome.responded())
            .map(|(id, _)| id)
            .collect();

        {
            let mut state = self.state.lock().await;
            if state.epoch != epoch || state.phase != ElectionPhase::ElectionInProgress {
                tracing::debug!(
                    "Site {}: discarding results of stale election epoch {} (current {}, {})",
                    self.site_id,
                    epoch,
                    state.epoch,
                    state.phase
                );
                return ElectionOutcome::Stale { epoch };
            }

            if !responders.is_empty() {
                state.phase = ElectionPhase::Idle;
                tracing::info!(
                    "Site {} deferring to higher sites {:?} (epoch {})",
                    self.site_id,
                    responders,
                    epoch
                );
                return ElectionOutcome::Deferred {
                    epoch,
                    superiors: responders,
                };
            }

            state.phase = ElectionPhase::Coordinator;
            state.coordinator_id = self.site_id;
        }

        tracing::info!(
            "No higher site answered, site {} is now COORDINATOR (epoch {})",
            self.site_id,
            epoch
        );

        match self.announce(epoch).await {
            Some(acknowledged) => ElectionOutcome::Promoted {
                epoch,
                acknowledged,
            },
            None => ElectionOutcome::Stale { epoch },
        }
    }

    async fn ask_superior(&self, site: &Site) -> CallOutcome {
        tracing::debug!("Site {} sending election to {}", self.site_id, site.id);
        let request = Message::Election {
            invoker_id: self.site_id,
        };

        match call_with_timeout(self.transport(), &site.address, request, self.config.call_timeout).await {
            Ok(Message::ElectionResponse { ok: true }) => {
                tracing::debug!("Site {} received OK from {}", self.site_id, site.id);
                CallOutcome::RespondedOk
            }
            Ok(Message::ElectionResponse { ok: false }) => {
                tracing::warn!(
                    "Site {} refused election from {}, counting it as alive",
                    site.id,
                    self.site_id
                );
                CallOutcome::RespondedNotOk
            }
            Ok(other) => {
                tracing::warn!(
                    "Unexpected {} from site {} during election",
                    other.type_name(),
                    site.id
                );
                CallOutcome::NoResponse
            }
            Err(e) => {
                tracing::info!("Site {} is not available: {}", site.id, e);
                CallOutcome::NoResponse
            }
        }
    }

    /// Tell every other site that this one is coordinator.
    ///
    /// Returns `None` without sending anything if the promotion of `epoch`
    /// was overtaken before the broadcast started.
    async fn announce(&self, epoch: u64) -> Option<Vec<SiteId>> {
        {
            let state = self.state.lock().await;
            if state.epoch != epoch || state.phase != ElectionPhase::Coordinator {
                tracing::info!(
                    "Site {}: promotion of epoch {} overtaken (now {} following {}), not announcing",
                    self.site_id,
                    epoch,
                    state.phase,
                    state.coordinator_id
                );
                return None;
            }
        }

        let calls = self.registry.others(self.site_id).map(|site| async move {
            let request = Message::NewCoordinator {
                new_id: self.site_id,
            };
            match call_with_timeout(self.transport(), &site.address, request, self.config.call_timeout).await {
                Ok(Message::NewCoordinatorAck { ack: true }) => Some(site.id),
                Ok(Message::NewCoordinatorAck { ack: false }) => {
                    tracing::warn!("Site {} rejected coordinator announcement", site.id);
                    None
                }
                Ok(other) => {
                    tracing::warn!(
                        "Unexpected {} from site {} to coordinator announcement",
                        other.type_name(),
                        site.id
                    );
                    None
                }
                Err(e) => {
                    tracing::info!("Site {} communication error: {}", site.id, e);
                    None
                }
            }
        });

        Some(join_all(calls).await.into_iter().flatten().collect())
    }

    /// Answer an election call from `invoker_id`.
    ///
    /// A lower-ranked caller gets `true` and this site probes upward itself.
    pub async fn handle_election(self: &Arc<Self>, invoker_id: SiteId) -> bool {
        tracing::info!("Site {} receiving election from {}", self.site_id, invoker_id);

        if invoker_id >= self.site_id {
            tracing::warn!(
                "Protocol violation: site {} sent an election to lower-or-equal site {}",
                invoker_id,
                self.site_id
            );
            return false;
        }

        if let Some(epoch) = self.begin_round().await {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                engine.run_round(epoch).await;
            });
        }

        true
    }

    /// Apply a coordinator announcement
    pub async fn handle_new_coordinator(&self, new_id: SiteId) -> bool {
        if !self.registry.contains(new_id) {
            tracing::warn!("Ignoring announcement of unknown coordinator {}", new_id);
            return false;
        }

        let mut state = self.state.lock().await;
        state.coordinator_id = new_id;
        state.phase = if new_id == self.site_id {
            ElectionPhase::Coordinator
        } else {
            ElectionPhase::Idle
        };

        tracing::info!("Site {}: {} is now the coordinator", self.site_id, new_id);
        true
    }

    /// Answer a liveness probe
    pub async fn handle_ping(&self, requester_id: SiteId) -> bool {
        tracing::debug!("Site {} receiving ping from {}", self.site_id, requester_id);
        true
    }

    /// Route an inbound request to its handler
    pub async fn dispatch(self: &Arc<Self>, message: Message) -> Message {
        match message {
            Message::Election { invoker_id } => Message::ElectionResponse {
                ok: self.handle_election(invoker_id).await,
            },
            Message::NewCoordinator { new_id } => Message::NewCoordinatorAck {
                ack: self.handle_new_coordinator(new_id).await,
            },
            Message::Ping { requester_id } => Message::PingResponse {
                ok: self.handle_ping(requester_id).await,
            },
            Message::StatusRequest => {
                let snapshot = self.snapshot().await;
                Message::StatusResponse {
                    site_id: snapshot.site_id,
                    coordinator_id: snapshot.coordinator_id,
                    phase: snapshot.phase,
                    epoch: snapshot.epoch,
                }
            }
            other => {
                tracing::warn!("Site {} got unexpected {}", self.site_id, other.type_name());
                Message::Error {
                    code: ErrorCode::UnexpectedMessage,
                    message: format!("{} is not a request", other.type_name()),
                }
            }
        }
    }
}
