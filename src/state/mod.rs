//! State Management Module
//!
//! Holds the static site registry, the election state machine and the
//! client that watches the coordinator.

mod registry;
mod coordinator;
pub mod election;

#[cfg(test)]
pub(crate) mod testing;

pub use registry::{PeerRegistry, Site, SiteId};
pub use coordinator::{CoordinatorClient, HeartbeatOutcome};
pub use election::{
    ElectionConfig, ElectionEngine, ElectionOutcome, ElectionPhase, ElectionSnapshot,
};
