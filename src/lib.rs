//! WolfElect - Coordinator Election for WolfScale Sites
//!
//! Elects a single coordinator among a fixed set of ranked sites using
//! the Bully algorithm, with no external arbiter.
//!
//! # Architecture
//!
//! Every site runs an [`ElectionEngine`](state::ElectionEngine) that serves
//! inbound protocol calls over TCP and drives its own outbound fan-out.
//! A [`CoordinatorClient`](state::CoordinatorClient) pings the known
//! coordinator and starts an election when it stops answering.
//!
//! # Features
//!
//! - Highest reachable rank always wins
//! - Epoch-tagged rounds: overlapping triggers start one round, stale
//!   results are dropped
//! - Bounded per-call timeouts with parallel wait-all fan-out
//! - Length-prefixed, CRC32-checked binary frames
//! - TOML configuration with a static site address book

pub mod config;
pub mod error;
pub mod network;
pub mod state;

pub use config::WolfElectConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfElectConfig;
    pub use crate::error::{Error, Result};
    pub use crate::network::{Message, NetworkClient, NetworkServer, Transport};
    pub use crate::state::{
        CoordinatorClient, ElectionEngine, ElectionOutcome, ElectionPhase, PeerRegistry, SiteId,
    };
}
