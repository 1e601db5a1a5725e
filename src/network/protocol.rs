//! Election Protocol
//!
//! Defines the wire protocol for communication between sites.

use serde::{Deserialize, Serialize};

use crate::state::{ElectionPhase, SiteId};

/// Largest frame body a site will accept
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// Protocol messages for site communication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    // ========== Election ==========
    /// Election request from a lower-ranked site
    Election {
        invoker_id: SiteId,
    },

    /// Election reply; `ok` means a superior site is alive
    ElectionResponse {
        ok: bool,
    },

    /// Announcement of a new coordinator
    NewCoordinator {
        new_id: SiteId,
    },

    /// Announcement acknowledgement
    NewCoordinatorAck {
        ack: bool,
    },

    // ========== Liveness ==========
    /// Liveness probe sent to the coordinator
    Ping {
        requester_id: SiteId,
    },

    /// Liveness reply
    PingResponse {
        ok: bool,
    },

    // ========== Status ==========
    /// Status request
    StatusRequest,

    /// Status response
    StatusResponse {
        site_id: SiteId,
        coordinator_id: SiteId,
        phase: ElectionPhase,
        epoch: u64,
    },

    // ========== Error ==========
    /// Error response
    Error {
        code: ErrorCode,
        message: String,
    },
}

/// Error codes for protocol errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Message is not a request this site serves
    UnexpectedMessage,
    /// Internal error
    Internal,
}

impl Message {
    /// Serialize message to bytes
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Election { .. } => "Election",
            Message::ElectionResponse { .. } => "ElectionResponse",
            Message::NewCoordinator { .. } => "NewCoordinator",
            Message::NewCoordinatorAck { .. } => "NewCoordinatorAck",
            Message::Ping { .. } => "Ping",
            Message::PingResponse { .. } => "PingResponse",
            Message::StatusRequest => "StatusRequest",
            Message::StatusResponse { .. } => "StatusResponse",
            Message::Error { .. } => "Error",
        }
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Message length
    pub length: u32,
    /// Message checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let [l0, l1, l2, l3, c0, c1, c2, c3] = *bytes;
        Self {
            length: u32::from_le_bytes([l0, l1, l2, l3]),
            checksum: u32::from_le_bytes([c0, c1, c2, c3]),
        }
    }
}
