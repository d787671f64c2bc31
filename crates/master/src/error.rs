//! Coordinator error types.
//!
//! Every variant except the configuration and spawn errors marks a
//! collaborator bug: the run aborts after the live workers are torn down.

use resmgr_core::{ResourceId, SlotId};
use thiserror::Error;

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, MasterError>;

/// Errors raised by the coordinator.
#[derive(Debug, Error)]
pub enum MasterError {
    /// A worker sent something the protocol does not allow.
    #[error("protocol violation from {slot}: {reason}")]
    ProtocolViolation { slot: SlotId, reason: String },

    /// A grant would break the capacity or exclusivity invariant.
    #[error("grant of {resource} to {slot} rejected: {reason}")]
    GrantViolation {
        slot: SlotId,
        resource: ResourceId,
        reason: String,
    },

    /// Slot index outside the table.
    #[error("slot {0} is out of range")]
    SlotOutOfRange(SlotId),

    /// Resource index outside the table.
    #[error("resource {0} is out of range")]
    ResourceOutOfRange(ResourceId),

    /// A worker channel closed while no stop was requested.
    #[error("channel to {slot} closed: {reason}")]
    ChannelClosed { slot: SlotId, reason: String },

    /// Launching a worker actor failed.
    #[error("failed to spawn worker {slot}: {reason}")]
    SpawnFailed { slot: SlotId, reason: String },

    /// Core error (config parsing, frame decoding).
    #[error("core error: {0}")]
    Core(#[from] resmgr_core::Error),
}

impl MasterError {
    /// Create a protocol violation error.
    pub fn protocol_violation(slot: SlotId, reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            slot,
            reason: reason.into(),
        }
    }

    /// Create a grant violation error.
    pub fn grant_violation(slot: SlotId, resource: ResourceId, reason: impl Into<String>) -> Self {
        Self::GrantViolation {
            slot,
            resource,
            reason: reason.into(),
        }
    }

    /// Create a channel closed error.
    pub fn channel_closed(slot: SlotId, reason: impl Into<String>) -> Self {
        Self::ChannelClosed {
            slot,
            reason: reason.into(),
        }
    }

    /// Create a spawn failed error.
    pub fn spawn_failed(slot: SlotId, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            slot,
            reason: reason.into(),
        }
    }

    /// Whether the run must abort. Spawn failures only skip one spawn attempt.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::SpawnFailed { .. })
    }
}
