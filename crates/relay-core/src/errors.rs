//! Error taxonomy.
//!
//! Only two kinds of failure are visible at this layer. A [`SetupError`]
//! refuses a connection before any envelope is exchanged; a [`DecodeError`]
//! rejects one inbound frame. Routing misses are not errors at all: unknown
//! targets and groups are dropped silently.

use thiserror::Error;

use crate::constants::{
    CAPACITY_REASON, CLOSE_GOING_AWAY, CLOSE_INVALID_DATA, CLOSE_TRY_AGAIN_LATER,
    INVALID_IDENTITY_REASON, SHUTDOWN_REASON,
};

/// Why a connection could not be registered.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SetupError {
    /// The identity parameter was missing or empty.
    #[error("missing or empty identity")]
    InvalidIdentity,
    /// The configured connection limit has been reached.
    #[error("connection limit of {limit} reached")]
    CapacityReached {
        /// Configured maximum.
        limit: usize,
    },
    /// The hub has been stopped.
    #[error("relay is shutting down")]
    ShuttingDown,
}

impl SetupError {
    /// WebSocket close code to send when refusing the connection.
    #[must_use]
    pub fn close_code(&self) -> u16 {
        match self {
            Self::InvalidIdentity => CLOSE_INVALID_DATA,
            Self::CapacityReached { .. } => CLOSE_TRY_AGAIN_LATER,
            Self::ShuttingDown => CLOSE_GOING_AWAY,
        }
    }

    /// Human-readable close reason.
    #[must_use]
    pub fn close_reason(&self) -> &'static str {
        match self {
            Self::InvalidIdentity => INVALID_IDENTITY_REASON,
            Self::CapacityReached { .. } => CAPACITY_REASON,
            Self::ShuttingDown => SHUTDOWN_REASON,
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidIdentity => "invalid_identity",
            Self::CapacityReached { .. } => "capacity",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

/// A single inbound frame could not be turned into an envelope.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    /// Valid JSON, but not a well-formed envelope (missing `type`, missing or
    /// mistyped field for a known type, or not an object).
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
}
