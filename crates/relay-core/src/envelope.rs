//! JSON envelopes exchanged over a client socket.
//!
//! Every frame is an object with a `type` discriminant. Inbound types the
//! relay does not know decode to [`InboundEnvelope::Unknown`] and are ignored
//! by the router, so newer clients can talk to older servers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{CONNECTED_MESSAGE, joined_message};
use crate::errors::DecodeError;
use crate::ids::{GroupName, Identity};

/// A frame sent by a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEnvelope {
    /// Direct message to every connection declaring `target`.
    Message {
        /// Recipient identity.
        target: Identity,
        /// Free-form body, relayed verbatim.
        message: Value,
    },
    /// Broadcast to the other members of `group`.
    GroupMessage {
        /// Destination group.
        group: GroupName,
        /// Free-form body, relayed verbatim.
        message: Value,
    },
    /// Join `group`, creating it if needed.
    JoinGroup {
        /// Group to join.
        group: GroupName,
    },
    /// Any other `type` value.
    #[serde(other)]
    Unknown,
}

impl InboundEnvelope {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text).map_err(DecodeError::InvalidJson)?;
        serde_json::from_value(value).map_err(DecodeError::Malformed)
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::GroupMessage { .. } => "group_message",
            Self::JoinGroup { .. } => "join_group",
            Self::Unknown => "unknown",
        }
    }
}

/// A frame sent by the relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEnvelope {
    /// Informational notice (registration and join acknowledgements).
    Info {
        /// Notice text.
        message: String,
    },
    /// Direct delivery.
    Message {
        /// Sender identity.
        from: Identity,
        /// Body as sent.
        message: Value,
    },
    /// Group delivery.
    GroupMessage {
        /// Sender identity.
        from: Identity,
        /// Group the message was sent to.
        group: GroupName,
        /// Body as sent.
        message: Value,
    },
}

impl OutboundEnvelope {
    /// Acknowledgement sent right after registration.
    #[must_use]
    pub fn connected() -> Self {
        Self::Info {
            message: CONNECTED_MESSAGE.to_owned(),
        }
    }

    /// Acknowledgement sent after a join.
    #[must_use]
    pub fn joined(group: &GroupName) -> Self {
        Self::Info {
            message: joined_message(group),
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// What a session does with a frame that fails to decode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    /// Log and ignore the frame; the connection stays open.
    #[default]
    Skip,
    /// Close the connection with 1007 and end the session.
    Disconnect,
}

impl fmt::Display for DecodePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => f.write_str("skip"),
            Self::Disconnect => f.write_str("disconnect"),
        }
    }
}

impl FromStr for DecodePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "disconnect" => Ok(Self::Disconnect),
            other => Err(format!("unknown decode policy: {other}")),
        }
    }
}
