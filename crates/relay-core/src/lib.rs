//! # relay-core
//!
//! Foundation types shared by every relay crate:
//!
//! - **Branded IDs**: [`Identity`], [`GroupName`], [`ConnectionId`] as newtypes
//! - **Envelopes**: [`InboundEnvelope`] / [`OutboundEnvelope`], the JSON frames
//!   exchanged over a client socket, discriminated by `type`
//! - **Errors**: [`SetupError`] (connection refused) and [`DecodeError`]
//!   (malformed inbound frame) via `thiserror`
//! - **Constants**: close codes and the fixed informational messages

#![deny(unsafe_code)]

pub mod constants;
pub mod envelope;
pub mod errors;
pub mod ids;

pub use envelope::{DecodePolicy, InboundEnvelope, OutboundEnvelope};
pub use errors::{DecodeError, SetupError};
pub use ids::{ConnectionId, GroupName, Identity};
