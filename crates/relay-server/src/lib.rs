//! # relay-server
//!
//! Real-time WebSocket message relay.
//!
//! - [`hub::Hub`]: identity registry and group index behind one lock
//! - [`router::MessageRouter`]: direct, group and join routing with
//!   non-blocking fan-out
//! - [`websocket`]: per-socket send handles, heartbeat, session lifecycle
//! - [`server::RelayServer`]: Axum routes (`/`, `/ws`, `/health`, `/metrics`)
//!   and graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod groups;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use hub::Hub;
pub use router::{MessageRouter, Origin, RouteOutcome};
pub use server::{RelayServer, ServerHandle};
pub use websocket::session::{SessionConfig, SessionContext, SessionEnd};
