//! Server configuration.

use std::time::Duration;

use relay_core::DecodePolicy;
use serde::{Deserialize, Serialize};

use crate::websocket::session::SessionConfig;

/// Configuration for the relay server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Maximum concurrently registered sockets.
    pub max_connections: usize,
    /// Outbound queue bound per socket.
    pub send_queue_capacity: usize,
    /// Heartbeat interval in seconds. `0` disables pings.
    pub heartbeat_interval_secs: u64,
    /// Silence tolerated before a socket is dropped, in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Handling of frames that fail to decode.
    pub decode_policy: DecodePolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            send_queue_capacity: 256,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 16 * 1024 * 1024,
            decode_policy: DecodePolicy::Skip,
        }
    }
}

impl ServerConfig {
    /// Per-session tunables derived from this config.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            send_queue_capacity: self.send_queue_capacity.max(1),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            decode_policy: self.decode_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.max_connections, 1024);
        assert_eq!(cfg.max_message_size, 16 * 1024 * 1024);
        assert_eq!(cfg.decode_policy, DecodePolicy::Skip);
    }

    #[test]
    fn session_config_converts_seconds() {
        let cfg = ServerConfig {
            heartbeat_interval_secs: 5,
            heartbeat_timeout_secs: 15,
            decode_policy: DecodePolicy::Disconnect,
            ..ServerConfig::default()
        };
        let session = cfg.session_config();
        assert_eq!(session.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(session.heartbeat_timeout, Duration::from_secs(15));
        assert_eq!(session.decode_policy, DecodePolicy::Disconnect);
        assert_eq!(session.send_queue_capacity, 256);
    }

    #[test]
    fn zero_interval_disables_heartbeat() {
        let cfg = ServerConfig {
            heartbeat_interval_secs: 0,
            ..ServerConfig::default()
        };
        assert!(!cfg.session_config().heartbeat_enabled());
    }

    #[test]
    fn zero_queue_capacity_is_clamped() {
        let cfg = ServerConfig {
            send_queue_capacity: 0,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.session_config().send_queue_capacity, 1);
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains(r#""decode_policy":"skip""#));
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
