use relay_core::DecodePolicy;
use serde::{Deserialize, Serialize};

/// Server settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Maximum concurrently registered connections.
    pub max_connections: usize,
    /// Per-connection outbound queue length.
    pub send_queue_capacity: usize,
    /// Seconds between server pings (`0` disables the heartbeat).
    pub heartbeat_interval_secs: u64,
    /// Seconds without a pong before a connection is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Handling of frames that fail to decode.
    pub decode_policy: DecodePolicy,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            max_connections: 1024,
            send_queue_capacity: 256,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 16 * 1024 * 1024,
            decode_policy: DecodePolicy::Skip,
        }
    }
}
