//! Wire constants: close codes and fixed informational texts.

/// Endpoint going away (server shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Invalid frame payload data (missing identity, malformed envelope).
pub const CLOSE_INVALID_DATA: u16 = 1007;

/// Try again later (server at capacity).
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Name of the query parameter carrying the client identity.
pub const IDENTITY_PARAM: &str = "id";

/// Text of the acknowledgement sent once a connection is registered.
pub const CONNECTED_MESSAGE: &str = "You are connected!";

/// Close reason for a missing or empty identity.
pub const INVALID_IDENTITY_REASON: &str = "Invalid channel id";

/// Close reason when a malformed envelope ends the session.
pub const INVALID_MESSAGE_REASON: &str = "Invalid message";

/// Close reason when the server refuses new connections.
pub const CAPACITY_REASON: &str = "Server at capacity";

/// Close reason sent to every client on shutdown.
pub const SHUTDOWN_REASON: &str = "Server shutting down";

/// Close reason when a client stops answering pings.
pub const HEARTBEAT_TIMEOUT_REASON: &str = "Heartbeat timeout";

/// Text of the acknowledgement sent after joining `group`.
#[must_use]
pub fn joined_message(group: &str) -> String {
    format!("You have joined group {group}")
}
