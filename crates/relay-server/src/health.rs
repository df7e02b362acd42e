//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while accepting connections, `"stopping"` after shutdown began.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered sockets.
    pub connections: usize,
    /// Live groups.
    pub groups: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    stopping: bool,
    connections: usize,
    groups: usize,
) -> HealthResponse {
    HealthResponse {
        status: if stopping { "stopping" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        groups,
    }
}
