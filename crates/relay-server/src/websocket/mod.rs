//! Socket plumbing: send handles, heartbeat, and the session driver.

pub mod connection;
pub mod heartbeat;
pub mod session;
