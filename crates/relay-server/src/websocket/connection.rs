//! Per-socket send handle.
//!
//! A [`ClientConnection`] is the only thing the registry, group index and
//! router ever hold for a socket. Sending never blocks: frames are pushed
//! onto a bounded queue drained by the socket's writer task, and a full or
//! closed queue drops the frame instead of stalling the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::Mutex;
use relay_core::{ConnectionId, OutboundEnvelope};
use tokio::sync::mpsc;
use tracing::warn;

use crate::metrics::RELAY_SEND_DROPS_TOTAL;

/// A frame queued for the socket writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Serialized envelope.
    Text(Arc<String>),
    /// Liveness ping.
    Ping,
    /// Close the socket; the writer stops after sending it.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Human-readable reason.
        reason: String,
    },
}

/// Send side of one open socket.
pub struct ClientConnection {
    id: ConnectionId,
    tx: mpsc::Sender<OutboundFrame>,
    connected_at: Instant,
    is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Wrap the sending half of a socket's outbound queue.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<OutboundFrame>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Server-assigned socket ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a text frame.
    ///
    /// Returns `false` if the queue is full or the writer is gone, and
    /// increments the dropped message counter.
    pub fn send(&self, payload: Arc<String>) -> bool {
        if self.tx.try_send(OutboundFrame::Text(payload)).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            counter!(RELAY_SEND_DROPS_TOTAL).increment(1);
            false
        }
    }

    /// Serialize an envelope and queue it.
    pub fn send_envelope(&self, envelope: &OutboundEnvelope) -> bool {
        match envelope.to_json() {
            Ok(json) => self.send(Arc::new(json)),
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "failed to serialize envelope");
                false
            }
        }
    }

    /// Queue a ping.
    pub fn ping(&self) -> bool {
        self.tx.try_send(OutboundFrame::Ping).is_ok()
    }

    /// Queue a close frame. Frames queued after it are never written.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.tx
            .try_send(OutboundFrame::Close {
                code,
                reason: reason.into(),
            })
            .is_ok()
    }

    /// Whether the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity (any frame, including pongs).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if there was activity since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last inbound activity (or connection establishment).
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("dropped", &self.drop_count())
            .finish_non_exhaustive()
    }
}
