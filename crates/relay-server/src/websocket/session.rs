//! Per-socket lifecycle: connecting, active, terminated.
//!
//! A session validates the identity, registers with the hub, then runs two
//! halves concurrently: a writer task that drains the connection's outbound
//! queue onto the socket, and a read loop that decodes inbound frames and
//! hands them to the router. Whatever ends the read loop, the connection is
//! unregistered exactly once before the session returns.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use relay_core::constants::{
    CLOSE_GOING_AWAY, CLOSE_INVALID_DATA, HEARTBEAT_TIMEOUT_REASON, INVALID_MESSAGE_REASON,
    SHUTDOWN_REASON,
};
use relay_core::{ConnectionId, DecodePolicy, Identity, InboundEnvelope, SetupError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, instrument, warn};

use super::connection::{ClientConnection, OutboundFrame};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::metrics::{
    RELAY_CONNECTION_DURATION_SECONDS, RELAY_CONNECTIONS_ACTIVE, RELAY_CONNECTIONS_TOTAL,
    RELAY_DECODE_ERRORS_TOTAL, RELAY_DISCONNECTIONS_TOTAL, RELAY_SETUP_REJECTIONS_TOTAL,
};
use crate::router::{MessageRouter, Origin};

/// How long a finished session waits for its writer to flush queued frames.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-session tunables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Bound of each connection's outbound queue.
    pub send_queue_capacity: usize,
    /// Ping interval. Zero disables the heartbeat.
    pub heartbeat_interval: Duration,
    /// Silence tolerated before the session is ended.
    pub heartbeat_timeout: Duration,
    /// What to do with frames that fail to decode.
    pub decode_policy: DecodePolicy,
}

impl SessionConfig {
    /// Whether pings are sent at all.
    pub fn heartbeat_enabled(&self) -> bool {
        !self.heartbeat_interval.is_zero()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: 256,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            decode_policy: DecodePolicy::Skip,
        }
    }
}

/// Everything a session needs from the server.
#[derive(Clone, Debug)]
pub struct SessionContext {
    /// Router (and through it, the hub).
    pub router: Arc<MessageRouter>,
    /// Tunables.
    pub config: SessionConfig,
    /// Server-wide shutdown signal.
    pub shutdown: CancellationToken,
}

/// Why a session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client closed the socket or the stream ended.
    PeerClosed,
    /// Reading from the socket failed.
    TransportError(String),
    /// A frame failed to decode under [`DecodePolicy::Disconnect`].
    DecodeFailed,
    /// The client stopped answering pings.
    HeartbeatTimeout,
    /// The server is shutting down.
    ServerShutdown,
    /// The connection was refused before registration.
    Rejected(SetupError),
}

impl SessionEnd {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::TransportError(_) => "transport_error",
            Self::DecodeFailed => "decode_failed",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::ServerShutdown => "server_shutdown",
            Self::Rejected(_) => "rejected",
        }
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportError(e) => write!(f, "transport error: {e}"),
            Self::Rejected(e) => write!(f, "rejected: {e}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Run a session over an upgraded axum socket.
pub async fn run_ws_session(
    ws: WebSocket,
    raw_identity: Option<String>,
    ctx: SessionContext,
) -> SessionEnd {
    let (sink, stream) = ws.split();
    drive_session(sink, stream, raw_identity.as_deref(), ctx).await
}

/// Run a session over any message sink and stream.
#[instrument(
    skip_all,
    fields(identity = raw_identity.unwrap_or_default(), conn_id = tracing::field::Empty)
)]
pub async fn drive_session<K, S, E>(
    mut sink: K,
    mut stream: S,
    raw_identity: Option<&str>,
    ctx: SessionContext,
) -> SessionEnd
where
    K: Sink<Message> + Unpin + Send + 'static,
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let identity = match Identity::parse(raw_identity) {
        Ok(identity) => identity,
        Err(e) => return reject(&mut sink, e).await,
    };

    let hub = Arc::clone(ctx.router.hub());
    let (tx, rx) = mpsc::channel(ctx.config.send_queue_capacity);
    let connection = Arc::new(ClientConnection::new(ConnectionId::new(), tx));
    let conn_id = match hub.register(identity.clone(), Arc::clone(&connection)) {
        Ok(id) => id,
        Err(e) => return reject(&mut sink, e).await,
    };
    let _ = Span::current().record("conn_id", tracing::field::display(conn_id));

    info!("client connected");
    counter!(RELAY_CONNECTIONS_TOTAL).increment(1);
    gauge!(RELAY_CONNECTIONS_ACTIVE).increment(1.0);

    let mut writer = tokio::spawn(write_frames(sink, rx));
    let origin = Origin {
        connection_id: conn_id,
        identity,
        connection,
    };
    let end = read_frames(&mut stream, &origin, &ctx).await;

    let _ = hub.unregister(conn_id);
    let lifetime = origin.connection.age();
    // The writer exits once every handle to the queue is gone.
    drop(origin);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        debug!("writer did not drain in time, aborting");
        writer.abort();
    }

    info!(reason = %end, "client disconnected");
    counter!(RELAY_DISCONNECTIONS_TOTAL, "reason" => end.label()).increment(1);
    gauge!(RELAY_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(RELAY_CONNECTION_DURATION_SECONDS).record(lifetime.as_secs_f64());
    end
}

async fn reject<K>(sink: &mut K, error: SetupError) -> SessionEnd
where
    K: Sink<Message> + Unpin,
{
    info!(error = %error, "refusing connection");
    counter!(RELAY_SETUP_REJECTIONS_TOTAL, "reason" => error.label()).increment(1);
    let _ = sink
        .send(close_message(error.close_code(), error.close_reason()))
        .await;
    let _ = sink.close().await;
    SessionEnd::Rejected(error)
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

async fn write_frames<K>(mut sink: K, mut rx: mpsc::Receiver<OutboundFrame>)
where
    K: Sink<Message> + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let (message, last) = match frame {
            OutboundFrame::Text(text) => (Message::Text(text.as_str().into()), false),
            OutboundFrame::Ping => (Message::Ping(Bytes::new()), false),
            OutboundFrame::Close { code, reason } => (close_message(code, &reason), true),
        };
        if sink.send(message).await.is_err() || last {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_frames<S, E>(stream: &mut S, origin: &Origin, ctx: &SessionContext) -> SessionEnd
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let connection = &origin.connection;
    let config = &ctx.config;
    let heartbeat = async {
        if config.heartbeat_enabled() {
            run_heartbeat(
                Arc::clone(connection),
                config.heartbeat_interval,
                config.heartbeat_timeout,
                ctx.shutdown.child_token(),
            )
            .await
        } else {
            std::future::pending::<HeartbeatResult>().await
        }
    };
    tokio::pin!(heartbeat);

    loop {
        tokio::select! {
            // Shutdown wins over a heartbeat that observed the same cancellation.
            biased;

            () = ctx.shutdown.cancelled() => {
                let _ = connection.close(CLOSE_GOING_AWAY, SHUTDOWN_REASON);
                return SessionEnd::ServerShutdown;
            }
            result = &mut heartbeat => {
                return match result {
                    HeartbeatResult::TimedOut => {
                        warn!(idle = ?connection.last_seen_elapsed(), "client unresponsive, disconnecting");
                        let _ = connection.close(CLOSE_GOING_AWAY, HEARTBEAT_TIMEOUT_REASON);
                        SessionEnd::HeartbeatTimeout
                    }
                    HeartbeatResult::Cancelled => {
                        let _ = connection.close(CLOSE_GOING_AWAY, SHUTDOWN_REASON);
                        SessionEnd::ServerShutdown
                    }
                };
            }
            frame = stream.next() => {
                let message = match frame {
                    None => return SessionEnd::PeerClosed,
                    Some(Err(e)) => {
                        debug!(error = %e, "socket read failed");
                        return SessionEnd::TransportError(e.to_string());
                    }
                    Some(Ok(message)) => message,
                };
                connection.mark_alive();
                let end = match message {
                    Message::Text(text) => handle_text(text.as_str(), origin, ctx),
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => handle_text(text, origin, ctx),
                        Err(_) => {
                            debug!(len = data.len(), "ignoring non-UTF-8 binary frame");
                            None
                        }
                    },
                    Message::Ping(_) | Message::Pong(_) => None,
                    Message::Close(frame) => {
                        debug!(?frame, "client sent close frame");
                        Some(SessionEnd::PeerClosed)
                    }
                };
                if let Some(end) = end {
                    return end;
                }
            }
        }
    }
}

fn handle_text(text: &str, origin: &Origin, ctx: &SessionContext) -> Option<SessionEnd> {
    match InboundEnvelope::decode(text) {
        Ok(envelope) => {
            let kind = envelope.kind();
            let outcome = ctx.router.dispatch(origin, envelope);
            debug!(kind, ?outcome, "envelope routed");
            None
        }
        Err(e) => {
            counter!(RELAY_DECODE_ERRORS_TOTAL).increment(1);
            warn!(error = %e, len = text.len(), "invalid envelope");
            match ctx.config.decode_policy {
                DecodePolicy::Skip => None,
                DecodePolicy::Disconnect => {
                    let _ = origin
                        .connection
                        .close(CLOSE_INVALID_DATA, INVALID_MESSAGE_REASON);
                    Some(SessionEnd::DecodeFailed)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;
    use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
    use serde_json::{Value, json};
    use std::collections::BTreeSet;
    use std::io;
    use tokio::task::JoinHandle;

    struct TestClient {
        inbound: UnboundedSender<Result<Message, io::Error>>,
        outbound: UnboundedReceiver<Message>,
        handle: JoinHandle<SessionEnd>,
    }

    impl TestClient {
        fn send_text(&self, text: &str) {
            self.inbound.unbounded_send(Ok(Message::Text(text.into()))).unwrap();
        }

        fn send_json(&self, value: &Value) {
            self.send_text(&value.to_string());
        }

        async fn next_message(&mut self) -> Message {
            loop {
                let msg = tokio::time::timeout(Duration::from_secs(5), self.outbound.next())
                    .await
                    .expect("timed out waiting for a frame")
                    .expect("socket sink closed");
                if !matches!(msg, Message::Ping(_)) {
                    return msg;
                }
            }
        }

        async fn next_json(&mut self) -> Value {
            match self.next_message().await {
                Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
                other => panic!("expected text frame, got {other:?}"),
            }
        }

        async fn expect_close(&mut self) -> (u16, String) {
            match self.next_message().await {
                Message::Close(Some(frame)) => (frame.code, frame.reason.as_str().to_owned()),
                other => panic!("expected close frame, got {other:?}"),
            }
        }

        fn hang_up(self) -> JoinHandle<SessionEnd> {
            drop(self.inbound);
            self.handle
        }
    }

    fn context(hub: Hub, decode_policy: DecodePolicy) -> SessionContext {
        SessionContext {
            router: Arc::new(MessageRouter::new(Arc::new(hub))),
            config: SessionConfig {
                heartbeat_interval: Duration::ZERO,
                decode_policy,
                ..SessionConfig::default()
            },
            shutdown: CancellationToken::new(),
        }
    }

    fn spawn(ctx: &SessionContext, id: Option<&str>) -> TestClient {
        let (inbound, stream) = unbounded();
        let (sink, outbound) = unbounded();
        let ctx = ctx.clone();
        let id = id.map(str::to_owned);
        let handle =
            tokio::spawn(async move { drive_session(sink, stream, id.as_deref(), ctx).await });
        TestClient {
            inbound,
            outbound,
            handle,
        }
    }

    async fn connected(ctx: &SessionContext, id: &str) -> TestClient {
        let mut client = spawn(ctx, Some(id));
        let ack = client.next_json().await;
        assert_eq!(ack, json!({"type": "info", "message": "You are connected!"}));
        client
    }

    #[tokio::test]
    async fn missing_identity_is_rejected() {
        let ctx = context(Hub::default(), DecodePolicy::Skip);
        let mut client = spawn(&ctx, None);
        assert_eq!(
            client.expect_close().await,
            (1007, "Invalid channel id".to_owned())
        );
        assert_eq!(
            client.handle.await.unwrap(),
            SessionEnd::Rejected(SetupError::InvalidIdentity)
        );
        assert_eq!(ctx.router.hub().client_count(), 0);
    }

    #[tokio::test]
    async fn empty_identity_is_rejected() {
        let ctx = context(Hub::default(), DecodePolicy::Skip);
        let mut client = spawn(&ctx, Some(""));
        assert_eq!(client.expect_close().await.0, 1007);
    }

    #[tokio::test]
    async fn over_capacity_is_rejected() {
        let ctx = context(Hub::new(1), DecodePolicy::Skip);
        let _first = connected(&ctx, "alice").await;
        let mut second = spawn(&ctx, Some("bob"));
        assert_eq!(
            second.expect_close().await,
            (1013, "Server at capacity".to_owned())
        );
        assert_eq!(
            second.handle.await.unwrap(),
            SessionEnd::Rejected(SetupError::CapacityReached { limit: 1 })
        );
    }

    #[tokio::test]
    async fn hang_up_unregisters() {
        let ctx = context(Hub::default(), DecodePolicy::Skip);
        let client = connected(&ctx, "alice").await;
        assert_eq!(ctx.router.hub().client_count(), 1);
        assert_eq!(client.hang_up().await.unwrap(), SessionEnd::PeerClosed);
        assert_eq!(ctx.router.hub().client_count(), 0);
    }

    #[tokio::test]
    async fn close_frame_ends_session() {
        let ctx = context(Hub::default(), DecodePolicy::Skip);
        let client = connected(&ctx, "alice").await;
        client.inbound.unbounded_send(Ok(Message::Close(None))).unwrap();
        assert_eq!(client.handle.await.unwrap(), SessionEnd::PeerClosed);
        assert!(ctx.router.hub().lookup("alice").is_none());
    }

    #[tokio::test]
    async fn transport_error_ends_session() {
        let ctx = context(Hub::default(), DecodePolicy::Skip);
        let client = connected(&ctx, "alice").await;
        client
            .inbound
            .unbounded_send(Err(io::Error::other("connection reset")))
            .unwrap();
        assert_eq!(
            client.handle.await.unwrap(),
            SessionEnd::TransportError("connection reset".into())
        );
        assert_eq!(ctx.router.hub().client_count(), 0);
    }

    #[tokio::test]
    async fn group_message_reaches_other_members_only() {
        let ctx = context(Hub::default(), DecodePolicy::Skip);
        let mut alice = connected(&ctx, "alice").await;
        let mut bob = connected(&ctx, "bob").await;

        alice.send_json(&json!({"type": "join_group", "group": "team"}));
        assert_eq!(alice.next_json().await["message"], "You have joined group team");
        bob.send_json(&json!({"type": "join_group", "group": "team"}));
        assert_eq!(bob.next_json().await["message"], "You have joined group team");

        alice.send_json(&json!({"type": "group_message", "group": "team", "message": "hi"}));
        assert_eq!(
            bob.next_json().await,
            json!({"type": "group_message", "from": "alice", "group": "team", "message": "hi"})
        );

        assert_eq!(bob.hang_up().await.unwrap(), SessionEnd::PeerClosed);
        let hub = ctx.router.hub();
        assert_eq!(
            hub.member_identities("team"),
            BTreeSet::from([Identity::from("alice")])
        );
        assert!(hub.is_consistent());

        // Alice never saw her own broadcast.
        alice.send_json(&json!({"type": "message", "target": "alice", "message": "ping"}));
        assert_eq!(alice.next_json().await["message"], "ping");
    }

    #[tokio::test]
    async fn binary_utf8_frames_are_decoded() {
        let ctx = context(Hub::default(), DecodePolicy::Skip);
        let mut alice = connected(&ctx, "alice").await;
        alice
            .inbound
            .unbounded_send(Ok(Message::Binary(Bytes::from_static(
                br#"{"type":"join_group","group":"bin"}"#,
            ))))
            .unwrap();
        assert_eq!(alice.next_json().await["message"], "You have joined group bin");
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let ctx = context(Hub::default(), DecodePolicy::Skip);
        let mut alice = connected(&ctx, "alice").await;
        alice.send_text("not json at all");
        alice.send_json(&json!({"type": "message"}));
        alice.send_json(&json!({"type": "join_group", "group": "still-here"}));
        assert_eq!(
            alice.next_json().await["message"],
            "You have joined group still-here"
        );
        assert_eq!(ctx.router.hub().client_count(), 1);
    }

    #[tokio::test]
    async fn malformed_frame_disconnects_under_strict_policy() {
        let ctx = context(Hub::default(), DecodePolicy::Disconnect);
        let mut alice = connected(&ctx, "alice").await;
        alice.send_text("{broken");
        assert_eq!(alice.expect_close().await, (1007, "Invalid message".to_owned()));
        assert_eq!(alice.handle.await.unwrap(), SessionEnd::DecodeFailed);
        assert_eq!(ctx.router.hub().client_count(), 0);
    }

    #[tokio::test]
    async fn unknown_type_is_ignored() {
        let ctx = context(Hub::default(), DecodePolicy::Disconnect);
        let mut alice = connected(&ctx, "alice").await;
        alice.send_json(&json!({"type": "typing", "target": "bob"}));
        alice.send_json(&json!({"type": "message", "target": "alice", "message": 1}));
        assert_eq!(alice.next_json().await["message"], 1);
    }

    #[tokio::test]
    async fn shutdown_closes_with_going_away() {
        let ctx = context(Hub::default(), DecodePolicy::Skip);
        let mut alice = connected(&ctx, "alice").await;
        ctx.shutdown.cancel();
        assert_eq!(
            alice.expect_close().await,
            (1001, "Server shutting down".to_owned())
        );
        assert_eq!(alice.handle.await.unwrap(), SessionEnd::ServerShutdown);
        assert_eq!(ctx.router.hub().client_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_with_heartbeat_running_still_sends_going_away() {
        for _ in 0..50 {
            let ctx = SessionContext {
                router: Arc::new(MessageRouter::new(Arc::new(Hub::default()))),
                config: SessionConfig::default(),
                shutdown: CancellationToken::new(),
            };
            assert!(ctx.config.heartbeat_enabled());
            let mut alice = connected(&ctx, "alice").await;
            ctx.shutdown.cancel();
            assert_eq!(
                alice.expect_close().await,
                (1001, "Server shutting down".to_owned())
            );
            assert_eq!(alice.handle.await.unwrap(), SessionEnd::ServerShutdown);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_hits_heartbeat_timeout() {
        let mut ctx = context(Hub::default(), DecodePolicy::Skip);
        ctx.config.heartbeat_interval = Duration::from_secs(1);
        ctx.config.heartbeat_timeout = Duration::from_secs(1);
        let mut alice = connected(&ctx, "alice").await;

        assert_eq!(alice.expect_close().await.0, 1001);
        assert_eq!(alice.handle.await.unwrap(), SessionEnd::HeartbeatTimeout);
        assert_eq!(ctx.router.hub().client_count(), 0);
    }

    #[test]
    fn session_end_labels_are_distinct() {
        let ends = [
            SessionEnd::PeerClosed,
            SessionEnd::TransportError(String::new()),
            SessionEnd::DecodeFailed,
            SessionEnd::HeartbeatTimeout,
            SessionEnd::ServerShutdown,
            SessionEnd::Rejected(SetupError::ShuttingDown),
        ];
        let labels: BTreeSet<_> = ends.iter().map(SessionEnd::label).collect();
        assert_eq!(labels.len(), ends.len());
    }

    #[test]
    fn default_config_enables_heartbeat() {
        let config = SessionConfig::default();
        assert!(config.heartbeat_enabled());
        let disabled = SessionConfig {
            heartbeat_interval: Duration::ZERO,
            ..config
        };
        assert!(!disabled.heartbeat_enabled());
    }
}
