//! Envelope dispatch.
//!
//! Every delivery is serialized once and fanned out with non-blocking
//! queue pushes, so one slow recipient never delays another. Routing never
//! fails: misses and drops are reported in the [`RouteOutcome`] and logged.

use std::sync::Arc;

use metrics::counter;
use relay_core::{ConnectionId, GroupName, Identity, InboundEnvelope, OutboundEnvelope};
use serde_json::Value;
use tracing::{debug, warn};

use crate::hub::Hub;
use crate::metrics::{RELAY_MESSAGES_ROUTED_TOTAL, RELAY_ROUTING_MISSES_TOTAL};
use crate::websocket::connection::ClientConnection;

/// The socket an envelope arrived on.
#[derive(Clone, Debug)]
pub struct Origin {
    /// Sending socket.
    pub connection_id: ConnectionId,
    /// Identity it registered with.
    pub identity: Identity,
    /// Its send handle, for acknowledgements.
    pub connection: Arc<ClientConnection>,
}

/// What happened to one inbound envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued for `recipients` sockets; `dropped` more had full or closed
    /// queues.
    Delivered {
        /// Frames queued.
        recipients: usize,
        /// Frames dropped.
        dropped: usize,
    },
    /// Target identity or group had nobody to deliver to.
    Dropped,
    /// Sender was added to `group`.
    Joined {
        /// Group joined.
        group: GroupName,
        /// The join created the group.
        created: bool,
    },
    /// Unrecognized envelope type.
    Ignored,
}

/// Routes decoded envelopes through the [`Hub`].
#[derive(Clone, Debug)]
pub struct MessageRouter {
    hub: Arc<Hub>,
}

impl MessageRouter {
    /// Router over `hub`.
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// The shared hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Route one envelope from `origin`.
    pub fn dispatch(&self, origin: &Origin, envelope: InboundEnvelope) -> RouteOutcome {
        match envelope {
            InboundEnvelope::Message { target, message } => {
                self.route_direct(origin, &target, message)
            }
            InboundEnvelope::GroupMessage { group, message } => {
                self.route_group(origin, group, message)
            }
            InboundEnvelope::JoinGroup { group } => self.route_join(origin, group),
            InboundEnvelope::Unknown => {
                debug!(conn_id = %origin.connection_id, "ignoring unknown envelope type");
                RouteOutcome::Ignored
            }
        }
    }

    /// Deliver to every socket registered under `target`, including the
    /// sender's own socket when it targets itself.
    pub fn route_direct(&self, origin: &Origin, target: &Identity, message: Value) -> RouteOutcome {
        let recipients = self.hub.lookup_all(target);
        if recipients.is_empty() {
            debug!(from = %origin.identity, %target, "direct message target not connected");
            counter!(RELAY_ROUTING_MISSES_TOTAL, "kind" => "message").increment(1);
            return RouteOutcome::Dropped;
        }
        let envelope = OutboundEnvelope::Message {
            from: origin.identity.clone(),
            message,
        };
        deliver("message", &envelope, &recipients)
    }

    /// Deliver to every member of `group` except the sending socket.
    ///
    /// The sender does not have to be a member.
    pub fn route_group(&self, origin: &Origin, group: GroupName, message: Value) -> RouteOutcome {
        let recipients = self
            .hub
            .group_recipients(&group, origin.connection_id)
            .unwrap_or_default();
        if recipients.is_empty() {
            debug!(from = %origin.identity, %group, "group message has no recipients");
            counter!(RELAY_ROUTING_MISSES_TOTAL, "kind" => "group_message").increment(1);
            return RouteOutcome::Dropped;
        }
        let envelope = OutboundEnvelope::GroupMessage {
            from: origin.identity.clone(),
            group,
            message,
        };
        deliver("group_message", &envelope, &recipients)
    }

    /// Add the sender to `group` and acknowledge on the sender's socket.
    pub fn route_join(&self, origin: &Origin, group: GroupName) -> RouteOutcome {
        let Some(outcome) = self.hub.join(origin.connection_id, &group) else {
            debug!(conn_id = %origin.connection_id, %group, "join from unregistered socket");
            return RouteOutcome::Dropped;
        };
        let _ = origin
            .connection
            .send_envelope(&OutboundEnvelope::joined(&group));
        debug!(identity = %origin.identity, %group, created = outcome.created, "joined group");
        RouteOutcome::Joined {
            group,
            created: outcome.created,
        }
    }
}

fn deliver(
    kind: &'static str,
    envelope: &OutboundEnvelope,
    recipients: &[Arc<ClientConnection>],
) -> RouteOutcome {
    let payload = match envelope.to_json() {
        Ok(json) => Arc::new(json),
        Err(e) => {
            warn!(kind, error = %e, "failed to serialize outbound envelope");
            return RouteOutcome::Dropped;
        }
    };

    let mut delivered = 0;
    let mut dropped = 0;
    for connection in recipients {
        if connection.send(Arc::clone(&payload)) {
            delivered += 1;
        } else {
            dropped += 1;
            warn!(kind, conn_id = %connection.id(), "recipient queue full or closed, dropping");
        }
    }
    if delivered > 0 {
        counter!(RELAY_MESSAGES_ROUTED_TOTAL, "kind" => kind).increment(1);
    }
    RouteOutcome::Delivered {
        recipients: delivered,
        dropped,
    }
}
