//! Shared connection state.
//!
//! The [`Hub`] owns the [`ConnectionRegistry`] and the [`GroupIndex`] behind
//! a single lock so a disconnect and its group cascade are one atomic step.
//! The lock is never held across an `.await`; callers take snapshots of
//! send handles and deliver outside it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use metrics::gauge;
use parking_lot::Mutex;
use relay_core::constants::{CLOSE_GOING_AWAY, SHUTDOWN_REASON};
use relay_core::{ConnectionId, GroupName, Identity, OutboundEnvelope, SetupError};
use tracing::{debug, info};

use crate::groups::{GroupIndex, JoinOutcome};
use crate::metrics::RELAY_GROUPS_ACTIVE;
use crate::registry::{ClientRecord, ConnectionRegistry};
use crate::websocket::connection::ClientConnection;

/// Default cap on concurrently registered connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Snapshot of one group member.
#[derive(Clone, Debug)]
pub struct GroupMember {
    /// Member socket.
    pub connection_id: ConnectionId,
    /// Identity the member registered with.
    pub identity: Identity,
    /// Send handle.
    pub connection: Arc<ClientConnection>,
}

#[derive(Debug, Default)]
struct HubState {
    registry: ConnectionRegistry,
    groups: GroupIndex,
}

impl HubState {
    fn unregister(&mut self, id: ConnectionId) -> Option<(ClientRecord, usize)> {
        let record = self.registry.remove(id)?;
        let deleted = record
            .groups
            .iter()
            .filter(|group| self.groups.remove(group, id))
            .count();
        Some((record, deleted))
    }

    fn join(&mut self, id: ConnectionId, group: &GroupName) -> Option<JoinOutcome> {
        let record = self.registry.get_mut(id)?;
        let _ = record.groups.insert(group.clone());
        Some(self.groups.add(group.clone(), id))
    }

    fn is_consistent(&self) -> bool {
        if !self.registry.is_consistent() {
            return false;
        }
        let records_ok = self.registry.iter().all(|(id, record)| {
            record
                .groups
                .iter()
                .all(|group| self.groups.contains(group, id))
        });
        let groups_ok = self.groups.iter().all(|(group, members)| {
            !members.is_empty()
                && members.iter().all(|id| {
                    self.registry
                        .get(*id)
                        .is_some_and(|r| r.groups.contains(group))
                })
        });
        records_ok && groups_ok
    }
}

/// Registry plus group index, shared by every session.
#[derive(Debug)]
pub struct Hub {
    state: Mutex<HubState>,
    max_connections: usize,
    stopped: AtomicBool,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONNECTIONS)
    }
}

impl Hub {
    /// Empty hub that admits at most `max_connections` sockets.
    pub fn new(max_connections: usize) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            max_connections,
            stopped: AtomicBool::new(false),
        }
    }

    /// Connection cap.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Register a socket under `identity` and queue the connected
    /// acknowledgement on it.
    ///
    /// The acknowledgement is queued before the record becomes visible to
    /// routers, so it is always the first frame the client sees.
    pub fn register(
        &self,
        identity: Identity,
        connection: Arc<ClientConnection>,
    ) -> Result<ConnectionId, SetupError> {
        if identity.is_empty() {
            return Err(SetupError::InvalidIdentity);
        }
        let id = connection.id();
        let mut state = self.state.lock();
        if self.is_stopped() {
            return Err(SetupError::ShuttingDown);
        }
        if state.registry.len() >= self.max_connections {
            return Err(SetupError::CapacityReached {
                limit: self.max_connections,
            });
        }
        let _ = connection.send_envelope(&OutboundEnvelope::connected());
        state
            .registry
            .insert(id, ClientRecord::new(identity.clone(), connection));
        debug_assert!(state.is_consistent());
        let total = state.registry.len();
        drop(state);

        debug!(conn_id = %id, %identity, total, "client registered");
        Ok(id)
    }

    /// Remove a socket and every group membership it held.
    ///
    /// Idempotent: returns `false` if the socket was not registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let mut state = self.state.lock();
        let Some((record, deleted)) = state.unregister(id) else {
            return false;
        };
        debug_assert!(state.is_consistent());
        let groups = state.groups.len();
        drop(state);

        set_groups_gauge(groups);
        debug!(
            conn_id = %id,
            identity = %record.identity,
            left = record.groups.len(),
            groups_deleted = deleted,
            "client unregistered"
        );
        true
    }

    /// Earliest-registered live connection for `identity`.
    pub fn lookup(&self, identity: &str) -> Option<Arc<ClientConnection>> {
        self.state.lock().registry.lookup(identity)
    }

    /// Every live connection for `identity`.
    pub fn lookup_all(&self, identity: &str) -> Vec<Arc<ClientConnection>> {
        self.state.lock().registry.lookup_all(identity)
    }

    /// Identity a socket registered with.
    pub fn identity_of(&self, id: ConnectionId) -> Option<Identity> {
        self.state
            .lock()
            .registry
            .get(id)
            .map(|r| r.identity.clone())
    }

    /// Add a registered socket to `group`, creating the group on first join.
    ///
    /// Returns `None` if the socket is not registered.
    pub fn join(&self, id: ConnectionId, group: &GroupName) -> Option<JoinOutcome> {
        let mut state = self.state.lock();
        let outcome = state.join(id, group)?;
        debug_assert!(state.is_consistent());
        let groups = state.groups.len();
        drop(state);

        set_groups_gauge(groups);
        if outcome.created {
            info!(%group, conn_id = %id, "group created");
        }
        Some(outcome)
    }

    /// Snapshot of a group's members. Empty if the group does not exist.
    pub fn members(&self, group: &str) -> Vec<GroupMember> {
        let state = self.state.lock();
        state
            .groups
            .members(group)
            .into_iter()
            .flatten()
            .filter_map(|id| {
                state.registry.get(*id).map(|r| GroupMember {
                    connection_id: *id,
                    identity: r.identity.clone(),
                    connection: Arc::clone(&r.connection),
                })
            })
            .collect()
    }

    /// Distinct identities currently in `group`.
    pub fn member_identities(&self, group: &str) -> BTreeSet<Identity> {
        self.members(group)
            .into_iter()
            .map(|m| m.identity)
            .collect()
    }

    /// Send handles of every member of `group` except `exclude`.
    ///
    /// Returns `None` if the group does not exist.
    pub fn group_recipients(
        &self,
        group: &str,
        exclude: ConnectionId,
    ) -> Option<Vec<Arc<ClientConnection>>> {
        let state = self.state.lock();
        let members = state.groups.members(group)?;
        Some(
            members
                .iter()
                .filter(|id| **id != exclude)
                .filter_map(|id| state.registry.get(*id))
                .map(|r| Arc::clone(&r.connection))
                .collect(),
        )
    }

    /// Groups a socket has joined.
    pub fn groups_of(&self, id: ConnectionId) -> BTreeSet<GroupName> {
        self.state
            .lock()
            .registry
            .get(id)
            .map(|r| r.groups.clone())
            .unwrap_or_default()
    }

    /// Sorted names of live groups.
    pub fn group_names(&self) -> Vec<GroupName> {
        self.state.lock().groups.names()
    }

    /// Registered sockets.
    pub fn client_count(&self) -> usize {
        self.state.lock().registry.len()
    }

    /// Live groups.
    pub fn group_count(&self) -> usize {
        self.state.lock().groups.len()
    }

    /// Distinct registered identities.
    pub fn identity_count(&self) -> usize {
        self.state.lock().registry.identity_count()
    }

    /// Whether the registry and group index agree with each other and no
    /// group is empty.
    pub fn is_consistent(&self) -> bool {
        self.state.lock().is_consistent()
    }

    /// Refuse new registrations, close every socket with 1001 and clear all
    /// state. Returns the number of sockets closed.
    pub fn stop(&self) -> usize {
        self.stopped.store(true, Ordering::SeqCst);
        let drained = {
            let mut state = self.state.lock();
            state.groups.clear();
            state.registry.drain()
        };
        set_groups_gauge(0);

        for (_, record) in &drained {
            let _ = record.connection.close(CLOSE_GOING_AWAY, SHUTDOWN_REASON);
        }
        info!(closed = drained.len(), "hub stopped");
        drained.len()
    }

    /// Whether [`Hub::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[allow(clippy::cast_precision_loss)]
fn set_groups_gauge(groups: usize) {
    gauge!(RELAY_GROUPS_ACTIVE).set(groups as f64);
}
