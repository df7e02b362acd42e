//! Identity-to-connection registry.
//!
//! Keyed by [`ConnectionId`] so two sockets that claim the same identity
//! never overwrite each other. A secondary index maps each identity to its
//! connections in registration order.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use relay_core::{ConnectionId, GroupName, Identity};

use crate::websocket::connection::ClientConnection;

/// Everything the relay knows about one registered socket.
#[derive(Debug)]
pub struct ClientRecord {
    /// Identity presented at connect time.
    pub identity: Identity,
    /// Send handle.
    pub connection: Arc<ClientConnection>,
    /// Groups this connection has joined.
    pub groups: BTreeSet<GroupName>,
}

impl ClientRecord {
    /// Fresh record with no group memberships.
    pub fn new(identity: Identity, connection: Arc<ClientConnection>) -> Self {
        Self {
            identity,
            connection,
            groups: BTreeSet::new(),
        }
    }
}

/// Registered connections, indexed by ID and by identity.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    records: HashMap<ConnectionId, ClientRecord>,
    by_identity: HashMap<Identity, Vec<ConnectionId>>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record under `id`, replacing any previous record with the
    /// same ID.
    pub fn insert(&mut self, id: ConnectionId, record: ClientRecord) {
        let identity = record.identity.clone();
        if let Some(old) = self.records.insert(id, record) {
            self.unindex(&old.identity, id);
        }
        self.by_identity.entry(identity).or_default().push(id);
    }

    /// Remove a record. Returns `None` if `id` was not registered.
    pub fn remove(&mut self, id: ConnectionId) -> Option<ClientRecord> {
        let record = self.records.remove(&id)?;
        self.unindex(&record.identity, id);
        Some(record)
    }

    fn unindex(&mut self, identity: &Identity, id: ConnectionId) {
        if let Some(ids) = self.by_identity.get_mut(identity) {
            ids.retain(|existing| *existing != id);
            if ids.is_empty() {
                let _ = self.by_identity.remove(identity);
            }
        }
    }

    /// Record for `id`.
    pub fn get(&self, id: ConnectionId) -> Option<&ClientRecord> {
        self.records.get(&id)
    }

    /// Mutable record for `id`.
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ClientRecord> {
        self.records.get_mut(&id)
    }

    /// Earliest-registered live connection for `identity`.
    pub fn lookup(&self, identity: &str) -> Option<Arc<ClientConnection>> {
        let id = self.by_identity.get(identity)?.first()?;
        self.records.get(id).map(|r| Arc::clone(&r.connection))
    }

    /// Every live connection for `identity`, in registration order.
    pub fn lookup_all(&self, identity: &str) -> Vec<Arc<ClientConnection>> {
        self.by_identity
            .get(identity)
            .into_iter()
            .flatten()
            .filter_map(|id| self.records.get(id))
            .map(|r| Arc::clone(&r.connection))
            .collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of distinct identities with at least one connection.
    pub fn identity_count(&self) -> usize {
        self.by_identity.len()
    }

    /// Iterate over `(id, record)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &ClientRecord)> {
        self.records.iter().map(|(id, r)| (*id, r))
    }

    /// Remove and return every record.
    pub fn drain(&mut self) -> Vec<(ConnectionId, ClientRecord)> {
        self.by_identity.clear();
        self.records.drain().collect()
    }

    /// Whether the identity index agrees with the records.
    pub fn is_consistent(&self) -> bool {
        let indexed: usize = self.by_identity.values().map(Vec::len).sum();
        indexed == self.records.len()
            && self.by_identity.iter().all(|(identity, ids)| {
                !ids.is_empty()
                    && ids.iter().all(|id| {
                        self.records
                            .get(id)
                            .is_some_and(|r| &r.identity == identity)
                    })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::test_support::connection;

    fn record(identity: &str) -> (ConnectionId, ClientRecord) {
        let (conn, _rx) = connection(4);
        (conn.id(), ClientRecord::new(Identity::from(identity), conn))
    }

    #[test]
    fn insert_and_lookup() {
        let mut reg = ConnectionRegistry::new();
        let (id, rec) = record("alice");
        reg.insert(id, rec);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup("alice").unwrap().id(), id);
        assert!(reg.lookup("bob").is_none());
        assert!(reg.is_consistent());
    }

    #[test]
    fn remove_unknown_is_none() {
        let mut reg = ConnectionRegistry::new();
        assert!(reg.remove(ConnectionId::new()).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn duplicate_identity_keeps_both() {
        let mut reg = ConnectionRegistry::new();
        let (first, rec1) = record("alice");
        let (second, rec2) = record("alice");
        reg.insert(first, rec1);
        reg.insert(second, rec2);

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.identity_count(), 1);
        assert_eq!(reg.lookup("alice").unwrap().id(), first);
        let all: Vec<_> = reg.lookup_all("alice").iter().map(|c| c.id()).collect();
        assert_eq!(all, vec![first, second]);
        assert!(reg.is_consistent());
    }

    #[test]
    fn removing_one_duplicate_leaves_the_other() {
        let mut reg = ConnectionRegistry::new();
        let (first, rec1) = record("alice");
        let (second, rec2) = record("alice");
        reg.insert(first, rec1);
        reg.insert(second, rec2);

        let removed = reg.remove(first).unwrap();
        assert_eq!(removed.identity.as_str(), "alice");
        assert_eq!(reg.lookup("alice").unwrap().id(), second);
        assert!(reg.is_consistent());

        let _ = reg.remove(second);
        assert!(reg.lookup("alice").is_none());
        assert_eq!(reg.identity_count(), 0);
    }

    #[test]
    fn get_mut_tracks_groups() {
        let mut reg = ConnectionRegistry::new();
        let (id, rec) = record("alice");
        reg.insert(id, rec);
        let _ = reg.get_mut(id).unwrap().groups.insert(GroupName::from("team"));
        assert!(reg.get(id).unwrap().groups.contains("team"));
    }

    #[test]
    fn drain_empties_everything() {
        let mut reg = ConnectionRegistry::new();
        for name in ["a", "b", "c"] {
            let (id, rec) = record(name);
            reg.insert(id, rec);
        }
        assert_eq!(reg.drain().len(), 3);
        assert!(reg.is_empty());
        assert_eq!(reg.identity_count(), 0);
        assert!(reg.is_consistent());
    }
}
