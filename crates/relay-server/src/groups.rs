//! Group name to member connections.
//!
//! Groups exist only while they have members: they are created by the first
//! join and deleted when the last member is removed.

use std::collections::{BTreeSet, HashMap};

use relay_core::{ConnectionId, GroupName};

/// What a join did to the index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The group did not exist before this join.
    pub created: bool,
    /// The connection was not already a member.
    pub added: bool,
}

/// Live groups and their member connections.
#[derive(Debug, Default)]
pub struct GroupIndex {
    groups: HashMap<GroupName, BTreeSet<ConnectionId>>,
}

impl GroupIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` to `group`, creating the group if needed. Idempotent.
    pub fn add(&mut self, group: GroupName, id: ConnectionId) -> JoinOutcome {
        let created = !self.groups.contains_key(&group);
        let added = self.groups.entry(group).or_default().insert(id);
        JoinOutcome { created, added }
    }

    /// Remove `id` from `group`. Returns `true` if that emptied and deleted
    /// the group.
    pub fn remove(&mut self, group: &str, id: ConnectionId) -> bool {
        let Some(members) = self.groups.get_mut(group) else {
            return false;
        };
        let _ = members.remove(&id);
        if members.is_empty() {
            let _ = self.groups.remove(group);
            true
        } else {
            false
        }
    }

    /// Members of `group`, or `None` if the group does not exist.
    pub fn members(&self, group: &str) -> Option<&BTreeSet<ConnectionId>> {
        self.groups.get(group)
    }

    /// Whether `id` is a member of `group`.
    pub fn contains(&self, group: &str, id: ConnectionId) -> bool {
        self.groups.get(group).is_some_and(|m| m.contains(&id))
    }

    /// Number of live groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether no groups exist.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Sorted names of live groups.
    pub fn names(&self) -> Vec<GroupName> {
        let mut names: Vec<_> = self.groups.keys().cloned().collect();
        names.sort();
        names
    }

    /// Iterate over `(group, members)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&GroupName, &BTreeSet<ConnectionId>)> {
        self.groups.iter()
    }

    /// Drop every group.
    pub fn clear(&mut self) {
        self.groups.clear();
    }
}
