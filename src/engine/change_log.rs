//! This module provides the per-transaction change log: an insertion-ordered record of
//! entity updates, an emission-ordered set of deletions, and the visited set used by the
//! relationship walker to break cycles.

use crate::engine::entity::EntityKey;
use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt::{Display, Formatter};

/// The operation recorded for an entity within one transaction
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Operation {
    /// The entity was created during the mutation
    #[serde(rename = "CREATED")]
    Created,

    /// The entity was updated, directly or as a cascade effect
    #[serde(rename = "UPDATED")]
    Updated,

    /// The entity was deleted
    #[serde(rename = "DELETED")]
    Deleted,
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Operation::Created => write!(f, "CREATED"),
            Operation::Updated => write!(f, "UPDATED"),
            Operation::Deleted => write!(f, "DELETED"),
        }
    }
}

/// Resolves the operation recorded for a key that is tracked more than once in a single
/// transaction. `DELETED` supersedes everything; `CREATED` wins over `UPDATED` in either
/// order, so a create reported after an update still surfaces as a creation.
pub(crate) fn merge_operations(prior: Operation, new: Operation) -> Operation {
    match (prior, new) {
        (Operation::Deleted, _) | (_, Operation::Deleted) => Operation::Deleted,
        (Operation::Created, _) | (_, Operation::Created) => Operation::Created,
        (Operation::Updated, Operation::Updated) => Operation::Updated,
    }
}

/// A single recorded change to an entity. The snapshot is taken at the moment of the
/// change event and never re-read; deletions carry no snapshot.
#[derive(Clone, Debug)]
pub struct EntityChange {
    key: EntityKey,
    operation: Operation,
    snapshot: Option<Map<String, Value>>,
    timestamp: DateTime<Utc>,
}

impl EntityChange {
    /// Returns the cascade key of the changed entity
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Returns the recorded operation, after merging
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Returns the serialized snapshot, present for creations and updates
    pub fn snapshot(&self) -> Option<&Map<String, Value>> {
        self.snapshot.as_ref()
    }

    /// Returns the time at which the change was recorded
    pub fn timestamp(&self) -> &DateTime<Utc> {
        &self.timestamp
    }
}

/// Holds the entity changes for one transaction. The `updated` map preserves first-seen
/// insertion order, which fixes the order of records in the final response; `deleted`
/// preserves emission order.
#[derive(Debug, Default)]
pub(crate) struct ChangeLog {
    updated: IndexMap<EntityKey, EntityChange>,
    deleted: IndexSet<EntityKey>,
    visited: HashSet<EntityKey>,
    depth: usize,
}

impl ChangeLog {
    pub(crate) fn new() -> ChangeLog {
        ChangeLog::default()
    }

    /// Records a creation or update for a key, merging with any prior operation for the
    /// same key and replacing its snapshot. A change for a key already in the deleted set
    /// is a no-op, so `updated` and `deleted` never intersect.
    pub(crate) fn record_change(
        &mut self,
        key: EntityKey,
        operation: Operation,
        snapshot: Option<Map<String, Value>>,
    ) {
        if operation == Operation::Deleted {
            self.record_delete(key);
            return;
        }

        if self.deleted.contains(&key) {
            return;
        }

        let timestamp = Utc::now();
        match self.updated.get_mut(&key) {
            Some(change) => {
                change.operation = merge_operations(change.operation, operation);
                change.snapshot = snapshot;
                change.timestamp = timestamp;
            }
            None => {
                self.updated.insert(
                    key.clone(),
                    EntityChange {
                        key,
                        operation,
                        snapshot,
                        timestamp,
                    },
                );
            }
        }
    }

    /// Records a deletion for a key, removing any prior update for the same key.
    /// Subsequent changes for the key are ignored.
    pub(crate) fn record_delete(&mut self, key: EntityKey) {
        self.updated.shift_remove(&key);
        self.visited.insert(key.clone());
        self.deleted.insert(key);
    }

    /// Returns true if the key has been recorded as updated or deleted
    pub(crate) fn contains(&self, key: &EntityKey) -> bool {
        self.updated.contains_key(key) || self.deleted.contains(key)
    }

    pub(crate) fn is_visited(&self, key: &EntityKey) -> bool {
        self.visited.contains(key)
    }

    pub(crate) fn mark_visited(&mut self, key: EntityKey) {
        self.visited.insert(key);
    }

    /// Raises the recorded traversal depth. The value never decreases, so it reports the
    /// deepest level reached during the transaction.
    pub(crate) fn note_depth(&mut self, depth: usize) {
        if depth > self.depth {
            self.depth = depth;
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn affected_count(&self) -> usize {
        self.updated.len() + self.deleted.len()
    }

    /// Iterates recorded creations and updates in first-seen order
    pub(crate) fn updates(&self) -> impl Iterator<Item = &EntityChange> {
        self.updated.values()
    }

    /// Iterates recorded deletions in emission order
    pub(crate) fn deletions(&self) -> impl Iterator<Item = &EntityKey> {
        self.deleted.iter()
    }
}
