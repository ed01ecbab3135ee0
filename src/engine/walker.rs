//! This module provides the relationship walker, a bounded breadth-first traversal over
//! entity relationships that records transitively affected entities as updates.

use crate::engine::change_log::{ChangeLog, Operation};
use crate::engine::entity::{self, Entity};
use log::{error, trace, warn};
use std::collections::{HashSet, VecDeque};

/// Walks the relationship graph out from a just-recorded root entity. The traversal is an
/// explicit queue, never recursion; the root sits at depth 0 and traversal stops when the
/// next step would exceed `max_depth`, so a `max_depth` of 0 tracks the root only. The
/// change log's visited set breaks cycles.
#[derive(Clone, Debug)]
pub(crate) struct RelationshipWalker {
    max_depth: usize,
}

impl RelationshipWalker {
    pub(crate) fn new(max_depth: usize) -> RelationshipWalker {
        RelationshipWalker { max_depth }
    }

    /// Enumerates the root's neighbors breadth-first and records each as `UPDATED` with a
    /// snapshot taken at discovery time. Excluded typenames are neither recorded nor
    /// walked through. A neighbor with no id, or whose serialization fails, is logged and
    /// skipped; the walk continues with its siblings.
    pub(crate) fn walk<'a>(
        &self,
        root: &'a dyn Entity,
        log: &mut ChangeLog,
        exclude_types: &HashSet<String>,
    ) {
        let mut queue: VecDeque<(&'a dyn Entity, usize)> = VecDeque::new();
        queue.push_back((root, 0));

        while let Some((node, depth)) = queue.pop_front() {
            let next = depth + 1;
            if next > self.max_depth {
                continue;
            }

            for neighbor in node.relations() {
                if exclude_types.contains(neighbor.typename()) {
                    trace!("Walker skipping excluded type {}", neighbor.typename());
                    continue;
                }

                let key = match entity::entity_key(neighbor) {
                    Ok(key) => key,
                    Err(e) => {
                        warn!("Walker skipping neighbor without a cascade key: {}", e);
                        continue;
                    }
                };

                if log.is_visited(&key) {
                    continue;
                }
                log.mark_visited(key.clone());

                match entity::serialize(neighbor) {
                    Ok(snapshot) => {
                        trace!("Walker recording {} at depth {}", key, next);
                        log.record_change(key, Operation::Updated, Some(snapshot));
                        log.note_depth(next);
                        queue.push_back((neighbor, next));
                    }
                    Err(e) => {
                        // Single-entity failures are dropped from the cascade rather than
                        // failing the mutation.
                        error!("Error serializing entity {}: {}", key, e);
                    }
                }
            }
        }
    }
}
