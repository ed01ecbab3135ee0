//! This module provides the per-mutation change tracker. A tracker lives for exactly the
//! duration of one mutation's resolver execution: `begin` opens a transaction, the entity
//! event source reports changes through the `track_*` methods, and `end` returns the
//! accumulated cascade data.

use crate::engine::change_log::{ChangeLog, Operation};
use crate::engine::config::CascadeConfig;
use crate::engine::entity::{self, Entity, EntityKey};
use crate::engine::response::{CascadeData, CascadeMetadata, DeletedRecord, UpdatedRecord};
use crate::engine::walker::RelationshipWalker;
use crate::Error;
use chrono::Utc;
use log::{debug, error, trace};
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug)]
struct TransactionState {
    id: String,
    started_at: Instant,
    log: ChangeLog,
}

/// Tracks entity changes during one GraphQL mutation.
///
/// Changes arrive from the entity event source, whether ORM hooks or explicit resolver
/// calls; the tracker records them in the change log and follows relationships out to the
/// configured depth. Trackers are never shared across requests and all tracking calls
/// within a mutation are serial.
///
/// # Examples
///
/// ```rust
/// use graphql_cascade::engine::tracker::CascadeTracker;
///
/// let mut tracker = CascadeTracker::new().with_max_depth(2);
/// let transaction_id = tracker.begin().unwrap();
///
/// assert!(transaction_id.starts_with("cascade-"));
/// assert!(tracker.in_progress());
/// ```
#[derive(Debug)]
pub struct CascadeTracker {
    max_depth: usize,
    include_related: bool,
    exclude_types: HashSet<String>,
    txn: Option<TransactionState>,
    last: Option<CascadeData>,
}

impl CascadeTracker {
    /// Creates a tracker with the default depth bound of 3, relationship tracking
    /// enabled, and no excluded types
    pub fn new() -> CascadeTracker {
        CascadeTracker {
            max_depth: 3,
            include_related: true,
            exclude_types: HashSet::new(),
            txn: None,
            last: None,
        }
    }

    /// Creates a tracker configured from a [`CascadeConfig`]
    ///
    /// [`CascadeConfig`]: ../config/struct.CascadeConfig.html
    pub fn from_config(config: &CascadeConfig) -> CascadeTracker {
        CascadeTracker::new()
            .with_max_depth(config.max_depth())
            .with_include_related(config.include_related())
            .with_exclude_types(config.exclude_types().iter().cloned())
    }

    /// Sets the maximum relationship traversal depth. The root entity is at depth 0, so a
    /// depth of 0 tracks the root only.
    pub fn with_max_depth(mut self, max_depth: usize) -> CascadeTracker {
        self.max_depth = max_depth;
        self
    }

    /// Enables or disables relationship traversal
    pub fn with_include_related(mut self, include_related: bool) -> CascadeTracker {
        self.include_related = include_related;
        self
    }

    /// Sets the entity typenames excluded from tracking, such as audit-log and
    /// system-event types
    pub fn with_exclude_types<I>(mut self, types: I) -> CascadeTracker
    where
        I: IntoIterator<Item = String>,
    {
        self.exclude_types = types.into_iter().collect();
        self
    }

    /// Returns true while a transaction is open
    pub fn in_progress(&self) -> bool {
        self.txn.is_some()
    }

    /// Returns the id of the open transaction, or of the last completed one
    pub fn transaction_id(&self) -> Option<&str> {
        match &self.txn {
            Some(txn) => Some(&txn.id),
            None => self.last.as_ref().map(|data| data.metadata.transaction_id.as_str()),
        }
    }

    /// Opens a new transaction and returns its id
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] variant [`TransactionInProgress`] if a transaction is already
    /// open. Transactions are not nestable.
    ///
    /// [`Error`]: ../../enum.Error.html
    /// [`TransactionInProgress`]: ../../enum.Error.html#variant.TransactionInProgress
    pub fn begin(&mut self) -> Result<String, Error> {
        if self.txn.is_some() {
            return Err(Error::TransactionInProgress);
        }

        let id = format!("cascade-{}", Uuid::new_v4());
        debug!("Beginning cascade transaction {}", id);

        self.last = None;
        self.txn = Some(TransactionState {
            id: id.clone(),
            started_at: Instant::now(),
            log: ChangeLog::new(),
        });

        Ok(id)
    }

    /// Tracks the creation of an entity and follows its relationships
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] variant [`TransactionNotStarted`] if no transaction is open,
    /// or [`EntityUnrepresentable`] if the entity exposes no id.
    ///
    /// [`Error`]: ../../enum.Error.html
    /// [`TransactionNotStarted`]: ../../enum.Error.html#variant.TransactionNotStarted
    /// [`EntityUnrepresentable`]: ../../enum.Error.html#variant.EntityUnrepresentable
    pub fn track_create(&mut self, entity: &dyn Entity) -> Result<(), Error> {
        self.track(entity, Operation::Created)
    }

    /// Tracks an update to an entity and follows its relationships
    ///
    /// # Errors
    ///
    /// See [`track_create`](#method.track_create).
    pub fn track_update(&mut self, entity: &dyn Entity) -> Result<(), Error> {
        self.track(entity, Operation::Updated)
    }

    /// Tracks the deletion of an entity by typename and id. A deletion supersedes any
    /// prior creation or update for the same key.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] variant [`TransactionNotStarted`] if no transaction is open.
    ///
    /// [`Error`]: ../../enum.Error.html
    /// [`TransactionNotStarted`]: ../../enum.Error.html#variant.TransactionNotStarted
    pub fn track_delete(&mut self, typename: &str, id: &str) -> Result<(), Error> {
        let txn = self.txn.as_mut().ok_or(Error::TransactionNotStarted)?;

        if self.exclude_types.contains(typename) {
            trace!("Skipping excluded type {}", typename);
            return Ok(());
        }

        txn.log.record_delete(EntityKey::new(typename, id));
        Ok(())
    }

    fn track(&mut self, entity: &dyn Entity, operation: Operation) -> Result<(), Error> {
        let CascadeTracker {
            max_depth,
            include_related,
            exclude_types,
            txn,
            ..
        } = self;
        let txn = txn.as_mut().ok_or(Error::TransactionNotStarted)?;

        if exclude_types.contains(entity.typename()) {
            trace!("Skipping excluded type {}", entity.typename());
            return Ok(());
        }

        let key = entity::entity_key(entity)?;
        let snapshot = match entity::serialize(entity) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Omit the entity from the cascade but keep the transaction alive.
                error!("Error serializing entity {}: {}", key, e);
                txn.log.mark_visited(key);
                return Ok(());
            }
        };

        trace!("Tracking {} {}", operation, key);
        let first_visit = !txn.log.is_visited(&key);
        txn.log.record_change(key.clone(), operation, Some(snapshot));
        txn.log.mark_visited(key);

        if first_visit && *include_related {
            RelationshipWalker::new(*max_depth).walk(entity, &mut txn.log, exclude_types);
        }

        Ok(())
    }

    /// Returns true if the key has been recorded as updated or deleted in the open
    /// transaction. Event-source adapters use this to avoid re-reading entities that are
    /// already part of the cascade.
    pub fn contains(&self, typename: &str, id: &str) -> bool {
        self.txn
            .as_ref()
            .map(|txn| txn.log.contains(&EntityKey::new(typename, id)))
            .unwrap_or(false)
    }

    /// Returns the in-progress cascade data without closing the transaction. Used by the
    /// response builder to construct responses before the final commit.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] variant [`TransactionNotStarted`] if no transaction is open.
    ///
    /// [`Error`]: ../../enum.Error.html
    /// [`TransactionNotStarted`]: ../../enum.Error.html#variant.TransactionNotStarted
    pub fn snapshot(&self) -> Result<CascadeData, Error> {
        let txn = self.txn.as_ref().ok_or(Error::TransactionNotStarted)?;
        Ok(build_data(txn))
    }

    /// Closes the transaction and returns the full cascade data. Idempotent after
    /// success: repeat calls return the same data until the next `begin` or `abort`.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] variant [`TransactionNotStarted`] if no transaction is open
    /// and no completed transaction data remains.
    ///
    /// [`Error`]: ../../enum.Error.html
    /// [`TransactionNotStarted`]: ../../enum.Error.html#variant.TransactionNotStarted
    pub fn end(&mut self) -> Result<CascadeData, Error> {
        if let Some(txn) = self.txn.take() {
            debug!(
                "Ending cascade transaction {} with {} affected entities",
                txn.id,
                txn.log.affected_count()
            );
            let data = build_data(&txn);
            self.last = Some(data.clone());
            return Ok(data);
        }

        match &self.last {
            Some(data) => Ok(data.clone()),
            None => Err(Error::TransactionNotStarted),
        }
    }

    /// Discards the transaction and all tracked state
    pub fn abort(&mut self) {
        if let Some(txn) = &self.txn {
            debug!("Aborting cascade transaction {}", txn.id);
        }
        self.txn = None;
        self.last = None;
    }
}

impl Default for CascadeTracker {
    fn default() -> CascadeTracker {
        CascadeTracker::new()
    }
}

fn build_data(txn: &TransactionState) -> CascadeData {
    let updated: Vec<UpdatedRecord> = txn
        .log
        .updates()
        .filter_map(|change| {
            change.snapshot().map(|snapshot| {
                UpdatedRecord::new(change.key(), change.operation(), snapshot.clone())
            })
        })
        .collect();

    let deleted: Vec<DeletedRecord> = txn
        .log
        .deletions()
        .map(|key| DeletedRecord::new(key, Utc::now()))
        .collect();

    CascadeData {
        updated,
        deleted,
        metadata: CascadeMetadata::for_transaction(
            &txn.id,
            txn.log.depth(),
            txn.log.affected_count(),
            txn.started_at.elapsed().as_secs_f64(),
        ),
    }
}

/// Scope handle tying a transaction to a lexical scope. Dropping the handle without
/// calling [`end`] aborts the transaction, so a resolver that returns early or panics
/// never leaks tracking state into the next mutation.
///
/// [`end`]: #method.end
///
/// # Examples
///
/// ```rust
/// use graphql_cascade::engine::tracker::{CascadeTracker, CascadeTransaction};
///
/// let mut tracker = CascadeTracker::new();
/// let txn = CascadeTransaction::begin(&mut tracker).unwrap();
/// let data = txn.end().unwrap();
///
/// assert_eq!(0, data.metadata.affected_count);
/// ```
pub struct CascadeTransaction<'a> {
    tracker: &'a mut CascadeTracker,
    finished: bool,
}

impl<'a> CascadeTransaction<'a> {
    /// Opens a transaction on the tracker and wraps it in a scope handle
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] variant [`TransactionInProgress`] if a transaction is already
    /// open.
    ///
    /// [`Error`]: ../../enum.Error.html
    /// [`TransactionInProgress`]: ../../enum.Error.html#variant.TransactionInProgress
    pub fn begin(tracker: &'a mut CascadeTracker) -> Result<CascadeTransaction<'a>, Error> {
        tracker.begin()?;
        Ok(CascadeTransaction {
            tracker,
            finished: false,
        })
    }

    /// Closes the transaction and returns the cascade data
    pub fn end(mut self) -> Result<CascadeData, Error> {
        self.finished = true;
        self.tracker.end()
    }
}

impl<'a> Deref for CascadeTransaction<'a> {
    type Target = CascadeTracker;

    fn deref(&self) -> &CascadeTracker {
        self.tracker
    }
}

impl<'a> DerefMut for CascadeTransaction<'a> {
    fn deref_mut(&mut self) -> &mut CascadeTracker {
        self.tracker
    }
}

impl<'a> Drop for CascadeTransaction<'a> {
    fn drop(&mut self) {
        if !self.finished && self.tracker.in_progress() {
            debug!("Cascade transaction dropped without end; aborting");
            self.tracker.abort();
        }
    }
}
