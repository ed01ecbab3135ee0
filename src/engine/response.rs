//! This module provides the cascade wire types and the response builder that assembles
//! the final [`CascadeResponse`] under strict size bounds.
//!
//! The JSON field names on these types are a compatibility contract consumed by client
//! caches and must not change.

use crate::engine::change_log::Operation;
use crate::engine::config::CascadeConfig;
use crate::engine::entity::EntityKey;
use crate::engine::invalidation::{InvalidationHint, InvalidationPlanner};
use crate::engine::tracker::CascadeTracker;
use crate::Error;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::time::Instant;

// Rough per-record averages used to estimate the serialized response size.
const ENTITY_RECORD_BYTES: usize = 1024;
const INVALIDATION_BYTES: usize = 512;
const METADATA_BYTES: usize = 1024;

/// A created or updated entity in the cascade payload
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct UpdatedRecord {
    /// GraphQL object type name of the entity
    #[serde(rename = "__typename")]
    pub typename: String,

    /// Id of the entity, unique within the typename
    pub id: String,

    /// Whether the entity was created or updated
    pub operation: Operation,

    /// Snapshot of the entity taken at the moment of the change event
    pub entity: Map<String, Value>,
}

impl UpdatedRecord {
    pub(crate) fn new(
        key: &EntityKey,
        operation: Operation,
        entity: Map<String, Value>,
    ) -> UpdatedRecord {
        UpdatedRecord {
            typename: key.typename().to_string(),
            id: key.id().to_string(),
            operation,
            entity,
        }
    }
}

/// A deleted entity in the cascade payload
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DeletedRecord {
    /// GraphQL object type name of the entity
    #[serde(rename = "__typename")]
    pub typename: String,

    /// Id of the deleted entity
    pub id: String,

    /// Deletion time as an ISO-8601 UTC string
    pub deleted_at: String,
}

impl DeletedRecord {
    pub(crate) fn new(key: &EntityKey, deleted_at: DateTime<Utc>) -> DeletedRecord {
        DeletedRecord {
            typename: key.typename().to_string(),
            id: key.id().to_string(),
            deleted_at: deleted_at.to_rfc3339(),
        }
    }
}

/// Which caps trimmed the cascade payload
#[derive(Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub enum TruncationFlag {
    /// The updated list was trimmed to `max_updated_entities`
    #[serde(rename = "updated")]
    Updated,

    /// The deleted list was trimmed to `max_deleted_entities`
    #[serde(rename = "deleted")]
    Deleted,

    /// The invalidation list was trimmed to `max_invalidations`
    #[serde(rename = "invalidations")]
    Invalidations,

    /// Both entity lists were trimmed further to fit the response size budget
    #[serde(rename = "size")]
    Size,
}

/// Bookkeeping attached to every cascade payload
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CascadeMetadata {
    /// Opaque id of the tracking transaction
    pub transaction_id: String,

    /// Time the payload was assembled, as an ISO-8601 UTC string
    pub timestamp: String,

    /// Deepest relationship level reached while tracking
    pub depth: usize,

    /// Number of entities affected, counted before any truncation
    pub affected_count: usize,

    /// Seconds spent tracking, from begin to transaction close
    pub tracking_time_sec: f64,

    /// Seconds spent assembling the response
    pub construction_time_sec: f64,

    /// Caps that trimmed the payload; omitted when nothing was truncated
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub truncated: BTreeSet<TruncationFlag>,
}

impl CascadeMetadata {
    pub(crate) fn for_transaction(
        transaction_id: &str,
        depth: usize,
        affected_count: usize,
        tracking_time_sec: f64,
    ) -> CascadeMetadata {
        CascadeMetadata {
            transaction_id: transaction_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            depth,
            affected_count,
            tracking_time_sec,
            construction_time_sec: 0.0,
            truncated: BTreeSet::new(),
        }
    }

    fn zeroed(transaction_id: String) -> CascadeMetadata {
        CascadeMetadata {
            transaction_id,
            timestamp: Utc::now().to_rfc3339(),
            depth: 0,
            affected_count: 0,
            tracking_time_sec: 0.0,
            construction_time_sec: 0.0,
            truncated: BTreeSet::new(),
        }
    }
}

/// The cascade data a tracker accumulates for one transaction, before invalidation
/// planning and capping
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CascadeData {
    /// Created and updated entities in first-seen order
    pub updated: Vec<UpdatedRecord>,

    /// Deleted entities in emission order
    pub deleted: Vec<DeletedRecord>,

    /// Transaction bookkeeping
    pub metadata: CascadeMetadata,
}

/// The machine-readable cascade attached to a mutation response
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CascadePayload {
    /// Created and updated entities in first-seen order
    pub updated: Vec<UpdatedRecord>,

    /// Deleted entities in emission order
    pub deleted: Vec<DeletedRecord>,

    /// Cache invalidation hints, most specific scope first
    pub invalidations: Vec<InvalidationHint>,

    /// Transaction bookkeeping
    pub metadata: CascadeMetadata,
}

impl CascadePayload {
    fn empty(transaction_id: String) -> CascadePayload {
        CascadePayload {
            updated: vec![],
            deleted: vec![],
            invalidations: vec![],
            metadata: CascadeMetadata::zeroed(transaction_id),
        }
    }
}

/// The complete response returned in place of a raw mutation payload
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CascadeResponse {
    /// Whether the mutation succeeded. Partial success is not modeled: a failed mutation
    /// carries errors and an empty cascade.
    pub success: bool,

    /// The primary mutation result, or null on failure
    pub data: Value,

    /// Structured errors, empty on success
    pub errors: Vec<CascadeError>,

    /// The cascade payload
    pub cascade: CascadePayload,
}

/// Standard cascade error codes, unified with the wire taxonomy
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CascadeErrorCode {
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,
    Conflict,
    TransactionFailed,
    Timeout,
    RateLimited,
    ServiceUnavailable,
    InternalError,
}

/// Structured error information carried on a [`CascadeResponse`]
///
/// # Examples
///
/// ```rust
/// use graphql_cascade::engine::response::CascadeError;
///
/// let e = CascadeError::timeout("Upstream did not answer in time", 5000);
/// let json = serde_json::to_value(&e).unwrap();
///
/// assert_eq!("TIMEOUT", json["code"]);
/// assert_eq!(true, json["extensions"]["retryable"]);
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CascadeError {
    /// Human-readable description of the failure
    pub message: String,

    /// Machine-readable error code
    pub code: CascadeErrorCode,

    /// The input field at fault, when one can be named
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// Path from the mutation root to the failing element
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<String>>,

    /// Additional machine-readable detail, such as retry hints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl CascadeError {
    /// Creates an error with a message and a code
    pub fn new(message: &str, code: CascadeErrorCode) -> CascadeError {
        CascadeError {
            message: message.to_string(),
            code,
            field: None,
            path: None,
            extensions: None,
        }
    }

    /// Creates an `INTERNAL_ERROR`, the default mapping for unrecognized resolver
    /// failures
    pub fn internal(message: &str) -> CascadeError {
        CascadeError::new(message, CascadeErrorCode::InternalError)
    }

    /// Creates a `VALIDATION_ERROR`
    pub fn validation(message: &str) -> CascadeError {
        CascadeError::new(message, CascadeErrorCode::ValidationError)
    }

    /// Creates a `NOT_FOUND` error
    pub fn not_found(message: &str) -> CascadeError {
        CascadeError::new(message, CascadeErrorCode::NotFound)
    }

    /// Creates a retryable `TIMEOUT` error carrying the elapsed budget in
    /// `extensions.timeoutMs`
    pub fn timeout(message: &str, timeout_ms: u64) -> CascadeError {
        let mut extensions = Map::new();
        extensions.insert("timeoutMs".to_string(), Value::from(timeout_ms));
        extensions.insert("retryable".to_string(), Value::Bool(true));
        CascadeError::new(message, CascadeErrorCode::Timeout).with_extensions(extensions)
    }

    /// Creates a retryable `RATE_LIMITED` error carrying the limit window in its
    /// extensions
    pub fn rate_limited(message: &str, retry_after: u64, limit: u64, window: &str) -> CascadeError {
        let mut extensions = Map::new();
        extensions.insert("retryAfter".to_string(), Value::from(retry_after));
        extensions.insert("limit".to_string(), Value::from(limit));
        extensions.insert("window".to_string(), Value::String(window.to_string()));
        extensions.insert("remaining".to_string(), Value::from(0u64));
        extensions.insert("retryable".to_string(), Value::Bool(true));
        CascadeError::new(message, CascadeErrorCode::RateLimited).with_extensions(extensions)
    }

    /// Creates a retryable `SERVICE_UNAVAILABLE` error naming the failing service
    pub fn service_unavailable(
        message: &str,
        service: &str,
        retry_after: Option<u64>,
    ) -> CascadeError {
        let mut extensions = Map::new();
        extensions.insert("service".to_string(), Value::String(service.to_string()));
        extensions.insert("retryable".to_string(), Value::Bool(true));
        if let Some(retry_after) = retry_after {
            extensions.insert("retryAfter".to_string(), Value::from(retry_after));
        }
        CascadeError::new(message, CascadeErrorCode::ServiceUnavailable)
            .with_extensions(extensions)
    }

    /// Names the input field at fault
    pub fn with_field(mut self, field: &str) -> CascadeError {
        self.field = Some(field.to_string());
        self
    }

    /// Sets the path from the mutation root to the failing element
    pub fn with_path(mut self, path: Vec<String>) -> CascadeError {
        self.path = Some(path);
        self
    }

    /// Sets the extensions mapping
    pub fn with_extensions(mut self, extensions: Map<String, Value>) -> CascadeError {
        self.extensions = Some(extensions);
        self
    }
}

impl Display for CascadeError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<Error> for CascadeError {
    fn from(e: Error) -> CascadeError {
        let code = match e {
            Error::TransactionInProgress | Error::TransactionNotStarted => {
                CascadeErrorCode::TransactionFailed
            }
            Error::ConfigOpenFailed { .. }
            | Error::ConfigFormatUnsupported { .. }
            | Error::ConfigValueInvalid { .. }
            | Error::DeserializationFailed { .. }
            | Error::DirectiveArgumentNotParsed { .. }
            | Error::InvalidationRuleInvalid { .. }
            | Error::EnvironmentVariableNotParsed { .. } => CascadeErrorCode::ValidationError,
            Error::EntityUnrepresentable { .. }
            | Error::LockPoisoned
            | Error::SchemaParseFailed { .. }
            | Error::SerializationFailed { .. } => CascadeErrorCode::InternalError,
        };
        CascadeError::new(&format!("{}", e), code)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for CascadeError {
    fn from(e: Box<dyn std::error::Error + Send + Sync>) -> CascadeError {
        CascadeError::internal(&format!("{}", e))
    }
}

/// Assembles [`CascadeResponse`] values from a tracker's accumulated changes, enforcing
/// the entity, invalidation, and size caps.
///
/// # Examples
///
/// ```rust
/// use graphql_cascade::engine::response::ResponseBuilder;
/// use graphql_cascade::engine::tracker::CascadeTracker;
///
/// let mut tracker = CascadeTracker::new();
/// tracker.begin().unwrap();
///
/// let response = ResponseBuilder::new()
///     .build(&mut tracker, None, None)
///     .unwrap();
///
/// assert!(response.success);
/// assert!(response.cascade.updated.is_empty());
/// ```
#[derive(Clone, Debug)]
pub struct ResponseBuilder<'a> {
    planner: Option<&'a InvalidationPlanner>,
    max_updated_entities: usize,
    max_deleted_entities: usize,
    max_invalidations: usize,
    max_response_size_mb: f64,
}

impl<'a> ResponseBuilder<'a> {
    /// Creates a builder with the default caps: 500 updated entities, 100 deleted
    /// entities, 50 invalidations, 5 MiB estimated response size, and no planner
    pub fn new() -> ResponseBuilder<'a> {
        ResponseBuilder {
            planner: None,
            max_updated_entities: 500,
            max_deleted_entities: 100,
            max_invalidations: 50,
            max_response_size_mb: 5.0,
        }
    }

    /// Creates a builder with caps taken from a [`CascadeConfig`]
    ///
    /// [`CascadeConfig`]: ../config/struct.CascadeConfig.html
    pub fn from_config(config: &CascadeConfig) -> ResponseBuilder<'a> {
        ResponseBuilder {
            planner: None,
            max_updated_entities: config.max_updated_entities(),
            max_deleted_entities: config.max_deleted_entities(),
            max_invalidations: config.max_invalidations(),
            max_response_size_mb: config.max_response_size_mb(),
        }
    }

    /// Attaches an invalidation planner, invoked on successful builds only
    pub fn with_planner(mut self, planner: &'a InvalidationPlanner) -> ResponseBuilder<'a> {
        self.planner = Some(planner);
        self
    }

    /// Overrides the updated entity cap
    pub fn with_max_updated_entities(mut self, max: usize) -> ResponseBuilder<'a> {
        self.max_updated_entities = max;
        self
    }

    /// Overrides the deleted entity cap
    pub fn with_max_deleted_entities(mut self, max: usize) -> ResponseBuilder<'a> {
        self.max_deleted_entities = max;
        self
    }

    /// Overrides the invalidation cap
    pub fn with_max_invalidations(mut self, max: usize) -> ResponseBuilder<'a> {
        self.max_invalidations = max;
        self
    }

    /// Overrides the estimated response size budget, in MiB
    pub fn with_max_response_size_mb(mut self, max: f64) -> ResponseBuilder<'a> {
        self.max_response_size_mb = max;
        self
    }

    /// Builds a successful response. Closes the tracker's transaction (a no-op when it
    /// was already ended), plans invalidations when a planner is attached, and applies
    /// the caps in order: updated, deleted, invalidations, then the size estimate.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] variant [`TransactionNotStarted`] if the tracker has neither
    /// an open transaction nor completed cascade data.
    ///
    /// [`Error`]: ../../enum.Error.html
    /// [`TransactionNotStarted`]: ../../enum.Error.html#variant.TransactionNotStarted
    #[tracing::instrument(name = "cascade-build-response", skip(self, tracker, data))]
    pub fn build(
        &self,
        tracker: &mut CascadeTracker,
        primary: Option<&EntityKey>,
        data: Option<Value>,
    ) -> Result<CascadeResponse, Error> {
        let start = Instant::now();

        let cascade = tracker.end()?;
        let mut updated = cascade.updated;
        let mut deleted = cascade.deleted;
        let mut metadata = cascade.metadata;

        let mut invalidations = match self.planner {
            Some(planner) => planner.plan(&updated, &deleted, primary),
            None => vec![],
        };

        let mut truncated = BTreeSet::new();
        if updated.len() > self.max_updated_entities {
            updated.truncate(self.max_updated_entities);
            truncated.insert(TruncationFlag::Updated);
        }
        if deleted.len() > self.max_deleted_entities {
            deleted.truncate(self.max_deleted_entities);
            truncated.insert(TruncationFlag::Deleted);
        }
        if invalidations.len() > self.max_invalidations {
            invalidations.truncate(self.max_invalidations);
            truncated.insert(TruncationFlag::Invalidations);
        }

        let estimate = (updated.len() + deleted.len()) * ENTITY_RECORD_BYTES
            + invalidations.len() * INVALIDATION_BYTES
            + METADATA_BYTES;
        let budget = self.max_response_size_mb * 1024.0 * 1024.0;
        if estimate as f64 > budget && updated.len() + deleted.len() > 100 {
            updated.truncate(50);
            deleted.truncate(50);
            truncated.insert(TruncationFlag::Size);
        }

        if !truncated.is_empty() {
            debug!(
                "Cascade payload truncated for transaction {}: {:?}",
                metadata.transaction_id, truncated
            );
        }

        metadata.truncated = truncated;
        metadata.construction_time_sec = start.elapsed().as_secs_f64();

        Ok(CascadeResponse {
            success: true,
            data: data.unwrap_or(Value::Null),
            errors: vec![],
            cascade: CascadePayload {
                updated,
                deleted,
                invalidations,
                metadata,
            },
        })
    }

    /// Builds a failure response. Discards any open transaction; the payload carries
    /// empty entity and invalidation lists and zeroed metadata, with the transaction id
    /// preserved when one existed.
    pub fn build_error(
        &self,
        tracker: &mut CascadeTracker,
        errors: Vec<CascadeError>,
    ) -> CascadeResponse {
        let transaction_id = tracker.transaction_id().unwrap_or("").to_string();
        if tracker.in_progress() {
            tracker.abort();
        }

        CascadeResponse {
            success: false,
            data: Value::Null,
            errors,
            cascade: CascadePayload::empty(transaction_id),
        }
    }
}

impl<'a> Default for ResponseBuilder<'a> {
    fn default() -> ResponseBuilder<'a> {
        ResponseBuilder::new()
    }
}
