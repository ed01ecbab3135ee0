//! This module provides the cascade engine: the middleware adapter that binds a tracker
//! to each mutation's execution scope, the supporting modules for configuration, entity
//! identity, change tracking, invalidation planning, and response construction.

use crate::engine::config::CascadeConfig;
use crate::engine::entity::{DynamicEntity, Entity, EntityKey};
use crate::engine::events::{EntityEvent, EventSink};
use crate::engine::invalidation::InvalidationPlanner;
use crate::engine::response::{CascadeError, CascadeResponse, ResponseBuilder};
use crate::engine::schema::{CascadeDirective, CascadeSchema};
use crate::engine::tracker::CascadeTracker;
use crate::Error;
use log::{trace, warn};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex};

pub mod change_log;
pub mod config;
pub mod entity;
pub mod events;
pub mod invalidation;
pub mod response;
pub mod schema;
pub mod tracker;
mod walker;

/// The primary result a resolver hands back to the middleware
pub enum PrimaryResult {
    /// A typed entity; it drives the primary-result refetch hint and serializes into the
    /// response's `data` member
    Entity(Box<dyn Entity + Send>),

    /// A JSON value; when it is entity-shaped it still drives the refetch hint
    Json(Value),

    /// No primary result
    None,
}

impl PrimaryResult {
    fn key(&self) -> Option<EntityKey> {
        match self {
            PrimaryResult::Entity(e) => entity::entity_key(e.as_ref()).ok(),
            PrimaryResult::Json(v) => {
                DynamicEntity::from_value(v).and_then(|d| entity::entity_key(&d).ok())
            }
            PrimaryResult::None => None,
        }
    }

    fn data(&self) -> Option<Value> {
        match self {
            PrimaryResult::Entity(e) => entity::serialize(e.as_ref()).ok().map(Value::Object),
            PrimaryResult::Json(v) => Some(v.clone()),
            PrimaryResult::None => None,
        }
    }
}

impl From<Value> for PrimaryResult {
    fn from(v: Value) -> PrimaryResult {
        PrimaryResult::Json(v)
    }
}

/// The tracking handle handed to a resolver. It is the entity event source surface: ORM
/// hooks and resolver code report changes through it while the mutation executes.
///
/// The handle is cheap to clone and safe to move into an async resolver. For mutation
/// fields without a `@cascade` directive the handle is disabled and every tracking call
/// is a no-op, so resolver code never needs to know whether it is being tracked.
#[derive(Clone)]
pub struct CascadeContext {
    tracker: Option<Arc<Mutex<CascadeTracker>>>,
}

impl CascadeContext {
    fn active(tracker: Arc<Mutex<CascadeTracker>>) -> CascadeContext {
        CascadeContext {
            tracker: Some(tracker),
        }
    }

    /// Creates a handle whose tracking calls are no-ops
    pub fn disabled() -> CascadeContext {
        CascadeContext { tracker: None }
    }

    /// Returns true when tracking calls are recorded
    pub fn enabled(&self) -> bool {
        self.tracker.is_some()
    }

    /// Reports the creation of an entity
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the tracker rejects the entity or the tracker lock was
    /// poisoned.
    ///
    /// [`Error`]: ../enum.Error.html
    pub fn track_create(&self, entity: &dyn Entity) -> Result<(), Error> {
        match &self.tracker {
            Some(tracker) => tracker
                .lock()
                .map_err(|_| Error::LockPoisoned)?
                .track_create(entity),
            None => Ok(()),
        }
    }

    /// Reports an update to an entity
    ///
    /// # Errors
    ///
    /// See [`track_create`](#method.track_create).
    pub fn track_update(&self, entity: &dyn Entity) -> Result<(), Error> {
        match &self.tracker {
            Some(tracker) => tracker
                .lock()
                .map_err(|_| Error::LockPoisoned)?
                .track_update(entity),
            None => Ok(()),
        }
    }

    /// Reports the deletion of an entity by typename and id
    ///
    /// # Errors
    ///
    /// See [`track_create`](#method.track_create).
    pub fn track_delete(&self, typename: &str, id: &str) -> Result<(), Error> {
        match &self.tracker {
            Some(tracker) => tracker
                .lock()
                .map_err(|_| Error::LockPoisoned)?
                .track_delete(typename, id),
            None => Ok(()),
        }
    }
}

impl EventSink for CascadeContext {
    fn apply(&self, event: EntityEvent) -> Result<(), Error> {
        match event {
            EntityEvent::Created(e) => self.track_create(e),
            EntityEvent::Updated(e) => self.track_update(e),
            EntityEvent::Deleted { typename, id } => self.track_delete(typename, id),
        }
    }
}

/// The outcome of intercepting one mutation field
pub enum Intercepted {
    /// The field has no `@cascade` directive; the resolver outcome passes through
    /// untouched
    Passthrough(Result<PrimaryResult, CascadeError>),

    /// The field was tracked; the mutation payload is replaced by a cascade response
    Cascade(Box<CascadeResponse>),
}

impl Intercepted {
    /// Returns the cascade response, if the field was tracked
    pub fn response(&self) -> Option<&CascadeResponse> {
        match self {
            Intercepted::Cascade(response) => Some(response),
            Intercepted::Passthrough(_) => None,
        }
    }
}

/// Builder for a [`CascadeMiddleware`]
///
/// [`CascadeMiddleware`]: struct.CascadeMiddleware.html
#[derive(Clone, Debug)]
pub struct CascadeMiddlewareBuilder {
    config: CascadeConfig,
    sdl: Option<String>,
}

impl CascadeMiddlewareBuilder {
    /// Adds the schema document whose `@cascade` and `@cascadeInvalidates` directives
    /// drive interception and invalidation rules. The document is scanned once, at
    /// `build`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use graphql_cascade::engine::CascadeMiddleware;
    /// use graphql_cascade::CascadeConfig;
    ///
    /// let sdl = "
    /// type Mutation {
    ///   createUser(name: String!): User @cascade
    /// }
    /// type User { id: ID! }
    /// ";
    ///
    /// let middleware = CascadeMiddleware::new(CascadeConfig::default())
    ///     .with_schema(sdl)
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn with_schema(mut self, sdl: &str) -> CascadeMiddlewareBuilder {
        self.sdl = Some(sdl.to_string());
        self
    }

    /// Validates the configuration, scans the schema, and builds the middleware
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the configuration fails validation or the schema document
    /// cannot be parsed.
    ///
    /// [`Error`]: ../enum.Error.html
    pub fn build(self) -> Result<CascadeMiddleware, Error> {
        self.config.validate()?;

        let schema = match &self.sdl {
            Some(sdl) => CascadeSchema::parse(sdl)?,
            None => CascadeSchema::empty(),
        };
        let planner = InvalidationPlanner::with_rules(schema.rules().clone());

        Ok(CascadeMiddleware {
            config: self.config,
            schema,
            planner,
        })
    }
}

/// GraphQL middleware that wraps mutation resolvers with cascade tracking.
///
/// The middleware holds no per-request state: the schema-derived directive tables and
/// the planner's rule cache are built once and read-only afterwards, so one middleware
/// serves any number of concurrent mutations, each with its own tracker.
///
/// # Examples
///
/// ```rust
/// use graphql_cascade::engine::{CascadeMiddleware, PrimaryResult};
/// use graphql_cascade::CascadeConfig;
///
/// let middleware = CascadeMiddleware::new(CascadeConfig::default())
///     .build()
///     .unwrap();
///
/// // Without a schema no field carries @cascade, so execution passes through.
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let outcome = middleware
///     .intercept("createUser", |_ctx| async { Ok(PrimaryResult::None) })
///     .await
///     .unwrap();
/// assert!(outcome.response().is_none());
/// # });
/// ```
#[derive(Clone, Debug)]
pub struct CascadeMiddleware {
    config: CascadeConfig,
    schema: CascadeSchema,
    planner: InvalidationPlanner,
}

impl CascadeMiddleware {
    /// Creates a new middleware builder over a configuration
    #[allow(clippy::new_ret_no_self)]
    pub fn new(config: CascadeConfig) -> CascadeMiddlewareBuilder {
        CascadeMiddlewareBuilder { config, sdl: None }
    }

    /// Wraps the execution of one mutation field.
    ///
    /// When the field carries no `@cascade` directive the resolver runs with a disabled
    /// context and its outcome passes through untouched. Otherwise the middleware opens a
    /// transaction, hands the resolver an active [`CascadeContext`], and converts the
    /// outcome into a [`CascadeResponse`]: the success path plans invalidations (unless
    /// `autoInvalidate` is off for the field), the failure path carries the resolver's
    /// error and an empty cascade. If the returned future is dropped before completion,
    /// the transaction is aborted.
    ///
    /// [`CascadeContext`]: struct.CascadeContext.html
    /// [`CascadeResponse`]: response/struct.CascadeResponse.html
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] only for engine-internal failures, such as a poisoned
    /// tracker lock. Resolver failures never surface here; they become error responses.
    ///
    /// [`Error`]: ../enum.Error.html
    #[tracing::instrument(name = "cascade-intercept", skip(self, execute))]
    pub async fn intercept<F, Fut>(&self, field_name: &str, execute: F) -> Result<Intercepted, Error>
    where
        F: FnOnce(CascadeContext) -> Fut,
        Fut: Future<Output = Result<PrimaryResult, CascadeError>>,
    {
        let directive = match self.schema.cascade_directive(field_name) {
            Some(directive) => directive,
            None => {
                trace!("No @cascade directive on {}; bypassing", field_name);
                let outcome = execute(CascadeContext::disabled()).await;
                return Ok(Intercepted::Passthrough(outcome));
            }
        };

        let auto_invalidate = directive
            .auto_invalidate()
            .unwrap_or_else(|| self.config.auto_invalidate());

        let shared = Arc::new(Mutex::new(self.tracker_for(directive)));
        shared
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .begin()?;

        let abort_guard = AbortOnDrop {
            tracker: Arc::clone(&shared),
            armed: true,
        };

        let outcome = execute(CascadeContext::active(Arc::clone(&shared))).await;

        let mut tracker = shared.lock().map_err(|_| Error::LockPoisoned)?;
        let builder = ResponseBuilder::from_config(&self.config);
        let response = match outcome {
            Ok(primary) => {
                let builder = if auto_invalidate {
                    builder.with_planner(&self.planner)
                } else {
                    builder
                };
                let key = primary.key();
                let data = primary.data();
                builder.build(&mut tracker, key.as_ref(), data)?
            }
            Err(error) => builder.build_error(&mut tracker, vec![error]),
        };
        drop(tracker);
        abort_guard.disarm();

        Ok(Intercepted::Cascade(Box::new(response)))
    }

    // Directive arguments override the engine configuration per field; absent arguments
    // fall back to the configured defaults.
    fn tracker_for(&self, directive: &CascadeDirective) -> CascadeTracker {
        let mut tracker = CascadeTracker::from_config(&self.config);
        if let Some(max_depth) = directive.max_depth() {
            tracker = tracker.with_max_depth(max_depth);
        }
        if let Some(include_related) = directive.include_related() {
            tracker = tracker.with_include_related(include_related);
        }
        if let Some(exclude_types) = directive.exclude_types() {
            tracker = tracker.with_exclude_types(exclude_types.iter().cloned());
        }
        tracker
    }
}

// Releases the transaction when an intercept future is dropped mid-flight, such as on a
// host request deadline.
struct AbortOnDrop {
    tracker: Arc<Mutex<CascadeTracker>>,
    armed: bool,
}

impl AbortOnDrop {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if self.armed {
            if let Ok(mut tracker) = self.tracker.lock() {
                if tracker.in_progress() {
                    warn!("Cascade intercept cancelled; aborting transaction");
                    tracker.abort();
                }
            }
        }
    }
}
