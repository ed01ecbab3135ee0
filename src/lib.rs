//! GraphQL Cascade augments mutation responses with a machine-readable record of every
//! entity the mutation changed, plus cache invalidation hints for queries that may now
//! be stale. Client caches consume the cascade payload to update themselves
//! automatically, replacing hand-written refetch lists and update callbacks.
//!
//! The engine tracks entity creations, updates, and deletions during one mutation,
//! follows relationships out to a bounded depth, derives a deduplicated and prioritized
//! invalidation list, and assembles the final response under strict size bounds. Bind it
//! to a GraphQL runtime through [`CascadeMiddleware`], which intercepts mutation fields
//! carrying the `@cascade` schema directive.
//!
//! [`CascadeMiddleware`]: ./engine/struct.CascadeMiddleware.html

#![doc(html_root_url = "https://docs.rs/graphql-cascade/0.1.0")]

pub use engine::config::CascadeConfig;
pub use engine::entity::Entity;
pub use engine::response::{CascadeError, CascadeResponse};
pub use engine::tracker::CascadeTracker;
pub use engine::CascadeMiddleware;
pub use error::Error;

pub mod engine;
mod error;
