//! This module provides the entity event seam between data layers and the cascade
//! tracker. An ORM hook, database trigger relay, or resolver reports each commit as an
//! [`EntityEvent`] to an [`EventSink`]; the order of events must mirror the order of
//! data-layer commits.

use crate::engine::entity::Entity;
use crate::Error;

/// A single change emitted by the entity event source
pub enum EntityEvent<'a> {
    /// An entity was created
    Created(&'a dyn Entity),

    /// An entity was updated
    Updated(&'a dyn Entity),

    /// An entity was deleted; only its cascade key survives
    Deleted {
        /// GraphQL object type name of the deleted entity
        typename: &'a str,
        /// Id of the deleted entity
        id: &'a str,
    },
}

/// Receives entity events from a data layer. Implemented by the cascade context handed
/// to resolvers; adapters for specific ORMs are written against this trait so they stay
/// independent of the tracker's lifecycle.
///
/// Reporting the same change twice is safe: the tracker merges repeated operations for
/// one cascade key.
pub trait EventSink {
    /// Applies one entity event
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the event cannot be recorded, such as when no transaction
    /// is in progress.
    ///
    /// [`Error`]: ../../enum.Error.html
    fn apply(&self, event: EntityEvent) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::{EntityEvent, EventSink};
    use crate::engine::entity::{Entity, FieldValue};
    use crate::Error;
    use std::cell::RefCell;

    struct Recorder {
        seen: RefCell<Vec<String>>,
    }

    impl EventSink for Recorder {
        fn apply(&self, event: EntityEvent) -> Result<(), Error> {
            let line = match event {
                EntityEvent::Created(e) => format!("created {}", e.typename()),
                EntityEvent::Updated(e) => format!("updated {}", e.typename()),
                EntityEvent::Deleted { typename, id } => format!("deleted {}:{}", typename, id),
            };
            self.seen.borrow_mut().push(line);
            Ok(())
        }
    }

    struct Stub;

    impl Entity for Stub {
        fn typename(&self) -> &str {
            "Stub"
        }

        fn id(&self) -> Option<String> {
            Some("1".to_string())
        }

        fn fields(&self) -> Vec<(String, FieldValue<'_>)> {
            vec![]
        }
    }

    /// Passes if events arrive at a sink in emission order
    #[test]
    fn sink_receives_events_in_order() {
        let recorder = Recorder {
            seen: RefCell::new(vec![]),
        };
        let stub = Stub;

        recorder.apply(EntityEvent::Created(&stub)).unwrap();
        recorder
            .apply(EntityEvent::Deleted {
                typename: "Stub",
                id: "2",
            })
            .unwrap();

        assert_eq!(
            vec!["created Stub".to_string(), "deleted Stub:2".to_string()],
            *recorder.seen.borrow()
        );
    }
}
