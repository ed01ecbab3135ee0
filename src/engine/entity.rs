//! This module provides the entity capability consumed by the cascade tracker: cascade
//! keys, entity-vs-scalar classification, and snapshot serialization.
//!
//! Domain types are bridged to the tracker through the [`Entity`] trait. Typed adapters
//! are preferred; [`DynamicEntity`] is the reflection fallback for event sources that
//! emit JSON-shaped rows.

use crate::Error;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// The capability an object must expose to participate in a cascade. The pair
/// `(typename, id)` is the entity's cascade key and must be stable for the lifetime of
/// the mutation.
///
/// # Examples
///
/// ```rust
/// use graphql_cascade::engine::entity::{Entity, FieldValue};
///
/// struct User {
///     id: String,
///     name: String,
/// }
///
/// impl Entity for User {
///     fn typename(&self) -> &str {
///         "User"
///     }
///
///     fn id(&self) -> Option<String> {
///         Some(self.id.clone())
///     }
///
///     fn fields(&self) -> Vec<(String, FieldValue<'_>)> {
///         vec![
///             ("id".to_string(), FieldValue::Scalar(self.id.clone().into())),
///             ("name".to_string(), FieldValue::Scalar(self.name.clone().into())),
///         ]
///     }
/// }
/// ```
pub trait Entity {
    /// Returns the stable GraphQL object type name for this entity
    fn typename(&self) -> &str;

    /// Returns the entity's id, unique within its typename. An entity that returns [`None`]
    /// is unrepresentable and the tracker rejects it with
    /// [`Error::EntityUnrepresentable`].
    ///
    /// [`Error::EntityUnrepresentable`]: ../../enum.Error.html#variant.EntityUnrepresentable
    fn id(&self) -> Option<String>;

    /// Returns the entity's fields as name/value pairs, classified by [`FieldValue`].
    /// Field order is preserved in serialized snapshots.
    fn fields(&self) -> Vec<(String, FieldValue<'_>)>;

    /// Returns the entities related to this one, used by the relationship walker to
    /// discover transitively affected entities.
    ///
    /// The default implementation reflects over [`fields`]: every entity-valued field is a
    /// neighbor, every entity element of a list field is a neighbor, and everything else is
    /// ignored. Implementations with an explicit notion of related entities should
    /// override this; the override takes precedence over reflection.
    ///
    /// [`fields`]: #tymethod.fields
    fn relations(&self) -> Vec<&dyn Entity> {
        let mut related = Vec::new();
        for (_, value) in self.fields() {
            match value {
                FieldValue::Entity(e) => related.push(e),
                FieldValue::List(items) => {
                    for item in items {
                        if let FieldValue::Entity(e) = item {
                            related.push(e);
                        }
                    }
                }
                _ => {}
            }
        }
        related
    }
}

/// Classification of a single entity field value. Scalars and containers are serialized
/// in place; nested entities are replaced by `{__typename, id}` reference stubs, which
/// bounds the size of every snapshot.
pub enum FieldValue<'a> {
    /// An explicit null
    Null,

    /// A JSON-compatible scalar, list, or mapping that contains no entities
    Scalar(Value),

    /// A point in time, emitted as an ISO-8601 UTC string
    DateTime(DateTime<Utc>),

    /// A nested entity, emitted as a reference stub
    Entity(&'a dyn Entity),

    /// A list of values, each classified independently
    List(Vec<FieldValue<'a>>),

    /// A mapping of values, each classified independently
    Map(BTreeMap<String, FieldValue<'a>>),
}

impl FieldValue<'_> {
    /// Returns true iff the value is an entity: it has both a typename and an id and is
    /// neither a primitive nor a container. Containers are traversed, not treated as
    /// entities.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use graphql_cascade::engine::entity::FieldValue;
    ///
    /// assert!(!FieldValue::Scalar(serde_json::json!(42)).is_entity());
    /// ```
    pub fn is_entity(&self) -> bool {
        matches!(self, FieldValue::Entity(_))
    }
}

/// Uniquely identifies an entity instance within one cascade. Hashing and equality are
/// on the `(typename, id)` pair, never on object identity, so keys remain stable across
/// ORM sessions.
///
/// # Examples
///
/// ```rust
/// use graphql_cascade::engine::entity::EntityKey;
///
/// let k = EntityKey::new("User", "1");
/// assert_eq!("User:1", format!("{}", k));
/// ```
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct EntityKey {
    typename: String,
    id: String,
}

impl EntityKey {
    /// Creates a new cascade key from a typename and an id
    pub fn new(typename: &str, id: &str) -> EntityKey {
        EntityKey {
            typename: typename.to_string(),
            id: id.to_string(),
        }
    }

    /// Returns the typename half of the key
    pub fn typename(&self) -> &str {
        &self.typename
    }

    /// Returns the id half of the key
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.typename, self.id)
    }
}

/// Produces the cascade key for an entity
///
/// # Errors
///
/// Returns an [`Error`] variant [`EntityUnrepresentable`] if the entity exposes no id.
///
/// [`Error`]: ../../enum.Error.html
/// [`EntityUnrepresentable`]: ../../enum.Error.html#variant.EntityUnrepresentable
pub fn entity_key(entity: &dyn Entity) -> Result<EntityKey, Error> {
    let id = entity.id().ok_or_else(|| Error::EntityUnrepresentable {
        type_name: entity.typename().to_string(),
    })?;
    Ok(EntityKey::new(entity.typename(), &id))
}

/// Serializes an entity to a snapshot mapping of field name to JSON value. Datetimes are
/// emitted as ISO-8601 UTC strings. Nested entities, at any depth inside lists and
/// mappings, are replaced by `{__typename, id}` reference stubs rather than expanded.
///
/// # Errors
///
/// Returns an [`Error`] variant [`EntityUnrepresentable`] if a nested entity exposes no
/// id, since the reference stub cannot be formed.
///
/// [`Error`]: ../../enum.Error.html
/// [`EntityUnrepresentable`]: ../../enum.Error.html#variant.EntityUnrepresentable
pub fn serialize(entity: &dyn Entity) -> Result<Map<String, Value>, Error> {
    let mut snapshot = Map::new();
    for (name, value) in entity.fields() {
        snapshot.insert(name, serialize_field(&value)?);
    }
    Ok(snapshot)
}

fn serialize_field(value: &FieldValue) -> Result<Value, Error> {
    match value {
        FieldValue::Null => Ok(Value::Null),
        FieldValue::Scalar(v) => Ok(v.clone()),
        FieldValue::DateTime(dt) => Ok(Value::String(dt.to_rfc3339())),
        FieldValue::Entity(e) => reference_stub(*e),
        FieldValue::List(items) => Ok(Value::Array(
            items
                .iter()
                .map(serialize_field)
                .collect::<Result<Vec<Value>, Error>>()?,
        )),
        FieldValue::Map(m) => {
            let mut map = Map::new();
            for (k, v) in m {
                map.insert(k.to_string(), serialize_field(v)?);
            }
            Ok(Value::Object(map))
        }
    }
}

fn reference_stub(entity: &dyn Entity) -> Result<Value, Error> {
    let key = entity_key(entity)?;
    let mut stub = Map::new();
    stub.insert(
        "__typename".to_string(),
        Value::String(key.typename().to_string()),
    );
    stub.insert("id".to_string(), Value::String(key.id().to_string()));
    Ok(Value::Object(stub))
}

/// Reflection fallback bridging JSON-shaped rows to the [`Entity`] capability. The
/// typename is read from a `__typename` member and the id from an `id` member; nested
/// objects that are themselves entity-shaped become relations.
///
/// # Examples
///
/// ```rust
/// use graphql_cascade::engine::entity::{DynamicEntity, Entity};
/// use serde_json::json;
///
/// let row = json!({"__typename": "Todo", "id": "5", "title": "water the plants"});
/// let entity = DynamicEntity::from_value(&row).expect("entity-shaped value");
///
/// assert_eq!("Todo", entity.typename());
/// assert_eq!(Some("5".to_string()), entity.id());
/// ```
pub struct DynamicEntity {
    typename: String,
    id: Option<String>,
    scalars: Map<String, Value>,
    children: BTreeMap<String, DynamicEntity>,
    child_lists: BTreeMap<String, Vec<DynamicEntity>>,
}

impl DynamicEntity {
    /// Interprets a JSON value as an entity. Returns [`None`] unless the value is an
    /// object carrying a string `__typename` member.
    pub fn from_value(value: &Value) -> Option<DynamicEntity> {
        let object = value.as_object()?;
        let typename = object.get("__typename")?.as_str()?.to_string();
        let id = object.get("id").and_then(id_string);

        let mut scalars = Map::new();
        let mut children = BTreeMap::new();
        let mut child_lists = BTreeMap::new();

        for (name, member) in object {
            if name == "__typename" {
                continue;
            }
            if let Some(child) = DynamicEntity::from_value(member) {
                children.insert(name.to_string(), child);
            } else if let Some(items) = member.as_array() {
                let entities: Vec<DynamicEntity> =
                    items.iter().filter_map(DynamicEntity::from_value).collect();
                if entities.is_empty() {
                    scalars.insert(name.to_string(), member.clone());
                } else {
                    child_lists.insert(name.to_string(), entities);
                }
            } else {
                scalars.insert(name.to_string(), member.clone());
            }
        }

        Some(DynamicEntity {
            typename,
            id,
            scalars,
            children,
            child_lists,
        })
    }
}

impl Entity for DynamicEntity {
    fn typename(&self) -> &str {
        &self.typename
    }

    fn id(&self) -> Option<String> {
        self.id.clone()
    }

    fn fields(&self) -> Vec<(String, FieldValue<'_>)> {
        let mut fields: Vec<(String, FieldValue)> = Vec::new();
        for (name, value) in &self.scalars {
            fields.push((name.to_string(), FieldValue::Scalar(value.clone())));
        }
        for (name, child) in &self.children {
            fields.push((name.to_string(), FieldValue::Entity(child)));
        }
        for (name, list) in &self.child_lists {
            fields.push((
                name.to_string(),
                FieldValue::List(
                    list.iter()
                        .map(|child| FieldValue::Entity(child as &dyn Entity))
                        .collect(),
                ),
            ));
        }
        fields
    }
}

// Numeric ids are common in ORM rows, so both "1" and 1 yield the cascade id "1".
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{entity_key, serialize, DynamicEntity, Entity, EntityKey, FieldValue};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    struct Widget {
        id: Option<String>,
        part: Option<Box<Widget>>,
    }

    impl Entity for Widget {
        fn typename(&self) -> &str {
            "Widget"
        }

        fn id(&self) -> Option<String> {
            self.id.clone()
        }

        fn fields(&self) -> Vec<(String, FieldValue<'_>)> {
            let mut fields = vec![
                (
                    "id".to_string(),
                    match &self.id {
                        Some(id) => FieldValue::Scalar(json!(id)),
                        None => FieldValue::Null,
                    },
                ),
                (
                    "madeAt".to_string(),
                    FieldValue::DateTime(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
                ),
            ];
            if let Some(part) = &self.part {
                fields.push(("part".to_string(), FieldValue::Entity(part.as_ref())));
            }
            fields
        }
    }

    /// Passes if a key displays as typename:id
    #[test]
    fn key_display() {
        let k = EntityKey::new("User", "1");
        assert_eq!("User:1", format!("{}", k));
    }

    /// Passes if only the entity variant classifies as an entity
    #[test]
    fn field_value_classification() {
        assert!(!FieldValue::Null.is_entity());
        assert!(!FieldValue::Scalar(json!("a string")).is_entity());
        assert!(!FieldValue::Scalar(json!([1, 2, 3])).is_entity());
        assert!(!FieldValue::List(vec![]).is_entity());

        let w = Widget {
            id: Some("1".to_string()),
            part: None,
        };
        assert!(FieldValue::Entity(&w).is_entity());
    }

    /// Passes if an entity without an id is rejected
    #[test]
    fn missing_id_is_unrepresentable() {
        let w = Widget {
            id: None,
            part: None,
        };

        assert!(entity_key(&w).is_err());
    }

    /// Passes if nested entities serialize as reference stubs and datetimes as ISO-8601
    #[test]
    fn serialize_replaces_nested_entities_with_stubs() {
        let w = Widget {
            id: Some("1".to_string()),
            part: Some(Box::new(Widget {
                id: Some("2".to_string()),
                part: None,
            })),
        };

        let snapshot = serialize(&w).unwrap();

        assert_eq!(json!("1"), snapshot["id"]);
        assert_eq!(json!({"__typename": "Widget", "id": "2"}), snapshot["part"]);
        assert!(snapshot["madeAt"]
            .as_str()
            .unwrap()
            .starts_with("2024-05-01T12:00:00"));
    }

    /// Passes if the default relations reflect over entity-valued fields
    #[test]
    fn default_relations_from_fields() {
        let w = Widget {
            id: Some("1".to_string()),
            part: Some(Box::new(Widget {
                id: Some("2".to_string()),
                part: None,
            })),
        };

        let related = w.relations();
        assert_eq!(1, related.len());
        assert_eq!(Some("2".to_string()), related[0].id());
    }

    /// Passes if a JSON row round-trips through the dynamic adapter
    #[test]
    fn dynamic_entity_from_json_row() {
        let row = json!({
            "__typename": "Todo",
            "id": 5,
            "title": "water the plants",
            "owner": {"__typename": "User", "id": "1"},
            "tags": ["home", "plants"]
        });

        let entity = DynamicEntity::from_value(&row).unwrap();
        assert_eq!("Todo", entity.typename());
        assert_eq!(Some("5".to_string()), entity.id());

        let related = entity.relations();
        assert_eq!(1, related.len());
        assert_eq!("User", related[0].typename());

        let snapshot = serialize(&entity).unwrap();
        assert_eq!(json!("water the plants"), snapshot["title"]);
        assert_eq!(json!({"__typename": "User", "id": "1"}), snapshot["owner"]);
        assert_eq!(json!(["home", "plants"]), snapshot["tags"]);
    }

    /// Passes if a value without a typename is not treated as an entity
    #[test]
    fn dynamic_entity_requires_typename() {
        assert!(DynamicEntity::from_value(&json!({"id": "1"})).is_none());
        assert!(DynamicEntity::from_value(&json!("just a string")).is_none());
    }
}
