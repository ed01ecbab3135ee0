//! This module provides the one-time schema scan that builds the directive tables: which
//! mutation fields carry `@cascade`, with which overrides, and which type fields carry
//! `@cascadeInvalidates` rules. The tables are built at startup and read-only afterwards.

use crate::engine::invalidation::{InvalidationRule, RuleTable, Scope, Strategy};
use crate::Error;
use graphql_parser::schema::{Definition, Directive, TypeDefinition, Value as SchemaValue};
use log::{debug, trace};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Arguments of a `@cascade` directive on one mutation field. Absent arguments fall back
/// to the engine configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CascadeDirective {
    max_depth: Option<usize>,
    include_related: Option<bool>,
    auto_invalidate: Option<bool>,
    exclude_types: Option<Vec<String>>,
}

impl CascadeDirective {
    /// Returns the `maxDepth` override, if given
    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    /// Returns the `includeRelated` override, if given
    pub fn include_related(&self) -> Option<bool> {
        self.include_related
    }

    /// Returns the `autoInvalidate` override, if given
    pub fn auto_invalidate(&self) -> Option<bool> {
        self.auto_invalidate
    }

    /// Returns the `excludeTypes` override, if given
    pub fn exclude_types(&self) -> Option<&[String]> {
        self.exclude_types.as_deref()
    }
}

/// The directive tables extracted from a schema document
///
/// # Examples
///
/// ```rust
/// use graphql_cascade::engine::schema::CascadeSchema;
///
/// let sdl = "
/// type Mutation {
///   createUser(name: String!): User @cascade(maxDepth: 2)
/// }
/// type User {
///   id: ID!
///   name: String
/// }
/// ";
///
/// let schema = CascadeSchema::parse(sdl).unwrap();
/// assert!(schema.cascade_directive("createUser").is_some());
/// assert!(schema.cascade_directive("deleteUser").is_none());
/// ```
#[derive(Clone, Debug, Default)]
pub struct CascadeSchema {
    cascade_fields: BTreeMap<String, CascadeDirective>,
    rules: RuleTable,
}

impl CascadeSchema {
    /// Creates an empty schema: no field is intercepted and the rule table is empty
    pub fn empty() -> CascadeSchema {
        CascadeSchema::default()
    }

    /// Scans a schema document for cascade directives
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] variant [`SchemaParseFailed`] if the document is not valid
    /// SDL, [`DirectiveArgumentNotParsed`] if a directive argument has the wrong shape,
    /// or [`InvalidationRuleInvalid`] if a `@cascadeInvalidates` directive does not carry
    /// exactly one of `query` and `queryPattern`.
    ///
    /// [`Error`]: ../../enum.Error.html
    /// [`SchemaParseFailed`]: ../../enum.Error.html#variant.SchemaParseFailed
    /// [`DirectiveArgumentNotParsed`]: ../../enum.Error.html#variant.DirectiveArgumentNotParsed
    /// [`InvalidationRuleInvalid`]: ../../enum.Error.html#variant.InvalidationRuleInvalid
    pub fn parse(sdl: &str) -> Result<CascadeSchema, Error> {
        let document = graphql_parser::parse_schema::<String>(sdl)?;

        let mut cascade_fields = BTreeMap::new();
        let mut rules = RuleTable::new();

        for definition in &document.definitions {
            let object = match definition {
                Definition::TypeDefinition(TypeDefinition::Object(object)) => object,
                _ => continue,
            };

            if object.name == "Mutation" {
                for field in &object.fields {
                    if let Some(directive) =
                        field.directives.iter().find(|d| d.name == "cascade")
                    {
                        trace!("Found @cascade on mutation field {}", field.name);
                        cascade_fields
                            .insert(field.name.clone(), parse_cascade_directive(directive)?);
                    }
                }
                continue;
            }

            for field in &object.fields {
                for directive in field
                    .directives
                    .iter()
                    .filter(|d| d.name == "cascadeInvalidates")
                {
                    trace!(
                        "Found @cascadeInvalidates on {}.{}",
                        object.name,
                        field.name
                    );
                    let rule = parse_invalidation_rule(&object.name, &field.name, directive)?;
                    rules
                        .entry(object.name.clone())
                        .or_insert_with(BTreeMap::new)
                        .entry(field.name.clone())
                        .or_insert_with(Vec::new)
                        .push(rule);
                }
            }
        }

        debug!(
            "Schema scan found {} cascade fields and rules for {} types",
            cascade_fields.len(),
            rules.len()
        );

        Ok(CascadeSchema {
            cascade_fields,
            rules,
        })
    }

    /// Returns the `@cascade` directive for a mutation field, if the field carries one
    pub fn cascade_directive(&self, field_name: &str) -> Option<&CascadeDirective> {
        self.cascade_fields.get(field_name)
    }

    /// Returns the `@cascadeInvalidates` rule table, keyed by typename and field name
    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }
}

fn parse_cascade_directive(directive: &Directive<String>) -> Result<CascadeDirective, Error> {
    let mut parsed = CascadeDirective::default();

    for (name, value) in &directive.arguments {
        match name.as_str() {
            "maxDepth" => {
                let depth = match value {
                    SchemaValue::Int(n) => n.as_i64().and_then(|v| usize::try_from(v).ok()),
                    _ => None,
                };
                parsed.max_depth = Some(depth.ok_or_else(|| argument_error("cascade", name))?);
            }
            "includeRelated" => {
                parsed.include_related = Some(boolean_argument("cascade", name, value)?);
            }
            "autoInvalidate" => {
                parsed.auto_invalidate = Some(boolean_argument("cascade", name, value)?);
            }
            "excludeTypes" => {
                let types = match value {
                    SchemaValue::List(items) => items
                        .iter()
                        .map(|item| match item {
                            SchemaValue::String(s) => Some(s.clone()),
                            _ => None,
                        })
                        .collect::<Option<Vec<String>>>(),
                    _ => None,
                };
                parsed.exclude_types = Some(types.ok_or_else(|| argument_error("cascade", name))?);
            }
            _ => return Err(argument_error("cascade", name)),
        }
    }

    Ok(parsed)
}

fn parse_invalidation_rule(
    type_name: &str,
    field_name: &str,
    directive: &Directive<String>,
) -> Result<InvalidationRule, Error> {
    let mut query_name = None;
    let mut query_pattern = None;
    let mut strategy = Strategy::Invalidate;
    let mut scope = Scope::Prefix;
    let mut arguments = None;

    for (name, value) in &directive.arguments {
        match name.as_str() {
            "query" => {
                query_name = Some(string_argument("cascadeInvalidates", name, value)?);
            }
            "queryPattern" => {
                query_pattern = Some(string_argument("cascadeInvalidates", name, value)?);
            }
            "strategy" => {
                strategy = match enum_argument("cascadeInvalidates", name, value)?.as_str() {
                    "INVALIDATE" => Strategy::Invalidate,
                    "REFETCH" => Strategy::Refetch,
                    "REMOVE" => Strategy::Remove,
                    _ => return Err(argument_error("cascadeInvalidates", name)),
                };
            }
            "scope" => {
                scope = match enum_argument("cascadeInvalidates", name, value)?.as_str() {
                    "EXACT" => Scope::Exact,
                    "PREFIX" => Scope::Prefix,
                    "PATTERN" => Scope::Pattern,
                    "ALL" => Scope::All,
                    _ => return Err(argument_error("cascadeInvalidates", name)),
                };
            }
            "arguments" => match value {
                SchemaValue::Object(map) => {
                    let mut json = Map::new();
                    for (key, member) in map {
                        json.insert(key.clone(), value_to_json(member));
                    }
                    arguments = Some(json);
                }
                _ => return Err(argument_error("cascadeInvalidates", name)),
            },
            _ => return Err(argument_error("cascadeInvalidates", name)),
        }
    }

    if query_name.is_some() == query_pattern.is_some() {
        return Err(Error::InvalidationRuleInvalid {
            type_name: type_name.to_string(),
            field_name: field_name.to_string(),
        });
    }

    Ok(InvalidationRule {
        query_name,
        query_pattern,
        strategy,
        scope,
        arguments,
    })
}

fn boolean_argument(
    directive: &str,
    argument: &str,
    value: &SchemaValue<String>,
) -> Result<bool, Error> {
    match value {
        SchemaValue::Boolean(b) => Ok(*b),
        _ => Err(argument_error(directive, argument)),
    }
}

fn string_argument(
    directive: &str,
    argument: &str,
    value: &SchemaValue<String>,
) -> Result<String, Error> {
    match value {
        SchemaValue::String(s) => Ok(s.clone()),
        _ => Err(argument_error(directive, argument)),
    }
}

// Enum literals are the idiomatic SDL form, but string literals are accepted too since
// hand-written schemas often quote them.
fn enum_argument(
    directive: &str,
    argument: &str,
    value: &SchemaValue<String>,
) -> Result<String, Error> {
    match value {
        SchemaValue::Enum(e) => Ok(e.clone()),
        SchemaValue::String(s) => Ok(s.clone()),
        _ => Err(argument_error(directive, argument)),
    }
}

fn value_to_json(value: &SchemaValue<String>) -> Value {
    match value {
        SchemaValue::Variable(v) => serde_json::json!({ "$variable": v }),
        SchemaValue::Int(n) => Value::from(n.as_i64()),
        SchemaValue::Float(f) => serde_json::json!(f),
        SchemaValue::String(s) => Value::String(s.clone()),
        SchemaValue::Boolean(b) => Value::Bool(*b),
        SchemaValue::Null => Value::Null,
        SchemaValue::Enum(e) => Value::String(e.clone()),
        SchemaValue::List(items) => Value::Array(items.iter().map(value_to_json).collect()),
        SchemaValue::Object(map) => {
            let mut json = Map::new();
            for (key, member) in map {
                json.insert(key.clone(), value_to_json(member));
            }
            Value::Object(json)
        }
    }
}

fn argument_error(directive: &str, argument: &str) -> Error {
    Error::DirectiveArgumentNotParsed {
        directive: directive.to_string(),
        argument: argument.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::CascadeSchema;
    use crate::engine::invalidation::{Scope, Strategy};
    use crate::Error;

    const SDL: &str = "
    type Mutation {
      createUser(name: String!): User @cascade(maxDepth: 2, excludeTypes: [\"AuditLog\"])
      updateTodo(id: ID!): Todo @cascade
      plainMutation: Boolean
    }

    type User {
      id: ID!
      name: String
    }

    type Todo {
      id: ID!
      status: String @cascadeInvalidates(query: \"openTodoCount\", strategy: REMOVE, scope: ALL, arguments: {priority: 1})
      title: String @cascadeInvalidates(queryPattern: \"todoSearch*\")
    }
    ";

    /// Passes if mutation fields with the directive are found and others bypass
    #[test]
    fn cascade_fields_detected() {
        let schema = CascadeSchema::parse(SDL).unwrap();

        let create = schema.cascade_directive("createUser").unwrap();
        assert_eq!(Some(2), create.max_depth());
        assert_eq!(Some(&["AuditLog".to_string()][..]), create.exclude_types());

        let update = schema.cascade_directive("updateTodo").unwrap();
        assert_eq!(None, update.max_depth());

        assert!(schema.cascade_directive("plainMutation").is_none());
    }

    /// Passes if invalidation rules carry their arguments and defaults
    #[test]
    fn invalidation_rules_built() {
        let schema = CascadeSchema::parse(SDL).unwrap();
        let todo_rules = schema.rules().get("Todo").unwrap();

        let status = &todo_rules.get("status").unwrap()[0];
        assert_eq!(Some("openTodoCount".to_string()), status.query_name);
        assert_eq!(Strategy::Remove, status.strategy);
        assert_eq!(Scope::All, status.scope);
        assert_eq!(
            serde_json::json!(1),
            status.arguments.as_ref().unwrap()["priority"]
        );

        let title = &todo_rules.get("title").unwrap()[0];
        assert_eq!(Some("todoSearch*".to_string()), title.query_pattern);
        assert_eq!(Strategy::Invalidate, title.strategy);
        assert_eq!(Scope::Prefix, title.scope);
    }

    /// Passes if a rule with both selectors, or neither, is rejected
    #[test]
    fn rule_requires_exactly_one_selector() {
        let both = "
        type Todo {
          status: String @cascadeInvalidates(query: \"a\", queryPattern: \"b*\")
        }
        ";
        assert!(matches!(
            CascadeSchema::parse(both),
            Err(Error::InvalidationRuleInvalid { .. })
        ));

        let neither = "
        type Todo {
          status: String @cascadeInvalidates(strategy: REFETCH)
        }
        ";
        assert!(matches!(
            CascadeSchema::parse(neither),
            Err(Error::InvalidationRuleInvalid { .. })
        ));
    }

    /// Passes if a malformed directive argument is rejected at startup
    #[test]
    fn malformed_argument_is_rejected() {
        let sdl = "
        type Mutation {
          createUser: User @cascade(maxDepth: \"deep\")
        }
        ";
        assert!(matches!(
            CascadeSchema::parse(sdl),
            Err(Error::DirectiveArgumentNotParsed { .. })
        ));
    }

    /// Passes if an empty schema intercepts nothing
    #[test]
    fn empty_schema() {
        let schema = CascadeSchema::empty();
        assert!(schema.cascade_directive("createUser").is_none());
        assert!(schema.rules().is_empty());
    }
}
