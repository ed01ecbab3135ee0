//! This module provides the invalidation planner, which converts tracked entity changes
//! plus schema-directive rules into a deduplicated, prioritized list of cache
//! invalidation hints for clients.

use crate::engine::entity::EntityKey;
use crate::engine::response::{DeletedRecord, UpdatedRecord};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

/// What the client should do with a matching cached query
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Strategy {
    /// Mark the cached query stale; the client refreshes it on next use
    #[serde(rename = "INVALIDATE")]
    Invalidate,

    /// Refetch the query immediately
    #[serde(rename = "REFETCH")]
    Refetch,

    /// Remove the cached query entirely
    #[serde(rename = "REMOVE")]
    Remove,
}

/// Specificity of an invalidation hint. More specific scopes sort first in the final
/// hint list, so clients can act on exact matches before broad sweeps.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Scope {
    /// A single query with specific arguments
    #[serde(rename = "EXACT")]
    Exact,

    /// All cached variants of a named query
    #[serde(rename = "PREFIX")]
    Prefix,

    /// Queries matching a glob-like pattern
    #[serde(rename = "PATTERN")]
    Pattern,

    /// Every cached query
    #[serde(rename = "ALL")]
    All,
}

impl Scope {
    /// Numeric specificity used for prioritization: EXACT=4, PREFIX=3, PATTERN=2, ALL=1
    pub fn priority(&self) -> u8 {
        match self {
            Scope::Exact => 4,
            Scope::Prefix => 3,
            Scope::Pattern => 2,
            Scope::All => 1,
        }
    }
}

/// A machine-readable instruction telling a client which cached query to invalidate,
/// refetch, or remove. Exactly one of `query_name` and `query_pattern` is set.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct InvalidationHint {
    /// Name of the affected query, for named hints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_name: Option<String>,

    /// Glob-like pattern over query names (`*` wildcard), for patterned hints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_pattern: Option<String>,

    /// What the client should do
    pub strategy: Strategy,

    /// How broadly the hint applies
    pub scope: Scope,

    /// Arguments narrowing the hint to specific cached entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Map<String, Value>>,
}

impl InvalidationHint {
    /// Creates a named hint
    pub fn named(query_name: String, strategy: Strategy, scope: Scope) -> InvalidationHint {
        InvalidationHint {
            query_name: Some(query_name),
            query_pattern: None,
            strategy,
            scope,
            arguments: None,
        }
    }

    /// Creates a patterned hint
    pub fn patterned(query_pattern: String, strategy: Strategy, scope: Scope) -> InvalidationHint {
        InvalidationHint {
            query_name: None,
            query_pattern: Some(query_pattern),
            strategy,
            scope,
            arguments: None,
        }
    }

    /// Attaches arguments to the hint
    pub fn with_arguments(mut self, arguments: Map<String, Value>) -> InvalidationHint {
        self.arguments = Some(arguments);
        self
    }

    // serde_json maps are ordered by key, so to_string yields a canonical form for
    // argument comparison.
    fn dedupe_key(&self) -> (Option<String>, Option<String>, Strategy, Scope, Option<String>) {
        (
            self.query_name.clone(),
            self.query_pattern.clone(),
            self.strategy,
            self.scope,
            self.arguments
                .as_ref()
                .and_then(|args| serde_json::to_string(args).ok()),
        )
    }
}

/// A single invalidation rule attached to a type field by the `@cascadeInvalidates`
/// schema directive
#[derive(Clone, Debug, PartialEq)]
pub struct InvalidationRule {
    /// Name of the query to invalidate, exclusive with `query_pattern`
    pub query_name: Option<String>,

    /// Pattern of queries to invalidate, exclusive with `query_name`
    pub query_pattern: Option<String>,

    /// Strategy for the emitted hint, defaulting to INVALIDATE
    pub strategy: Strategy,

    /// Scope for the emitted hint, defaulting to PREFIX
    pub scope: Scope,

    /// Arguments for the emitted hint
    pub arguments: Option<Map<String, Value>>,
}

impl InvalidationRule {
    fn to_hint(&self) -> InvalidationHint {
        InvalidationHint {
            query_name: self.query_name.clone(),
            query_pattern: self.query_pattern.clone(),
            strategy: self.strategy,
            scope: self.scope,
            arguments: self.arguments.clone(),
        }
    }
}

/// Schema-derived rules, keyed by typename and then by field name. Built once at
/// startup and read-only thereafter.
pub type RuleTable = BTreeMap<String, BTreeMap<String, Vec<InvalidationRule>>>;

/// Derives invalidation hints from a transaction's entity changes.
///
/// Hints come from three sources: type-derived defaults for every affected typename,
/// schema rules from `@cascadeInvalidates` directives, and a refetch hint for the
/// mutation's primary result. The combined list is deduplicated and sorted by scope
/// specificity.
///
/// The default query names use a naive `+"s"` plural (`listUsers`, and deliberately
/// `listCompanys`); the naming convention is part of the wire contract consumed by
/// client caches, so it never goes through an inflection library.
///
/// # Examples
///
/// ```rust
/// use graphql_cascade::engine::invalidation::InvalidationPlanner;
///
/// let planner = InvalidationPlanner::new();
/// let hints = planner.plan(&[], &[], None);
///
/// assert!(hints.is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InvalidationPlanner {
    rules: RuleTable,
}

impl InvalidationPlanner {
    /// Creates a planner with an empty rule table
    pub fn new() -> InvalidationPlanner {
        InvalidationPlanner {
            rules: RuleTable::new(),
        }
    }

    /// Creates a planner with a schema-derived rule table
    pub fn with_rules(rules: RuleTable) -> InvalidationPlanner {
        InvalidationPlanner { rules }
    }

    /// Computes the hint list for one transaction's changes. The result is
    /// deterministic: identical inputs yield an identical hint sequence.
    #[tracing::instrument(name = "cascade-plan-invalidations", skip(self, updated, deleted))]
    pub fn plan(
        &self,
        updated: &[UpdatedRecord],
        deleted: &[DeletedRecord],
        primary: Option<&EntityKey>,
    ) -> Vec<InvalidationHint> {
        let mut hints = Vec::new();

        // Affected typenames in first-seen record order keeps the output stable.
        let mut affected: IndexSet<&str> = IndexSet::new();
        for record in updated {
            affected.insert(record.typename.as_str());
        }
        for record in deleted {
            affected.insert(record.typename.as_str());
        }
        for typename in &affected {
            hints.extend(type_defaults(typename));
        }

        for record in updated {
            if let Some(fields) = self.rules.get(&record.typename) {
                for rules in fields.values() {
                    for rule in rules {
                        hints.push(rule.to_hint());
                    }
                }
            }
        }

        if let Some(key) = primary {
            let mut arguments = Map::new();
            arguments.insert("id".to_string(), Value::String(key.id().to_string()));
            hints.push(
                InvalidationHint::named(
                    format!("get{}", key.typename()),
                    Strategy::Refetch,
                    Scope::Exact,
                )
                .with_arguments(arguments),
            );
        }

        prioritize(dedupe(hints))
    }
}

fn type_defaults(typename: &str) -> Vec<InvalidationHint> {
    vec![
        InvalidationHint::named(
            format!("list{}s", typename),
            Strategy::Invalidate,
            Scope::Prefix,
        ),
        InvalidationHint::named(format!("get{}", typename), Strategy::Refetch, Scope::Exact),
        InvalidationHint::patterned(
            format!("search{}*", typename),
            Strategy::Invalidate,
            Scope::Pattern,
        ),
    ]
}

/// Removes duplicate hints, retaining the first occurrence. Two hints are duplicates iff
/// name, pattern, strategy, scope, and canonically serialized arguments are all equal.
pub fn dedupe(hints: Vec<InvalidationHint>) -> Vec<InvalidationHint> {
    let mut seen = HashSet::new();
    hints
        .into_iter()
        .filter(|hint| seen.insert(hint.dedupe_key()))
        .collect()
}

/// Sorts hints by descending scope specificity. The sort is stable, so hints with the
/// same scope keep their prior relative order.
pub fn prioritize(mut hints: Vec<InvalidationHint>) -> Vec<InvalidationHint> {
    hints.sort_by_key(|hint| std::cmp::Reverse(hint.scope.priority()));
    hints
}

#[cfg(test)]
mod tests {
    use super::{
        dedupe, prioritize, InvalidationHint, InvalidationPlanner, InvalidationRule, RuleTable,
        Scope, Strategy,
    };
    use crate::engine::change_log::Operation;
    use crate::engine::entity::EntityKey;
    use crate::engine::response::UpdatedRecord;
    use serde_json::Map;

    fn updated(typename: &str, id: &str) -> UpdatedRecord {
        UpdatedRecord::new(
            &EntityKey::new(typename, id),
            Operation::Updated,
            Map::new(),
        )
    }

    /// Passes if the three type defaults are emitted with EXACT first after sorting
    #[test]
    fn type_defaults_in_priority_order() {
        let planner = InvalidationPlanner::new();
        let hints = planner.plan(&[updated("User", "1")], &[], None);

        assert_eq!(3, hints.len());
        assert_eq!(Some("getUser".to_string()), hints[0].query_name);
        assert_eq!(Scope::Exact, hints[0].scope);
        assert_eq!(Some("listUsers".to_string()), hints[1].query_name);
        assert_eq!(Scope::Prefix, hints[1].scope);
        assert_eq!(Some("searchUser*".to_string()), hints[2].query_pattern);
        assert_eq!(Scope::Pattern, hints[2].scope);
    }

    /// Passes if pluralization stays naive, which is part of the wire contract
    #[test]
    fn plural_is_naive() {
        let planner = InvalidationPlanner::new();
        let hints = planner.plan(&[updated("Company", "1")], &[], None);

        assert!(hints
            .iter()
            .any(|h| h.query_name.as_deref() == Some("listCompanys")));
    }

    /// Passes if two entities of one type yield one set of defaults
    #[test]
    fn defaults_emitted_once_per_type() {
        let planner = InvalidationPlanner::new();
        let hints = planner.plan(&[updated("User", "1"), updated("User", "2")], &[], None);

        assert_eq!(3, hints.len());
    }

    /// Passes if the primary result contributes an exact refetch hint with id arguments
    #[test]
    fn primary_result_hint() {
        let planner = InvalidationPlanner::new();
        let primary = EntityKey::new("User", "1");
        let hints = planner.plan(&[updated("User", "1")], &[], Some(&primary));

        let with_args = hints
            .iter()
            .find(|h| h.arguments.is_some())
            .expect("primary hint present");
        assert_eq!(Some("getUser".to_string()), with_args.query_name);
        assert_eq!(Strategy::Refetch, with_args.strategy);
        assert_eq!(Scope::Exact, with_args.scope);
        assert_eq!(
            serde_json::json!("1"),
            with_args.arguments.as_ref().unwrap()["id"]
        );
    }

    /// Passes if schema rules fire for changed entities of the rule's type
    #[test]
    fn schema_rules_apply() {
        let rules: RuleTable = maplit::btreemap! {
            "Todo".to_string() => maplit::btreemap! {
                "status".to_string() => vec![InvalidationRule {
                    query_name: Some("openTodoCount".to_string()),
                    query_pattern: None,
                    strategy: Strategy::Invalidate,
                    scope: Scope::All,
                    arguments: None,
                }],
            },
        };

        let planner = InvalidationPlanner::with_rules(rules);
        let hints = planner.plan(&[updated("Todo", "5")], &[], None);

        let rule_hint = hints
            .iter()
            .find(|h| h.query_name.as_deref() == Some("openTodoCount"))
            .expect("rule hint present");
        assert_eq!(Scope::All, rule_hint.scope);
        // ALL is the least specific scope, so the rule hint sorts last.
        assert_eq!(
            Some("openTodoCount".to_string()),
            hints.last().unwrap().query_name
        );
    }

    /// Passes if dedupe keeps first occurrences and is idempotent
    #[test]
    fn dedupe_is_idempotent() {
        let hints = vec![
            InvalidationHint::named("getUser".to_string(), Strategy::Refetch, Scope::Exact),
            InvalidationHint::named("getUser".to_string(), Strategy::Refetch, Scope::Exact),
            InvalidationHint::named("listUsers".to_string(), Strategy::Invalidate, Scope::Prefix),
        ];

        let once = dedupe(hints);
        assert_eq!(2, once.len());

        let twice = dedupe(once.clone());
        assert_eq!(once, twice);
    }

    /// Passes if hints differing only in arguments are not duplicates
    #[test]
    fn arguments_distinguish_hints() {
        let mut args = Map::new();
        args.insert("id".to_string(), serde_json::json!("1"));

        let hints = vec![
            InvalidationHint::named("getUser".to_string(), Strategy::Refetch, Scope::Exact),
            InvalidationHint::named("getUser".to_string(), Strategy::Refetch, Scope::Exact)
                .with_arguments(args),
        ];

        assert_eq!(2, dedupe(hints).len());
    }

    /// Passes if prioritization is monotone in scope priority and stable within a scope
    #[test]
    fn priority_law() {
        let hints = vec![
            InvalidationHint::named("a".to_string(), Strategy::Invalidate, Scope::All),
            InvalidationHint::named("b".to_string(), Strategy::Invalidate, Scope::Prefix),
            InvalidationHint::named("c".to_string(), Strategy::Refetch, Scope::Exact),
            InvalidationHint::named("d".to_string(), Strategy::Invalidate, Scope::Prefix),
            InvalidationHint::patterned("e*".to_string(), Strategy::Invalidate, Scope::Pattern),
        ];

        let sorted = prioritize(hints);
        let priorities: Vec<u8> = sorted.iter().map(|h| h.scope.priority()).collect();
        let mut expected = priorities.clone();
        expected.sort_by_key(|p| std::cmp::Reverse(*p));
        assert_eq!(expected, priorities);

        // b before d, both PREFIX
        let b = sorted
            .iter()
            .position(|h| h.query_name.as_deref() == Some("b"))
            .unwrap();
        let d = sorted
            .iter()
            .position(|h| h.query_name.as_deref() == Some("d"))
            .unwrap();
        assert!(b < d);
    }

    /// Passes if planning twice yields byte-identical output
    #[test]
    fn plan_is_deterministic() {
        let planner = InvalidationPlanner::new();
        let records = [updated("Todo", "5"), updated("User", "1")];

        let first = planner.plan(&records, &[], None);
        let second = planner.plan(&records, &[], None);

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
