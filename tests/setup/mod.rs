//! Shared fixtures for the integration test suites: a small user/todo domain model and
//! stack-allocated graph nodes for cycle and depth cases.

#![allow(dead_code)]

use graphql_cascade::engine::entity::{Entity, FieldValue};
use serde_json::json;
use std::cell::Cell;

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl User {
    pub fn new(id: &str, name: &str) -> User {
        User {
            id: id.to_string(),
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
        }
    }
}

impl Entity for User {
    fn typename(&self) -> &str {
        "User"
    }

    fn id(&self) -> Option<String> {
        Some(self.id.clone())
    }

    fn fields(&self) -> Vec<(String, FieldValue<'_>)> {
        vec![
            ("id".to_string(), FieldValue::Scalar(json!(self.id))),
            ("name".to_string(), FieldValue::Scalar(json!(self.name))),
            ("email".to_string(), FieldValue::Scalar(json!(self.email))),
        ]
    }
}

pub struct Todo {
    pub id: String,
    pub title: String,
    pub owner: Option<User>,
}

impl Todo {
    pub fn new(id: &str, title: &str, owner: Option<User>) -> Todo {
        Todo {
            id: id.to_string(),
            title: title.to_string(),
            owner,
        }
    }
}

impl Entity for Todo {
    fn typename(&self) -> &str {
        "Todo"
    }

    fn id(&self) -> Option<String> {
        Some(self.id.clone())
    }

    fn fields(&self) -> Vec<(String, FieldValue<'_>)> {
        let mut fields = vec![
            ("id".to_string(), FieldValue::Scalar(json!(self.id))),
            ("title".to_string(), FieldValue::Scalar(json!(self.title))),
        ];
        if let Some(owner) = &self.owner {
            fields.push(("owner".to_string(), FieldValue::Entity(owner)));
        }
        fields
    }
}

/// A graph node whose single outgoing edge can be rewired after construction, which
/// allows building cycles on the stack
pub struct GraphNode<'a> {
    pub typename: &'static str,
    pub id: &'static str,
    pub next: Cell<Option<&'a GraphNode<'a>>>,
}

impl<'a> GraphNode<'a> {
    pub fn new(typename: &'static str, id: &'static str) -> GraphNode<'a> {
        GraphNode {
            typename,
            id,
            next: Cell::new(None),
        }
    }
}

impl<'a> Entity for GraphNode<'a> {
    fn typename(&self) -> &str {
        self.typename
    }

    fn id(&self) -> Option<String> {
        Some(self.id.to_string())
    }

    fn fields(&self) -> Vec<(String, FieldValue<'_>)> {
        vec![("id".to_string(), FieldValue::Scalar(json!(self.id)))]
    }

    fn relations(&self) -> Vec<&dyn Entity> {
        match self.next.get() {
            Some(next) => vec![next as &dyn Entity],
            None => vec![],
        }
    }
}
