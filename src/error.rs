//! Provides the [`Error`] type for the cascade engine

use std::fmt::{Display, Formatter};

/// Error type for the cascade engine
///
/// # Examples
///
/// ```rust
/// use graphql_cascade::Error;
///
/// let e = Error::TransactionInProgress;
/// ```
#[derive(Debug)]
pub enum Error {
    /// Returned if a cascade configuration file cannot be opened, typically because the
    /// configuration file cannot be found on disk
    ConfigOpenFailed { source: std::io::Error },

    /// Returned if a configuration file has an extension other than `.yaml`, `.yml`, or
    /// `.json`. The `extension` field contains the offending extension.
    ConfigFormatUnsupported { extension: String },

    /// Returned if a configuration value fails validation. The `name` field contains the
    /// name of the configuration key, and `expected` describes the constraint that was
    /// violated.
    ConfigValueInvalid { name: String, expected: String },

    /// Returned if a configuration fails to deserialize because the provided data does not
    /// match the expected structure
    DeserializationFailed { source: serde_yaml::Error },

    /// Returned if an argument to a `@cascade` or `@cascadeInvalidates` directive cannot be
    /// parsed, such as a non-integer `maxDepth`. The fields name the directive and the
    /// offending argument.
    DirectiveArgumentNotParsed { directive: String, argument: String },

    /// Returned if an entity cannot be given a cascade key because it exposes no id. The
    /// `type_name` field contains the entity's typename.
    EntityUnrepresentable { type_name: String },

    /// Returned if an environment variable with the `CASCADE_` prefix cannot be parsed into
    /// the expected type. The `name` field contains the name of the environment variable.
    EnvironmentVariableNotParsed { name: String },

    /// Returned if a `@cascadeInvalidates` directive does not carry exactly one of `query`
    /// and `queryPattern`. The fields name the type and field to which the directive is
    /// attached.
    InvalidationRuleInvalid { type_name: String, field_name: String },

    /// Returned if the tracker mutex inside a cascade context was poisoned by a panic on
    /// another thread. This most likely indicates a panic inside a resolver.
    LockPoisoned,

    /// Returned if a GraphQL schema document cannot be parsed when building the directive
    /// tables
    SchemaParseFailed {
        source: graphql_parser::schema::ParseError,
    },

    /// Returned if cascade data cannot be converted to a serde_json::Value
    SerializationFailed { source: serde_json::Error },

    /// Returned if `begin` is called while a transaction is already in progress.
    /// Transactions are not nestable.
    TransactionInProgress,

    /// Returned if a tracking call, snapshot, or end is attempted with no transaction in
    /// progress. This is a programmer error in the calling resolver or event source.
    TransactionNotStarted,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Error::ConfigOpenFailed { source } => {
                write!(f, "Config file could not be opened. Source error: {}", source)
            }
            Error::ConfigFormatUnsupported { extension } => {
                write!(f, "Unsupported config file format: {}", extension)
            }
            Error::ConfigValueInvalid { name, expected } => {
                write!(f, "Config value {} is invalid: {}", name, expected)
            }
            Error::DeserializationFailed { source } => {
                write!(f, "Failed to deserialize configuration. Source error: {}", source)
            }
            Error::DirectiveArgumentNotParsed { directive, argument } => {
                write!(
                    f,
                    "Could not parse argument {} of the @{} directive",
                    argument, directive
                )
            }
            Error::EntityUnrepresentable { type_name } => {
                write!(f, "Entity of type {} exposes no id and cannot be tracked", type_name)
            }
            Error::EnvironmentVariableNotParsed { name } => {
                write!(f, "Failed to parse environment variable: {}", name)
            }
            Error::InvalidationRuleInvalid { type_name, field_name } => {
                write!(
                    f,
                    "The @cascadeInvalidates directive on {}.{} must carry exactly one of query and queryPattern",
                    type_name, field_name
                )
            }
            Error::LockPoisoned => {
                write!(f, "The cascade tracker lock was poisoned by a panicked resolver")
            }
            Error::SchemaParseFailed { source } => {
                write!(f, "Failed to parse schema document. Source error: {}", source)
            }
            Error::SerializationFailed { source } => {
                write!(f, "Serialization of cascade data failed. Source error: {}", source)
            }
            Error::TransactionInProgress => {
                write!(f, "A cascade transaction is already in progress. Transactions are not nestable.")
            }
            Error::TransactionNotStarted => {
                write!(f, "No cascade transaction in progress. Call begin before tracking changes.")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ConfigOpenFailed { source } => Some(source),
            Error::ConfigFormatUnsupported { extension: _ } => None,
            Error::ConfigValueInvalid { name: _, expected: _ } => None,
            Error::DeserializationFailed { source } => Some(source),
            Error::DirectiveArgumentNotParsed {
                directive: _,
                argument: _,
            } => None,
            Error::EntityUnrepresentable { type_name: _ } => None,
            Error::EnvironmentVariableNotParsed { name: _ } => None,
            Error::InvalidationRuleInvalid {
                type_name: _,
                field_name: _,
            } => None,
            Error::LockPoisoned => None,
            Error::SchemaParseFailed { source } => Some(source),
            Error::SerializationFailed { source } => Some(source),
            Error::TransactionInProgress => None,
            Error::TransactionNotStarted => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::ConfigOpenFailed { source: e }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::DeserializationFailed { source: e }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationFailed { source: e }
    }
}

impl From<graphql_parser::schema::ParseError> for Error {
    fn from(e: graphql_parser::schema::ParseError) -> Self {
        Error::SchemaParseFailed { source: e }
    }
}
