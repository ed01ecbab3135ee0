//! Configuration for the cascade engine, loadable from YAML or JSON files, from
//! `CASCADE_`-prefixed environment variables, or through a fluent builder.

use crate::Error;
use log::trace;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::env;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Configuration for cascade tracking and response construction
///
/// # Examples
///
/// ```rust
/// use graphql_cascade::CascadeConfig;
///
/// let c = CascadeConfig::default();
/// assert_eq!(3, c.max_depth());
/// assert_eq!(50, c.max_invalidations());
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CascadeConfig {
    /// Maximum relationship traversal depth; the root entity is at depth 0
    max_depth: usize,

    /// Whether the walker follows relationships at all
    include_related: bool,

    /// Whether the planner runs on successful mutations
    auto_invalidate: bool,

    /// Entity typenames excluded from tracking, such as audit-log types
    exclude_types: Vec<String>,

    /// Estimated response size budget, in MiB
    max_response_size_mb: f64,

    /// Cap on the updated entity list
    max_updated_entities: usize,

    /// Cap on the deleted entity list
    max_deleted_entities: usize,

    /// Cap on the invalidation hint list
    max_invalidations: usize,
}

impl Default for CascadeConfig {
    fn default() -> CascadeConfig {
        CascadeConfig {
            max_depth: 3,
            include_related: true,
            auto_invalidate: true,
            exclude_types: vec![],
            max_response_size_mb: 5.0,
            max_updated_entities: 500,
            max_deleted_entities: 100,
            max_invalidations: 50,
        }
    }
}

impl CascadeConfig {
    /// Returns a fluent builder seeded with the defaults
    ///
    /// # Examples
    ///
    /// ```rust
    /// use graphql_cascade::CascadeConfig;
    ///
    /// let c = CascadeConfig::builder()
    ///     .with_max_depth(5)
    ///     .with_exclude_types(vec!["AuditLog".to_string()])
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(5, c.max_depth());
    /// ```
    pub fn builder() -> CascadeConfigBuilder {
        CascadeConfigBuilder {
            config: CascadeConfig::default(),
        }
    }

    /// Loads a configuration from a YAML or JSON file, dispatching on the file
    /// extension
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] variant [`ConfigOpenFailed`] if the file cannot be read,
    /// [`ConfigFormatUnsupported`] if the extension is not `.yaml`, `.yml`, or `.json`,
    /// or [`ConfigValueInvalid`] if validation fails.
    ///
    /// [`Error`]: ../../enum.Error.html
    /// [`ConfigOpenFailed`]: ../../enum.Error.html#variant.ConfigOpenFailed
    /// [`ConfigFormatUnsupported`]: ../../enum.Error.html#variant.ConfigFormatUnsupported
    /// [`ConfigValueInvalid`]: ../../enum.Error.html#variant.ConfigValueInvalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<CascadeConfig, Error> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        if !matches!(extension.as_str(), "yaml" | "yml" | "json") {
            return Err(Error::ConfigFormatUnsupported { extension });
        }

        let reader = BufReader::new(File::open(path)?);
        let config: CascadeConfig = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_reader(reader)?,
            _ => serde_json::from_reader(reader)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from `CASCADE_`-prefixed environment variables, starting
    /// from the defaults. `CASCADE_EXCLUDE_TYPES` is comma-separated.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] variant [`EnvironmentVariableNotParsed`] if a present
    /// variable cannot be parsed into the expected type, or [`ConfigValueInvalid`] if
    /// validation fails.
    ///
    /// [`Error`]: ../../enum.Error.html
    /// [`EnvironmentVariableNotParsed`]: ../../enum.Error.html#variant.EnvironmentVariableNotParsed
    /// [`ConfigValueInvalid`]: ../../enum.Error.html#variant.ConfigValueInvalid
    pub fn from_env() -> Result<CascadeConfig, Error> {
        let mut config = CascadeConfig::default();

        if let Some(v) = env_usize("CASCADE_MAX_DEPTH")? {
            config.max_depth = v;
        }
        if let Some(v) = env_bool("CASCADE_INCLUDE_RELATED")? {
            config.include_related = v;
        }
        if let Some(v) = env_bool("CASCADE_AUTO_INVALIDATE")? {
            config.auto_invalidate = v;
        }
        if let Ok(v) = env::var("CASCADE_EXCLUDE_TYPES") {
            config.exclude_types = v
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }
        if let Some(v) = env_f64("CASCADE_MAX_RESPONSE_SIZE_MB")? {
            config.max_response_size_mb = v;
        }
        if let Some(v) = env_usize("CASCADE_MAX_UPDATED_ENTITIES")? {
            config.max_updated_entities = v;
        }
        if let Some(v) = env_usize("CASCADE_MAX_DELETED_ENTITIES")? {
            config.max_deleted_entities = v;
        }
        if let Some(v) = env_usize("CASCADE_MAX_INVALIDATIONS")? {
            config.max_invalidations = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values. The size budget and all caps must be
    /// positive.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] variant [`ConfigValueInvalid`] naming the offending key.
    ///
    /// [`Error`]: ../../enum.Error.html
    /// [`ConfigValueInvalid`]: ../../enum.Error.html#variant.ConfigValueInvalid
    pub fn validate(&self) -> Result<(), Error> {
        trace!("CascadeConfig::validate called");

        if !(self.max_response_size_mb > 0.0) {
            return Err(Error::ConfigValueInvalid {
                name: "maxResponseSizeMb".to_string(),
                expected: "must be a positive number".to_string(),
            });
        }
        if self.max_updated_entities == 0 {
            return Err(Error::ConfigValueInvalid {
                name: "maxUpdatedEntities".to_string(),
                expected: "must be a positive integer".to_string(),
            });
        }
        if self.max_deleted_entities == 0 {
            return Err(Error::ConfigValueInvalid {
                name: "maxDeletedEntities".to_string(),
                expected: "must be a positive integer".to_string(),
            });
        }
        if self.max_invalidations == 0 {
            return Err(Error::ConfigValueInvalid {
                name: "maxInvalidations".to_string(),
                expected: "must be a positive integer".to_string(),
            });
        }

        Ok(())
    }

    /// Returns the maximum relationship traversal depth
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Returns whether the walker follows relationships
    pub fn include_related(&self) -> bool {
        self.include_related
    }

    /// Returns whether the planner runs on successful mutations
    pub fn auto_invalidate(&self) -> bool {
        self.auto_invalidate
    }

    /// Returns the excluded entity typenames
    pub fn exclude_types(&self) -> &[String] {
        &self.exclude_types
    }

    /// Returns the estimated response size budget, in MiB
    pub fn max_response_size_mb(&self) -> f64 {
        self.max_response_size_mb
    }

    /// Returns the cap on the updated entity list
    pub fn max_updated_entities(&self) -> usize {
        self.max_updated_entities
    }

    /// Returns the cap on the deleted entity list
    pub fn max_deleted_entities(&self) -> usize {
        self.max_deleted_entities
    }

    /// Returns the cap on the invalidation hint list
    pub fn max_invalidations(&self) -> usize {
        self.max_invalidations
    }
}

impl TryFrom<File> for CascadeConfig {
    type Error = Error;

    fn try_from(f: File) -> Result<CascadeConfig, Error> {
        let r = BufReader::new(f);
        let config: CascadeConfig = serde_yaml::from_reader(r)?;
        config.validate()?;
        Ok(config)
    }
}

impl TryFrom<String> for CascadeConfig {
    type Error = Error;

    fn try_from(s: String) -> Result<CascadeConfig, Error> {
        CascadeConfig::try_from(s.as_str())
    }
}

impl TryFrom<&str> for CascadeConfig {
    type Error = Error;

    fn try_from(s: &str) -> Result<CascadeConfig, Error> {
        let config: CascadeConfig = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

/// Fluent builder for [`CascadeConfig`], validating on `build`
///
/// [`CascadeConfig`]: struct.CascadeConfig.html
#[derive(Clone, Debug)]
pub struct CascadeConfigBuilder {
    config: CascadeConfig,
}

impl CascadeConfigBuilder {
    /// Sets the maximum relationship traversal depth
    pub fn with_max_depth(mut self, max_depth: usize) -> CascadeConfigBuilder {
        self.config.max_depth = max_depth;
        self
    }

    /// Enables or disables relationship traversal
    pub fn with_include_related(mut self, include_related: bool) -> CascadeConfigBuilder {
        self.config.include_related = include_related;
        self
    }

    /// Enables or disables invalidation planning
    pub fn with_auto_invalidate(mut self, auto_invalidate: bool) -> CascadeConfigBuilder {
        self.config.auto_invalidate = auto_invalidate;
        self
    }

    /// Sets the excluded entity typenames
    pub fn with_exclude_types(mut self, exclude_types: Vec<String>) -> CascadeConfigBuilder {
        self.config.exclude_types = exclude_types;
        self
    }

    /// Sets the estimated response size budget, in MiB
    pub fn with_max_response_size_mb(mut self, max: f64) -> CascadeConfigBuilder {
        self.config.max_response_size_mb = max;
        self
    }

    /// Sets the cap on the updated entity list
    pub fn with_max_updated_entities(mut self, max: usize) -> CascadeConfigBuilder {
        self.config.max_updated_entities = max;
        self
    }

    /// Sets the cap on the deleted entity list
    pub fn with_max_deleted_entities(mut self, max: usize) -> CascadeConfigBuilder {
        self.config.max_deleted_entities = max;
        self
    }

    /// Sets the cap on the invalidation hint list
    pub fn with_max_invalidations(mut self, max: usize) -> CascadeConfigBuilder {
        self.config.max_invalidations = max;
        self
    }

    /// Validates and returns the configuration
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] variant [`ConfigValueInvalid`] if validation fails.
    ///
    /// [`Error`]: ../../enum.Error.html
    /// [`ConfigValueInvalid`]: ../../enum.Error.html#variant.ConfigValueInvalid
    pub fn build(self) -> Result<CascadeConfig, Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn env_usize(name: &str) -> Result<Option<usize>, Error> {
    match env::var(name) {
        Ok(v) => v
            .parse()
            .map(Some)
            .map_err(|_| Error::EnvironmentVariableNotParsed {
                name: name.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn env_f64(name: &str) -> Result<Option<f64>, Error> {
    match env::var(name) {
        Ok(v) => v
            .parse()
            .map(Some)
            .map_err(|_| Error::EnvironmentVariableNotParsed {
                name: name.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>, Error> {
    match env::var(name) {
        Ok(v) => match v.to_lowercase().as_str() {
            "true" | "1" => Ok(Some(true)),
            "false" | "0" => Ok(Some(false)),
            _ => Err(Error::EnvironmentVariableNotParsed {
                name: name.to_string(),
            }),
        },
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::CascadeConfig;
    use crate::Error;
    use std::convert::TryFrom;
    use std::env;

    /// Passes if the defaults match the documented values
    #[test]
    fn default_config() {
        let c = CascadeConfig::default();

        assert_eq!(3, c.max_depth());
        assert!(c.include_related());
        assert!(c.auto_invalidate());
        assert!(c.exclude_types().is_empty());
        assert_eq!(500, c.max_updated_entities());
        assert_eq!(100, c.max_deleted_entities());
        assert_eq!(50, c.max_invalidations());
    }

    /// Passes if a YAML document deserializes with camelCase keys
    #[test]
    fn yaml_config() {
        let c = CascadeConfig::try_from(
            "maxDepth: 2\nexcludeTypes:\n  - AuditLog\nmaxUpdatedEntities: 10\n",
        )
        .unwrap();

        assert_eq!(2, c.max_depth());
        assert_eq!(vec!["AuditLog".to_string()], c.exclude_types().to_vec());
        assert_eq!(10, c.max_updated_entities());
    }

    /// Passes if YAML and JSON fixture files load through extension dispatch
    #[test]
    fn config_files() {
        let yaml = CascadeConfig::from_file("tests/fixtures/cascade.yml").unwrap();
        assert_eq!(2, yaml.max_depth());

        let json = CascadeConfig::from_file("tests/fixtures/cascade.json").unwrap();
        assert_eq!(5, json.max_depth());
        assert_eq!(1000, json.max_updated_entities());
    }

    /// Passes if an unsupported extension is rejected
    #[test]
    fn unsupported_extension() {
        assert!(matches!(
            CascadeConfig::from_file("tests/fixtures/cascade.toml"),
            Err(Error::ConfigFormatUnsupported { .. })
        ));
    }

    /// Passes if zero caps fail validation
    #[test]
    fn zero_caps_fail_validation() {
        assert!(CascadeConfig::builder()
            .with_max_updated_entities(0)
            .build()
            .is_err());
        assert!(CascadeConfig::builder()
            .with_max_response_size_mb(0.0)
            .build()
            .is_err());
    }

    /// Passes if the builder produces a validated configuration
    #[test]
    fn builder_config() {
        let c = CascadeConfig::builder()
            .with_max_depth(1)
            .with_max_response_size_mb(1.0)
            .with_max_updated_entities(50)
            .with_max_deleted_entities(50)
            .build()
            .unwrap();

        assert_eq!(1, c.max_depth());
        assert_eq!(50, c.max_updated_entities());
    }

    /// Passes if environment variables override the defaults and unparsable values fail
    #[test]
    fn env_config() {
        env::set_var("CASCADE_MAX_DEPTH", "4");
        env::set_var("CASCADE_EXCLUDE_TYPES", "AuditLog, SystemEvent");
        env::set_var("CASCADE_AUTO_INVALIDATE", "false");

        let c = CascadeConfig::from_env().unwrap();
        assert_eq!(4, c.max_depth());
        assert_eq!(
            vec!["AuditLog".to_string(), "SystemEvent".to_string()],
            c.exclude_types().to_vec()
        );
        assert!(!c.auto_invalidate());

        env::set_var("CASCADE_MAX_DEPTH", "not-a-number");
        assert!(matches!(
            CascadeConfig::from_env(),
            Err(Error::EnvironmentVariableNotParsed { .. })
        ));

        env::remove_var("CASCADE_MAX_DEPTH");
        env::remove_var("CASCADE_EXCLUDE_TYPES");
        env::remove_var("CASCADE_AUTO_INVALIDATE");
    }
}
