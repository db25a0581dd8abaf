//! Typed configuration access for components
//!
//! Components never read files or the process environment directly; the host
//! hands them a [`ConfigLoader`] and each component unmarshals its own
//! subtree by key (`"kafka"`, `"ratelimit"`, ...). [`EnvConfigLoader`] is the
//! standard implementation layering config files and prefixed environment
//! variables through the `config` crate.

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors produced while loading or deserializing configuration
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    /// The requested key does not exist in any source
    #[error("Configuration key not found: {key}")]
    KeyNotFound { key: String },

    /// Sources could not be read or merged
    #[error("Failed to load configuration: {message}")]
    Load { message: String },

    /// The subtree exists but does not match the target type
    #[error("Failed to parse configuration key {key}: {message}")]
    Parse { key: String, message: String },
}

/// Result type for configuration loading
pub type ConfigLoadResult<T> = std::result::Result<T, ConfigLoadError>;

/// Typed unmarshal-by-key access to the merged configuration tree
pub trait ConfigLoader: Send + Sync {
    /// Fetch the raw subtree stored under `key`
    fn get_value(&self, key: &str) -> ConfigLoadResult<serde_json::Value>;

    /// Deserialize the subtree stored under `key` into `T`
    fn unmarshal_key<T: DeserializeOwned>(&self, key: &str) -> ConfigLoadResult<T>
    where
        Self: Sized,
    {
        let value = self.get_value(key)?;
        serde_json::from_value(value).map_err(|e| ConfigLoadError::Parse {
            key: key.to_string(),
            message: e.to_string(),
        })
    }
}

/// Configuration loader backed by layered files and environment variables
///
/// Sources are merged lowest-precedence first: `config/<name>.{toml,yaml,json}`,
/// `config/<name>.local.*`, then environment variables prefixed with the
/// uppercased application name (`APP__KAFKA__CLIENT_ID=...`).
pub struct EnvConfigLoader {
    settings: config::Config,
}

impl EnvConfigLoader {
    /// Build a loader for the named application
    pub fn new(app_name: &str) -> ConfigLoadResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{app_name}")).required(false))
            .add_source(
                config::File::with_name(&format!("config/{app_name}.local")).required(false),
            )
            .add_source(
                config::Environment::with_prefix(&app_name.to_uppercase().replace('-', "_"))
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .map_err(|e| ConfigLoadError::Load {
                message: e.to_string(),
            })?;

        Ok(Self { settings })
    }

    /// Build a loader from an already-merged `config::Config`
    pub fn from_config(settings: config::Config) -> Self {
        Self { settings }
    }
}

impl ConfigLoader for EnvConfigLoader {
    fn get_value(&self, key: &str) -> ConfigLoadResult<serde_json::Value> {
        let value: config::Value =
            self.settings
                .get(key)
                .map_err(|e| match e {
                    config::ConfigError::NotFound(_) => ConfigLoadError::KeyNotFound {
                        key: key.to_string(),
                    },
                    other => ConfigLoadError::Load {
                        message: other.to_string(),
                    },
                })?;

        value
            .try_deserialize()
            .map_err(|e| ConfigLoadError::Parse {
                key: key.to_string(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        count: i64,
    }

    fn loader_with(key: &str, json: serde_json::Value) -> EnvConfigLoader {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                &serde_json::json!({ key: json }).to_string(),
                config::FileFormat::Json,
            ))
            .build()
            .unwrap();
        EnvConfigLoader::from_config(settings)
    }

    #[test]
    fn test_unmarshal_key() {
        let loader = loader_with("sample", serde_json::json!({"name": "abc", "count": 3}));
        let sample: Sample = loader.unmarshal_key("sample").unwrap();
        assert_eq!(
            sample,
            Sample {
                name: "abc".to_string(),
                count: 3
            }
        );
    }

    #[test]
    fn test_missing_key() {
        let loader = loader_with("sample", serde_json::json!({"name": "abc", "count": 3}));
        let err = loader.get_value("absent").unwrap_err();
        assert!(matches!(err, ConfigLoadError::KeyNotFound { .. }));
    }

    #[test]
    fn test_parse_error_names_key() {
        let loader = loader_with("sample", serde_json::json!({"name": "abc"}));
        let err = loader.unmarshal_key::<Sample>("sample").unwrap_err();
        match err {
            ConfigLoadError::Parse { key, .. } => assert_eq!(key, "sample"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
