//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::credentials::{DEFAULT_TOKEN_ENV_PREFIX, EnvCredentials};
use crate::destroy::{
    CoordinatorSettings, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_CONCURRENT, RetryPolicy,
};
use crate::digitalocean::DEFAULT_API_ENDPOINT;
use crate::registry::CloudSettings;

/// Cloud and teardown settings merged from defaults, configuration files and
/// environment variables. The binary applies its own flag overrides on top.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "NODEKEEPER",
    discovery(
        app_name = "nodekeeper",
        env_var = "NODEKEEPER_CONFIG_PATH",
        config_file_name = "nodekeeper.toml",
        dotfile_name = ".nodekeeper.toml",
        project_file_name = "nodekeeper.toml"
    )
)]
pub struct KeeperConfig {
    /// Name under which the cloud is registered.
    #[ortho_config(default = "digitalocean".to_owned())]
    pub cloud_name: String,
    /// Credential id resolved to the API token.
    #[ortho_config(default = "digitalocean".to_owned())]
    pub credential_id: String,
    /// Base URL of the DigitalOcean API.
    #[ortho_config(default = DEFAULT_API_ENDPOINT.to_owned())]
    pub api_endpoint: String,
    /// Prefix of the environment variables holding API tokens.
    #[ortho_config(default = DEFAULT_TOKEN_ENV_PREFIX.to_owned())]
    pub token_env_prefix: String,
    /// Bound on each delete call, in seconds.
    #[ortho_config(default = 30)]
    pub call_timeout_secs: u64,
    /// Attempts per destroy, including the first.
    #[ortho_config(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds. Doubles per retry.
    #[ortho_config(default = 500)]
    pub initial_backoff_millis: u64,
    /// Destroy calls allowed in flight at once.
    #[ortho_config(default = DEFAULT_MAX_CONCURRENT)]
    pub max_concurrent_destroys: usize,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to nodekeeper.toml",
            self.env_var, self.toml_key
        )
    }
}

const CLOUD_NAME: FieldMetadata =
    FieldMetadata::new("cloud name", "NODEKEEPER_CLOUD_NAME", "cloud_name");
const CREDENTIAL_ID: FieldMetadata = FieldMetadata::new(
    "credential id",
    "NODEKEEPER_CREDENTIAL_ID",
    "credential_id",
);
const API_ENDPOINT: FieldMetadata =
    FieldMetadata::new("API endpoint", "NODEKEEPER_API_ENDPOINT", "api_endpoint");
const TOKEN_ENV_PREFIX: FieldMetadata = FieldMetadata::new(
    "token environment prefix",
    "NODEKEEPER_TOKEN_ENV_PREFIX",
    "token_env_prefix",
);
const CALL_TIMEOUT: FieldMetadata = FieldMetadata::new(
    "call timeout",
    "NODEKEEPER_CALL_TIMEOUT_SECS",
    "call_timeout_secs",
);
const MAX_ATTEMPTS: FieldMetadata =
    FieldMetadata::new("attempt limit", "NODEKEEPER_MAX_ATTEMPTS", "max_attempts");
const MAX_CONCURRENT: FieldMetadata = FieldMetadata::new(
    "concurrency limit",
    "NODEKEEPER_MAX_CONCURRENT_DESTROYS",
    "max_concurrent_destroys",
);

impl KeeperConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: {}",
                metadata.description,
                metadata.hint()
            )));
        }
        Ok(())
    }

    fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::Invalid(format!(
                "{} must be greater than zero: {}",
                metadata.description,
                metadata.hint()
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("nodekeeper")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply each value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required string is blank
    /// and [`ConfigError::Invalid`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(&self.cloud_name, &CLOUD_NAME)?;
        Self::require_field(&self.credential_id, &CREDENTIAL_ID)?;
        Self::require_field(&self.api_endpoint, &API_ENDPOINT)?;
        Self::require_field(&self.token_env_prefix, &TOKEN_ENV_PREFIX)?;
        let endpoint = self.api_endpoint.trim();
        if !endpoint.starts_with("https://") && !endpoint.starts_with("http://") {
            return Err(ConfigError::Invalid(format!(
                "API endpoint '{endpoint}' must be an http(s) URL: {}",
                API_ENDPOINT.hint()
            )));
        }
        Self::require_positive(self.call_timeout_secs, &CALL_TIMEOUT)?;
        Self::require_positive(u64::from(self.max_attempts), &MAX_ATTEMPTS)?;
        Self::require_positive(
            u64::try_from(self.max_concurrent_destroys).unwrap_or(u64::MAX),
            &MAX_CONCURRENT,
        )?;
        Ok(())
    }

    /// Builds the registry entry for the configured cloud.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn cloud_settings(&self) -> Result<CloudSettings, ConfigError> {
        self.validate()?;
        CloudSettings::new(&self.cloud_name, &self.credential_id, &self.api_endpoint)
            .map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    /// Bound on each delete call.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Retry and concurrency settings for the destruction coordinator.
    #[must_use]
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            retry: RetryPolicy::new(
                self.max_attempts,
                Duration::from_millis(self.initial_backoff_millis),
                self.call_timeout(),
            ),
            max_concurrent: self.max_concurrent_destroys,
        }
    }

    /// Environment-backed credential resolver using the configured prefix.
    #[must_use]
    pub fn credentials(&self) -> EnvCredentials {
        EnvCredentials::new(self.token_env_prefix.trim())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is out of range or malformed.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}
