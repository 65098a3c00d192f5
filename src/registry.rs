//! Process-wide registry of cloud configurations.
//!
//! Nodes receive a [`CloudRegistry`] handle at construction and resolve their
//! cloud by name at teardown time. Lookups return an `Arc` snapshot, so a
//! configuration removed while nodes are still running simply stops
//! resolving.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

/// Live configuration of one cloud.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloudSettings {
    /// Symbolic name nodes use to refer to this cloud.
    pub name: String,
    /// Identifier handed to the credential resolver to obtain the API token.
    pub credential_id: String,
    /// Base URL of the provider API.
    pub api_endpoint: String,
}

impl CloudSettings {
    /// Builds settings, trimming whitespace and stripping a trailing `/`
    /// from the endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidSettings`] when any field is blank.
    pub fn new(
        name: impl Into<String>,
        credential_id: impl Into<String>,
        api_endpoint: impl Into<String>,
    ) -> Result<Self, RegistryError> {
        let trimmed_name = name.into().trim().to_owned();
        let trimmed_credential_id = credential_id.into().trim().to_owned();
        let trimmed_endpoint = api_endpoint.into().trim().trim_end_matches('/').to_owned();
        for (field, value) in [
            ("name", &trimmed_name),
            ("credential_id", &trimmed_credential_id),
            ("api_endpoint", &trimmed_endpoint),
        ] {
            if value.is_empty() {
                return Err(RegistryError::InvalidSettings {
                    field: field.to_owned(),
                });
            }
        }
        Ok(Self {
            name: trimmed_name,
            credential_id: trimmed_credential_id,
            api_endpoint: trimmed_endpoint,
        })
    }
}

/// Errors raised by the registry.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// Raised when cloud settings are missing a required value.
    #[error("invalid cloud settings: missing {field}")]
    InvalidSettings {
        /// Name of the blank field.
        field: String,
    },
}

/// Cheaply cloneable handle to the shared cloud map.
#[derive(Clone, Debug, Default)]
pub struct CloudRegistry {
    clouds: Arc<RwLock<HashMap<String, Arc<CloudSettings>>>>,
}

impl CloudRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `settings`, replacing any cloud with the same name.
    pub fn register(&self, settings: CloudSettings) {
        self.clouds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(settings.name.clone(), Arc::new(settings));
    }

    /// Removes a cloud. Returns the removed settings, if any.
    pub fn remove(&self, name: &str) -> Option<Arc<CloudSettings>> {
        self.clouds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Looks up a cloud by name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<CloudSettings>> {
        self.clouds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Returns the registered cloud names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .clouds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
