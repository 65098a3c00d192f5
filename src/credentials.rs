//! Credential resolution for cloud API tokens.
//!
//! Tokens live outside the node: each cloud configuration names a credential
//! id and a [`CredentialResolver`] turns that id into a [`Secret`] at
//! teardown time.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

/// Default prefix used by [`EnvCredentials`].
pub const DEFAULT_TOKEN_ENV_PREFIX: &str = "NODEKEEPER_TOKEN_";

/// Sensitive string material. `Debug` and `Display` never show the value.
#[derive(Clone, Eq, PartialEq)]
pub struct Secret(String);

impl Secret {
    /// Wraps a sensitive value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw value. Callers must not log it.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns `true` when the value is empty or whitespace only.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(\"<redacted>\")")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Errors raised while resolving a credential.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CredentialError {
    /// No credential is stored under the id.
    #[error("credential '{credential_id}' not found")]
    NotFound {
        /// Credential id that was requested.
        credential_id: String,
    },
    /// The credential exists but holds no token.
    #[error("credential '{credential_id}' is empty")]
    Empty {
        /// Credential id that was requested.
        credential_id: String,
    },
}

/// Resolves credential ids to auth tokens. Must not block on network I/O.
pub trait CredentialResolver: Send + Sync {
    /// Returns the token stored under `credential_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when the id is unknown or the token is
    /// empty.
    fn resolve(&self, credential_id: &str) -> Result<Secret, CredentialError>;
}

fn non_blank(credential_id: &str, token: Secret) -> Result<Secret, CredentialError> {
    if token.is_blank() {
        return Err(CredentialError::Empty {
            credential_id: credential_id.to_owned(),
        });
    }
    Ok(token)
}

/// In-memory credential store.
#[derive(Clone, Debug, Default)]
pub struct StaticCredentials {
    tokens: Arc<RwLock<HashMap<String, Secret>>>,
}

impl StaticCredentials {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `token` under `credential_id`, replacing any previous value.
    pub fn insert(&self, credential_id: impl Into<String>, token: Secret) {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(credential_id.into(), token);
    }

    /// Removes the credential stored under `credential_id`.
    pub fn remove(&self, credential_id: &str) {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(credential_id);
    }
}

impl CredentialResolver for StaticCredentials {
    fn resolve(&self, credential_id: &str) -> Result<Secret, CredentialError> {
        let token = self
            .tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(credential_id)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound {
                credential_id: credential_id.to_owned(),
            })?;
        non_blank(credential_id, token)
    }
}

/// Reads tokens from environment variables named `<prefix><ID>`.
///
/// The id is upper-cased and every character that is not ASCII alphanumeric
/// becomes `_`, so `do-east` under the default prefix reads
/// `NODEKEEPER_TOKEN_DO_EAST`.
///
/// The mapping is lossy: ids differing only in case or punctuation, such as
/// `do-east`, `do_east`, `do.east` and `DO-EAST`, share one variable and
/// therefore one token. Give clouds that need distinct tokens ids that differ
/// in their letters or digits.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnvCredentials {
    prefix: String,
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_ENV_PREFIX)
    }
}

impl EnvCredentials {
    /// Creates a resolver using `prefix`.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Returns the environment variable consulted for `credential_id`.
    #[must_use]
    pub fn var_name(&self, credential_id: &str) -> String {
        let suffix: String = credential_id
            .trim()
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() {
                    ch.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{suffix}", self.prefix)
    }
}

impl CredentialResolver for EnvCredentials {
    fn resolve(&self, credential_id: &str) -> Result<Secret, CredentialError> {
        let token = env::var(self.var_name(credential_id)).map_err(|_| {
            CredentialError::NotFound {
                credential_id: credential_id.to_owned(),
            }
        })?;
        non_blank(credential_id, Secret::new(token))
    }
}
