//! Cloud provider abstraction for tearing down disposable droplets.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::activity::ProvisioningId;
use crate::credentials::Secret;

/// Provider specific identifier of a droplet.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Wraps a raw droplet identifier.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw droplet identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for ResourceId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Plain-data reference to one externally provisioned droplet.
///
/// Destroy tasks hold this instead of the node so that disposing of the node
/// never has to wait for, or cancel, an in-flight teardown.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceHandle {
    /// Droplet identifier.
    pub resource_id: ResourceId,
    /// Name of the cloud configuration that owns the droplet.
    pub cloud_name: String,
    /// Base URL of the provider API for that cloud.
    pub api_endpoint: String,
    /// Provisioning activity the droplet belongs to.
    pub provisioning_id: ProvisioningId,
}

/// Successful result of a delete call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeleteOutcome {
    /// The provider accepted the delete request.
    Deleted,
    /// The provider no longer knows the resource.
    NotFound,
}

/// Errors reported by a provider delete call.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// The call did not complete within the configured timeout.
    #[error("request timed out after {millis}ms")]
    Timeout {
        /// Timeout that elapsed, in milliseconds.
        millis: u64,
    },
    /// The request never produced an HTTP response.
    #[error("transport error: {message}")]
    Transport {
        /// Underlying client error.
        message: String,
    },
    /// The provider throttled the account.
    #[error("rate limited by provider: {message}")]
    RateLimited {
        /// Message returned by the provider.
        message: String,
    },
    /// The token was rejected.
    #[error("authentication rejected ({status}): {message}")]
    Unauthorized {
        /// HTTP status code.
        status: u16,
        /// Message returned by the provider.
        message: String,
    },
    /// The provider failed internally.
    #[error("provider server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Message returned by the provider.
        message: String,
    },
    /// Any other non-success response.
    #[error("provider rejected request ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message returned by the provider.
        message: String,
    },
}

impl ProviderError {
    /// Returns `true` when repeating the call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Transport { .. }
                | Self::RateLimited { .. }
                | Self::Server { .. }
        )
    }
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Minimal interface implemented by cloud providers.
pub trait CloudProvider: Send + Sync + 'static {
    /// Issues one delete call for the droplet behind `handle`.
    fn delete_resource<'a>(
        &'a self,
        token: &'a Secret,
        handle: &'a ResourceHandle,
    ) -> ProviderFuture<'a, DeleteOutcome>;
}
