//! DigitalOcean implementation of droplet teardown.

use std::time::Duration;

use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use tracing::debug;

use crate::credentials::Secret;
use crate::provider::{CloudProvider, DeleteOutcome, ProviderError, ProviderFuture, ResourceHandle};

/// Public DigitalOcean API base URL.
pub const DEFAULT_API_ENDPOINT: &str = "https://api.digitalocean.com/v2";

const USER_AGENT: &str = concat!("nodekeeper/", env!("CARGO_PKG_VERSION"));

/// Error payload returned by the DigitalOcean API.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    id: Option<String>,
    message: String,
}

/// Provider that deletes droplets through the DigitalOcean REST API.
#[derive(Clone, Debug)]
pub struct DigitalOceanProvider {
    client: Client,
    request_timeout: Duration,
}

impl DigitalOceanProvider {
    /// Creates a provider whose HTTP requests give up after `request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Transport`] when the HTTP client cannot be
    /// initialised (for example when no TLS backend is available).
    pub fn new(request_timeout: Duration) -> Result<Self, ProviderError> {
        Self::from_builder(Client::builder(), request_timeout)
    }

    pub(crate) fn from_builder(
        builder: ClientBuilder,
        request_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = builder
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ProviderError::Transport {
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            request_timeout,
        })
    }

    /// URL of the droplet resource behind `handle`.
    #[must_use]
    pub fn droplet_url(handle: &ResourceHandle) -> String {
        format!(
            "{}/droplets/{}",
            handle.api_endpoint.trim_end_matches('/'),
            handle.resource_id
        )
    }

    fn transport_error(&self, err: &reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            return ProviderError::Timeout {
                millis: u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX),
            };
        }
        ProviderError::Transport {
            message: err.to_string(),
        }
    }
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(ApiErrorBody {
            id: Some(id),
            message,
        }) => format!("{id}: {message}"),
        Ok(ApiErrorBody { id: None, message }) => message,
        Err(_) if body.trim().is_empty() => String::from("no response body"),
        Err(_) => body.trim().to_owned(),
    }
}

/// Maps a DELETE response onto the provider result.
pub(crate) fn classify_response(status: u16, body: &str) -> Result<DeleteOutcome, ProviderError> {
    match status {
        200..=299 => Ok(DeleteOutcome::Deleted),
        404 => Ok(DeleteOutcome::NotFound),
        429 => Err(ProviderError::RateLimited {
            message: error_message(body),
        }),
        401 | 403 => Err(ProviderError::Unauthorized {
            status,
            message: error_message(body),
        }),
        500..=599 => Err(ProviderError::Server {
            status,
            message: error_message(body),
        }),
        _ => Err(ProviderError::Api {
            status,
            message: error_message(body),
        }),
    }
}

impl CloudProvider for DigitalOceanProvider {
    fn delete_resource<'a>(
        &'a self,
        token: &'a Secret,
        handle: &'a ResourceHandle,
    ) -> ProviderFuture<'a, DeleteOutcome> {
        Box::pin(async move {
            let url = Self::droplet_url(handle);
            debug!(%url, "deleting droplet");
            let response = self
                .client
                .delete(&url)
                .bearer_auth(token.expose())
                .send()
                .await
                .map_err(|err| self.transport_error(&err))?;
            let status = response.status().as_u16();
            let body = if response.status().is_success() {
                String::new()
            } else {
                response.text().await.unwrap_or_default()
            };
            classify_response(status, &body)
        })
    }
}
