//! Asynchronous, failure-tolerant droplet destruction.
//!
//! [`DestructionCoordinator::destroy_async`] hands the delete call to a tokio
//! task and returns at once. The task owns only plain data (token, handle,
//! provider), so the node that requested the destroy can be dropped while the
//! call is still in flight. Provider failures end at the task boundary: they
//! are logged and recorded as activity, never returned to the caller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{Instrument, error, info, info_span, warn};

use crate::activity::{ActivityEvent, ActivityKind, ActivityRecorder, NoopActivity};
use crate::credentials::Secret;
use crate::provider::{CloudProvider, DeleteOutcome, ProviderError, ResourceHandle, ResourceId};

/// Default bound on a single provider call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of attempts per destroy, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay before the first retry.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
/// Default number of destroy tasks allowed to talk to the provider at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Retry and timeout policy applied to each destroy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            DEFAULT_INITIAL_BACKOFF,
            DEFAULT_CALL_TIMEOUT,
        )
    }
}

impl RetryPolicy {
    /// Builds a policy. `max_attempts` below one is treated as one.
    #[must_use]
    pub fn new(max_attempts: u32, initial_backoff: Duration, call_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            call_timeout,
        }
    }

    /// Single attempt, no retry.
    #[must_use]
    pub fn no_retry(call_timeout: Duration) -> Self {
        Self::new(1, Duration::ZERO, call_timeout)
    }

    /// Total attempts allowed.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Bound on each provider call.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Delay after the failed attempt number `attempt` (1-based), doubling
    /// each time and capped at one minute.
    #[must_use]
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Final result of one destroy task.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DestroyOutcome {
    /// The provider accepted the delete.
    Destroyed {
        /// Attempts used.
        attempts: u32,
    },
    /// The droplet was already gone.
    AlreadyGone {
        /// Attempts used.
        attempts: u32,
    },
    /// Every attempt failed or a permanent error ended the task.
    Failed {
        /// Last provider error.
        error: ProviderError,
        /// Attempts used.
        attempts: u32,
    },
    /// The task never finished, for example because the runtime shut down
    /// or the provider panicked.
    Aborted {
        /// Why the task ended early.
        message: String,
    },
}

impl DestroyOutcome {
    /// Returns `true` when the droplet is known not to exist anymore.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Destroyed { .. } | Self::AlreadyGone { .. })
    }
}

enum TicketState {
    Pending(JoinHandle<DestroyOutcome>),
    Ready(DestroyOutcome),
}

/// Handle to a scheduled destroy. Dropping it detaches the task.
pub struct DestroyTicket {
    resource_id: ResourceId,
    state: TicketState,
}

impl DestroyTicket {
    /// Wraps a spawned destroy task.
    #[must_use]
    pub const fn pending(resource_id: ResourceId, join: JoinHandle<DestroyOutcome>) -> Self {
        Self {
            resource_id,
            state: TicketState::Pending(join),
        }
    }

    /// Builds a ticket that is already complete.
    #[must_use]
    pub const fn ready(resource_id: ResourceId, outcome: DestroyOutcome) -> Self {
        Self {
            resource_id,
            state: TicketState::Ready(outcome),
        }
    }

    /// Droplet this ticket destroys.
    #[must_use]
    pub const fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    /// Returns `true` once the task has produced its outcome.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        match &self.state {
            TicketState::Pending(join) => join.is_finished(),
            TicketState::Ready(_) => true,
        }
    }

    /// Waits for the task to finish.
    pub async fn outcome(self) -> DestroyOutcome {
        match self.state {
            TicketState::Ready(outcome) => outcome,
            TicketState::Pending(join) => join.await.unwrap_or_else(|err| DestroyOutcome::Aborted {
                message: err.to_string(),
            }),
        }
    }
}

impl fmt::Debug for DestroyTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestroyTicket")
            .field("resource_id", &self.resource_id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Object-safe seam between nodes and the destroy machinery.
pub trait DestroyScheduler: Send + Sync {
    /// Schedules destruction of `handle` and returns without waiting.
    fn destroy_async(&self, token: Secret, handle: ResourceHandle) -> DestroyTicket;
}

/// Tuning for a [`DestructionCoordinator`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CoordinatorSettings {
    /// Retry and timeout policy.
    pub retry: RetryPolicy,
    /// Maximum destroy tasks talking to the provider at once.
    pub max_concurrent: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

/// Runs provider delete calls on a tokio runtime, off the caller's thread.
pub struct DestructionCoordinator<P: CloudProvider> {
    provider: Arc<P>,
    runtime: Handle,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
    activity: Arc<dyn ActivityRecorder>,
}

impl<P: CloudProvider> DestructionCoordinator<P> {
    /// Creates a coordinator spawning onto `runtime`.
    ///
    /// Holding the runtime handle lets synchronous code on any thread call
    /// [`DestroyScheduler::destroy_async`].
    #[must_use]
    pub fn new(provider: P, runtime: Handle, settings: CoordinatorSettings) -> Self {
        Self {
            provider: Arc::new(provider),
            runtime,
            permits: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
            retry: settings.retry,
            activity: Arc::new(NoopActivity),
        }
    }

    /// Reports destroy outcomes to `activity`.
    #[must_use]
    pub fn with_activity(mut self, activity: Arc<dyn ActivityRecorder>) -> Self {
        self.activity = activity;
        self
    }
}

impl<P: CloudProvider> fmt::Debug for DestructionCoordinator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestructionCoordinator")
            .field("retry", &self.retry)
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl<P: CloudProvider> DestroyScheduler for DestructionCoordinator<P> {
    fn destroy_async(&self, token: Secret, handle: ResourceHandle) -> DestroyTicket {
        let resource_id = handle.resource_id;
        let span = info_span!(
            "destroy_droplet",
            resource_id = %resource_id,
            cloud = %handle.cloud_name,
            provisioning_id = %handle.provisioning_id,
        );
        let task = run_destroy(
            Arc::clone(&self.provider),
            Arc::clone(&self.permits),
            self.retry,
            Arc::clone(&self.activity),
            token,
            handle,
        );
        DestroyTicket::pending(resource_id, self.runtime.spawn(task.instrument(span)))
    }
}

async fn run_destroy<P: CloudProvider>(
    provider: Arc<P>,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
    activity: Arc<dyn ActivityRecorder>,
    token: Secret,
    handle: ResourceHandle,
) -> DestroyOutcome {
    let mut guard = CompletionGuard {
        activity,
        handle,
        finished: false,
    };
    // The semaphore is never closed; run unthrottled if that ever changes.
    let _permit = permits.acquire_owned().await.ok();
    let outcome = destroy_with_retry(provider.as_ref(), retry, &token, &guard.handle).await;
    report(guard.activity.as_ref(), &guard.handle, &outcome);
    guard.finished = true;
    outcome
}

/// Reports a destroy task that is dropped before producing an outcome, for
/// example when the runtime shuts down or the provider panics.
struct CompletionGuard {
    activity: Arc<dyn ActivityRecorder>,
    handle: ResourceHandle,
    finished: bool,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let message = if std::thread::panicking() {
            "destroy task panicked"
        } else {
            "destroy task cancelled before completion"
        };
        report(
            self.activity.as_ref(),
            &self.handle,
            &DestroyOutcome::Aborted {
                message: message.to_owned(),
            },
        );
    }
}

async fn destroy_with_retry<P: CloudProvider>(
    provider: &P,
    retry: RetryPolicy,
    token: &Secret,
    handle: &ResourceHandle,
) -> DestroyOutcome {
    let mut attempt = 1;
    loop {
        let result = timeout(retry.call_timeout, provider.delete_resource(token, handle))
            .await
            .unwrap_or_else(|_| {
                Err(ProviderError::Timeout {
                    millis: u64::try_from(retry.call_timeout.as_millis()).unwrap_or(u64::MAX),
                })
            });
        match result {
            Ok(DeleteOutcome::Deleted) => return DestroyOutcome::Destroyed { attempts: attempt },
            Ok(DeleteOutcome::NotFound) => {
                return DestroyOutcome::AlreadyGone { attempts: attempt };
            }
            Err(err) if err.is_transient() && attempt < retry.max_attempts => {
                let delay = retry.backoff_after(attempt);
                warn!(
                    attempt,
                    error = %err,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "destroy attempt failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                return DestroyOutcome::Failed {
                    error: err,
                    attempts: attempt,
                };
            }
        }
    }
}

fn report(activity: &dyn ActivityRecorder, handle: &ResourceHandle, outcome: &DestroyOutcome) {
    let kind = match outcome {
        DestroyOutcome::Destroyed { attempts } => {
            info!(attempts, "droplet destroyed");
            ActivityKind::Destroyed
        }
        DestroyOutcome::AlreadyGone { attempts } => {
            info!(attempts, "droplet already deleted");
            ActivityKind::AlreadyGone
        }
        DestroyOutcome::Failed { error: err, attempts } => {
            error!(
                resource_id = %handle.resource_id,
                cloud = %handle.cloud_name,
                provisioning_id = %handle.provisioning_id,
                attempts,
                error = %err,
                "failed to destroy droplet; manual cleanup required"
            );
            ActivityKind::DestroyFailed {
                message: err.to_string(),
            }
        }
        DestroyOutcome::Aborted { message } => {
            error!(
                resource_id = %handle.resource_id,
                cloud = %handle.cloud_name,
                provisioning_id = %handle.provisioning_id,
                reason = %message,
                "destroy of droplet abandoned; manual cleanup required"
            );
            ActivityKind::DestroyFailed {
                message: message.clone(),
            }
        }
    };
    activity.record(ActivityEvent::now(
        handle.provisioning_id,
        Some(handle.resource_id),
        kind,
    ));
}

#[cfg(test)]
mod tests;
