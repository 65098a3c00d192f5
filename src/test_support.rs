//! Test support utilities shared across unit and integration tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing_subscriber::fmt::MakeWriter;

use crate::credentials::Secret;
use crate::destroy::{DestroyOutcome, DestroyScheduler, DestroyTicket};
use crate::provider::{CloudProvider, DeleteOutcome, ProviderError, ProviderFuture, ResourceHandle};

const GATE_RELEASE_PERMITS: usize = 1024;

#[derive(Debug, Default)]
struct ProviderState {
    responses: VecDeque<Result<DeleteOutcome, ProviderError>>,
    calls: Vec<ResourceHandle>,
    tokens: Vec<String>,
    completed: usize,
    delay: Duration,
}

/// Scripted cloud provider returning pre-seeded results in FIFO order.
///
/// Once the queue is empty every call succeeds with
/// [`DeleteOutcome::Deleted`].
#[derive(Clone, Debug, Default)]
pub struct ScriptedProvider {
    state: Arc<Mutex<ProviderState>>,
    gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
}

impl ScriptedProvider {
    /// Creates a provider with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a successful delete.
    pub fn push_deleted(&self) {
        self.state().responses.push_back(Ok(DeleteOutcome::Deleted));
    }

    /// Queues a not-found response.
    pub fn push_not_found(&self) {
        self.state().responses.push_back(Ok(DeleteOutcome::NotFound));
    }

    /// Queues a provider error.
    pub fn push_error(&self, error: ProviderError) {
        self.state().responses.push_back(Err(error));
    }

    /// Makes every call sleep for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = delay;
    }

    /// Holds every call until [`ScriptedProvider::release`] is invoked.
    pub fn hold_calls(&self) {
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::new(Semaphore::new(0)));
    }

    /// Lets held calls proceed.
    pub fn release(&self) {
        if let Some(gate) = self
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            gate.add_permits(GATE_RELEASE_PERMITS);
        }
    }

    /// Handles passed to the provider so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<ResourceHandle> {
        self.state().calls.clone()
    }

    /// Tokens passed to the provider so far.
    #[must_use]
    pub fn tokens(&self) -> Vec<String> {
        self.state().tokens.clone()
    }

    /// Number of calls that returned a result.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.state().completed
    }
}

impl CloudProvider for ScriptedProvider {
    fn delete_resource<'a>(
        &'a self,
        token: &'a Secret,
        handle: &'a ResourceHandle,
    ) -> ProviderFuture<'a, DeleteOutcome> {
        Box::pin(async move {
            let delay = {
                let mut state = self.state();
                state.calls.push(handle.clone());
                state.tokens.push(token.expose().to_owned());
                state.delay
            };
            let gate = self
                .gate
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(semaphore) = gate {
                let _permit = semaphore.acquire().await.ok();
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let mut state = self.state();
            state.completed += 1;
            state
                .responses
                .pop_front()
                .unwrap_or(Ok(DeleteOutcome::Deleted))
        })
    }
}

/// Destroy scheduler that records requests and never spawns anything.
#[derive(Clone, Debug, Default)]
pub struct RecordingScheduler {
    requests: Arc<Mutex<Vec<(String, ResourceHandle)>>>,
}

impl RecordingScheduler {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles received so far.
    #[must_use]
    pub fn handles(&self) -> Vec<ResourceHandle> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handle)| handle.clone())
            .collect()
    }

    /// Tokens received so far.
    #[must_use]
    pub fn tokens(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(token, _)| token.clone())
            .collect()
    }
}

impl DestroyScheduler for RecordingScheduler {
    fn destroy_async(&self, token: Secret, handle: ResourceHandle) -> DestroyTicket {
        let resource_id = handle.resource_id;
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((token.expose().to_owned(), handle));
        DestroyTicket::ready(resource_id, DestroyOutcome::Destroyed { attempts: 1 })
    }
}

/// Captures formatted `tracing` output for assertions.
///
/// Install with `tracing::subscriber::set_default(capture.subscriber())`.
/// Spawned tasks are only captured on a current-thread runtime.
#[derive(Clone, Debug, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

/// Writer handed out by [`LogCapture`].
#[derive(Debug)]
pub struct CaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

impl LogCapture {
    /// Creates an empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscriber writing plain-text, debug-level output into this capture.
    #[must_use]
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + use<> {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish()
    }

    /// Everything captured so far.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
            .into_owned()
    }

    /// Returns `true` if any line was logged at `level` (for example `"ERROR"`).
    #[must_use]
    pub fn has_level(&self, level: &str) -> bool {
        let marker = format!(" {level} ");
        self.contents().lines().any(|line| line.contains(&marker))
    }
}
