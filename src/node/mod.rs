//! Cloud-backed build nodes and their teardown.
//!
//! A [`ProvisionedNode`] wraps a droplet that already exists. Its only
//! side-effecting operation is [`ProvisionedNode::terminate`], which resolves
//! the owning cloud and its token, hands the destroy to a
//! [`DestroyScheduler`], and returns without waiting. Teardown failures never
//! escape `terminate`: they are logged and recorded as activity so the
//! orchestration framework can always finish disposing of the node.

mod spec;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use camino::Utf8Path;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::activity::{
    ActivityEvent, ActivityKind, ActivityRecorder, NoopActivity, ProvisioningId, now_millis,
};
use crate::credentials::{CredentialError, CredentialResolver, Secret};
use crate::destroy::{DestroyScheduler, DestroyTicket};
use crate::provider::{ResourceHandle, ResourceId};
use crate::registry::{CloudRegistry, CloudSettings};

pub use spec::{DEFAULT_SSH_PORT, Launcher, NodeSpec, NodeSpecBuilder, RetentionStrategy};

/// Admin user assumed when none is configured.
pub const DEFAULT_REMOTE_ADMIN: &str = "root";

/// Errors raised while constructing a node.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum NodeError {
    /// Raised when an identity or network parameter is invalid.
    #[error("invalid node configuration: {field} {reason}")]
    Config {
        /// Offending parameter.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl NodeError {
    fn config(field: &str, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Lifecycle state of a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeState {
    /// The droplet exists and the node may run builds.
    Active,
    /// `terminate` is in progress.
    Terminating,
    /// Terminal; the node must not be used again.
    Terminated,
}

const ACTIVE: u8 = 0;
const TERMINATING: u8 = 1;
const TERMINATED: u8 = 2;

impl NodeState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            ACTIVE => Self::Active,
            TERMINATING => Self::Terminating,
            _ => Self::Terminated,
        }
    }
}

/// Why `terminate` did not request a destroy for an existing droplet.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SkipReason {
    /// The cloud configuration was removed while the node was running.
    #[error("cloud '{cloud_name}' is no longer configured")]
    CloudNotFound {
        /// Name the node was created with.
        cloud_name: String,
    },
    /// The API token for the cloud could not be resolved.
    #[error("credential unavailable: {0}")]
    Credential(#[from] CredentialError),
}

/// Result of [`ProvisionedNode::terminate`].
#[derive(Debug)]
pub enum TerminationOutcome {
    /// A destroy task was scheduled; the ticket may be awaited or dropped.
    DestroyScheduled(DestroyTicket),
    /// The node had no droplet reference.
    NothingToDestroy,
    /// The droplet may have been left behind.
    Skipped(SkipReason),
    /// `terminate` had already been called.
    AlreadyTerminated,
}

/// Collaborators a node needs to tear down its droplet.
#[derive(Clone)]
pub struct TeardownContext {
    registry: CloudRegistry,
    credentials: Arc<dyn CredentialResolver>,
    scheduler: Arc<dyn DestroyScheduler>,
    activity: Arc<dyn ActivityRecorder>,
}

impl TeardownContext {
    /// Bundles the registry, credential resolver and destroy scheduler.
    #[must_use]
    pub fn new(
        registry: CloudRegistry,
        credentials: Arc<dyn CredentialResolver>,
        scheduler: Arc<dyn DestroyScheduler>,
    ) -> Self {
        Self {
            registry,
            credentials,
            scheduler,
            activity: Arc::new(NoopActivity),
        }
    }

    /// Reports node milestones to `activity`.
    #[must_use]
    pub fn with_activity(mut self, activity: Arc<dyn ActivityRecorder>) -> Self {
        self.activity = activity;
        self
    }
}

impl fmt::Debug for TeardownContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeardownContext")
            .field("clouds", &self.registry.names())
            .finish_non_exhaustive()
    }
}

/// Runtime-facing counterpart of a node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ComputeSession {
    node_name: String,
    provisioning_id: ProvisioningId,
    created_at_millis: u64,
}

impl ComputeSession {
    /// Name of the node the session is bound to.
    #[must_use]
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Provisioning id of the bound node.
    #[must_use]
    pub const fn provisioning_id(&self) -> ProvisioningId {
        self.provisioning_id
    }

    /// Creation time in epoch milliseconds.
    #[must_use]
    pub const fn created_at_millis(&self) -> u64 {
        self.created_at_millis
    }
}

/// Capabilities the orchestration framework relies on.
pub trait CloudNode: Send + Sync {
    /// Node name as shown in the framework's inventory.
    fn node_name(&self) -> &str;

    /// Identifier of the provisioning activity that created the node.
    fn provisioning_id(&self) -> ProvisioningId;

    /// Creates the compute session bound to this node.
    fn create_compute_session(&self) -> ComputeSession;

    /// Removes the node's cloud resource. Must not block on cloud I/O.
    fn terminate(&self) -> TerminationOutcome;
}

/// One cloud-backed build node.
pub struct ProvisionedNode {
    spec: NodeSpec,
    start_time_millis: u64,
    state: AtomicU8,
    teardown: TeardownContext,
}

impl ProvisionedNode {
    /// Creates an active node around an existing droplet.
    #[must_use]
    pub fn new(spec: NodeSpec, teardown: TeardownContext) -> Self {
        let node = Self {
            spec,
            start_time_millis: now_millis(),
            state: AtomicU8::new(ACTIVE),
            teardown,
        };
        debug!(
            node = %node.spec.name,
            provisioning_id = %node.spec.provisioning_id,
            cloud = %node.spec.cloud_name,
            "node created"
        );
        node
    }

    /// Builds a new [`ComputeSession`] bound to this node.
    #[must_use]
    pub fn create_compute_session(&self) -> ComputeSession {
        ComputeSession {
            node_name: self.spec.name.clone(),
            provisioning_id: self.spec.provisioning_id,
            created_at_millis: now_millis(),
        }
    }

    /// Looks up the node's cloud configuration in the registry.
    #[must_use]
    pub fn resolve_cloud(&self) -> Option<Arc<CloudSettings>> {
        self.teardown.registry.resolve(&self.spec.cloud_name)
    }

    /// Remote admin user, falling back to `root` when unset.
    #[must_use]
    pub fn effective_remote_admin(&self) -> &str {
        if self.spec.remote_admin.is_empty() {
            DEFAULT_REMOTE_ADMIN
        } else {
            &self.spec.remote_admin
        }
    }

    /// Requests destruction of the droplet and marks the node terminated.
    ///
    /// Returns immediately; the destroy itself runs on the scheduler. Only
    /// the first call has an effect.
    pub fn terminate(&self) -> TerminationOutcome {
        if self
            .state
            .compare_exchange(ACTIVE, TERMINATING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(node = %self.spec.name, "node already terminated");
            return TerminationOutcome::AlreadyTerminated;
        }

        info!(
            node = %self.spec.name,
            provisioning_id = %self.spec.provisioning_id,
            "terminating node"
        );
        self.record(ActivityKind::Terminating);
        let outcome = self.request_destroy();
        self.state.store(TERMINATED, Ordering::Release);
        self.record(ActivityKind::Terminated);
        outcome
    }

    fn request_destroy(&self) -> TerminationOutcome {
        let Some(resource_id) = self.spec.resource_id else {
            debug!(node = %self.spec.name, "no droplet to destroy");
            self.record(ActivityKind::NothingToDestroy);
            return TerminationOutcome::NothingToDestroy;
        };

        let Some(cloud) = self.resolve_cloud() else {
            return self.skip(
                resource_id,
                SkipReason::CloudNotFound {
                    cloud_name: self.spec.cloud_name.clone(),
                },
            );
        };

        let token = match self.teardown.credentials.resolve(&cloud.credential_id) {
            Ok(token) => token,
            Err(err) => return self.skip(resource_id, SkipReason::from(err)),
        };

        let handle = ResourceHandle {
            resource_id,
            cloud_name: cloud.name.clone(),
            api_endpoint: cloud.api_endpoint.clone(),
            provisioning_id: self.spec.provisioning_id,
        };
        self.record(ActivityKind::DestroyScheduled);
        TerminationOutcome::DestroyScheduled(self.teardown.scheduler.destroy_async(token, handle))
    }

    fn skip(&self, resource_id: ResourceId, reason: SkipReason) -> TerminationOutcome {
        error!(
            node = %self.spec.name,
            resource_id = %resource_id,
            cloud = %self.spec.cloud_name,
            provisioning_id = %self.spec.provisioning_id,
            reason = %reason,
            "cannot destroy droplet; it may be orphaned"
        );
        self.record(ActivityKind::OrphanSuspected {
            reason: reason.to_string(),
        });
        TerminationOutcome::Skipped(reason)
    }

    fn record(&self, kind: ActivityKind) {
        self.teardown.activity.record(ActivityEvent::now(
            self.spec.provisioning_id,
            self.spec.resource_id,
            kind,
        ));
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> NodeState {
        NodeState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Provisioning activity identifier.
    #[must_use]
    pub const fn provisioning_id(&self) -> ProvisioningId {
        self.spec.provisioning_id
    }

    /// Name of the owning cloud configuration.
    #[must_use]
    pub fn cloud_name(&self) -> &str {
        &self.spec.cloud_name
    }

    /// Node name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Free-form description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.spec.description
    }

    /// Construction time in epoch milliseconds.
    #[must_use]
    pub const fn start_time_millis(&self) -> u64 {
        self.start_time_millis
    }

    /// Milliseconds between construction and `now_millis`.
    #[must_use]
    pub const fn age_millis(&self, now_millis: u64) -> u64 {
        now_millis.saturating_sub(self.start_time_millis)
    }

    /// Backing droplet, if known.
    #[must_use]
    pub const fn resource_id(&self) -> Option<ResourceId> {
        self.spec.resource_id
    }

    /// Private key for remote access. Never log the exposed value.
    #[must_use]
    pub const fn private_key(&self) -> &Secret {
        &self.spec.private_key
    }

    /// Idle-termination policy in minutes.
    #[must_use]
    pub const fn idle_termination_minutes(&self) -> i32 {
        self.spec.idle_termination_minutes
    }

    /// First-boot init script.
    #[must_use]
    pub fn init_script(&self) -> Option<&str> {
        self.spec.init_script.as_deref()
    }

    /// SSH port.
    #[must_use]
    pub const fn ssh_port(&self) -> u16 {
        self.spec.ssh_port
    }

    /// Workspace root on the node.
    #[must_use]
    pub fn remote_fs(&self) -> &Utf8Path {
        &self.spec.remote_fs
    }

    /// Number of executors.
    #[must_use]
    pub const fn executors(&self) -> u32 {
        self.spec.executors
    }

    /// Labels used for build scheduling.
    #[must_use]
    pub const fn labels(&self) -> &BTreeSet<String> {
        &self.spec.labels
    }

    /// Launch mechanism.
    #[must_use]
    pub const fn launcher(&self) -> Launcher {
        self.spec.launcher
    }

    /// Retention strategy.
    #[must_use]
    pub const fn retention(&self) -> RetentionStrategy {
        self.spec.retention
    }

    /// Node properties.
    #[must_use]
    pub const fn properties(&self) -> &BTreeMap<String, String> {
        &self.spec.properties
    }
}

impl fmt::Debug for ProvisionedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionedNode")
            .field("name", &self.spec.name)
            .field("provisioning_id", &self.spec.provisioning_id)
            .field("cloud_name", &self.spec.cloud_name)
            .field("resource_id", &self.spec.resource_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CloudNode for ProvisionedNode {
    fn node_name(&self) -> &str {
        self.name()
    }

    fn provisioning_id(&self) -> ProvisioningId {
        self.spec.provisioning_id
    }

    fn create_compute_session(&self) -> ComputeSession {
        Self::create_compute_session(self)
    }

    fn terminate(&self) -> TerminationOutcome {
        Self::terminate(self)
    }
}
