//! Provisioning activity records.
//!
//! Every node carries a [`ProvisioningId`]. Teardown milestones are reported
//! to an [`ActivityRecorder`] under that id so operators can follow a node
//! from termination to the final destroy outcome, and find droplets that
//! were left behind.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::provider::ResourceId;

/// Identifier correlating a node with its provisioning activity.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ProvisioningId(Uuid);

impl ProvisioningId {
    /// Allocates a fresh, never reused identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing identifier.
    #[must_use]
    pub const fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ProvisioningId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Milliseconds since the Unix epoch, saturating on clock errors.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

/// Milestone in the teardown of one node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ActivityKind {
    /// Termination started.
    Terminating,
    /// The node had no droplet reference.
    NothingToDestroy,
    /// A destroy task was handed to the coordinator.
    DestroyScheduled,
    /// Teardown was skipped; the droplet may still exist.
    OrphanSuspected {
        /// Why the destroy could not be requested.
        reason: String,
    },
    /// The provider accepted the delete.
    Destroyed,
    /// The provider reported the droplet as already deleted.
    AlreadyGone,
    /// Every destroy attempt failed.
    DestroyFailed {
        /// Last error reported by the provider.
        message: String,
    },
    /// The node object finished termination.
    Terminated,
}

impl ActivityKind {
    const fn leaves_orphan(&self) -> bool {
        matches!(
            self,
            Self::OrphanSuspected { .. } | Self::DestroyFailed { .. }
        )
    }
}

/// One recorded milestone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActivityEvent {
    /// Activity the event belongs to.
    pub provisioning_id: ProvisioningId,
    /// Droplet involved, when known.
    pub resource_id: Option<ResourceId>,
    /// Wall-clock time of the event in epoch milliseconds.
    pub at_millis: u64,
    /// What happened.
    pub kind: ActivityKind,
}

impl ActivityEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn now(
        provisioning_id: ProvisioningId,
        resource_id: Option<ResourceId>,
        kind: ActivityKind,
    ) -> Self {
        Self {
            provisioning_id,
            resource_id,
            at_millis: now_millis(),
            kind,
        }
    }
}

/// Sink for activity events. Implementations must not block.
pub trait ActivityRecorder: Send + Sync {
    /// Stores or forwards `event`.
    fn record(&self, event: ActivityEvent);
}

/// Recorder that drops every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopActivity;

impl ActivityRecorder for NoopActivity {
    fn record(&self, _event: ActivityEvent) {}
}

/// In-memory activity log shared between nodes and destroy tasks.
#[derive(Clone, Debug, Default)]
pub struct ActivityLog {
    events: Arc<Mutex<Vec<ActivityEvent>>>,
}

impl ActivityLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every event in recording order.
    #[must_use]
    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the events recorded for one provisioning activity.
    #[must_use]
    pub fn events_for(&self, provisioning_id: ProvisioningId) -> Vec<ActivityEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.provisioning_id == provisioning_id)
            .collect()
    }

    /// Returns the latest event of each activity whose droplet may still
    /// exist and needs manual cleanup.
    #[must_use]
    pub fn orphans(&self) -> Vec<ActivityEvent> {
        let events = self.events();
        let mut latest: Vec<ActivityEvent> = Vec::new();
        for event in events {
            if event.kind == ActivityKind::Terminated {
                continue;
            }
            latest.retain(|seen| seen.provisioning_id != event.provisioning_id);
            latest.push(event);
        }
        latest.retain(|event| event.kind.leaves_orphan());
        latest
    }
}

impl ActivityRecorder for ActivityLog {
    fn record(&self, event: ActivityEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
