//! Construction parameters for a provisioned node.

use std::collections::{BTreeMap, BTreeSet};

use camino::Utf8PathBuf;

use super::NodeError;
use crate::activity::ProvisioningId;
use crate::credentials::Secret;
use crate::provider::ResourceId;

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

const FORBIDDEN_NAME_CHARS: &[char] = &[
    '?', '*', '/', '\\', '%', '!', '@', '#', '$', '^', '&', '|', '<', '>', '[', ']', ':', ';',
];

/// How the orchestration framework connects an agent to the node.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Launcher {
    /// The controller connects over SSH using the node's port, admin user
    /// and private key.
    #[default]
    Ssh,
    /// The agent on the node dials back to the controller.
    Inbound,
}

/// When the scheduler may reclaim the node.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RetentionStrategy {
    /// Reclaim after the node's idle-termination minutes.
    #[default]
    Idle,
    /// Reclaim after a single build.
    Once,
    /// Keep until explicitly released.
    Always,
}

/// Validated parameters of a [`ProvisionedNode`](super::ProvisionedNode).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeSpec {
    pub(super) provisioning_id: ProvisioningId,
    pub(super) cloud_name: String,
    pub(super) name: String,
    pub(super) description: String,
    pub(super) resource_id: Option<ResourceId>,
    pub(super) private_key: Secret,
    pub(super) remote_admin: String,
    pub(super) remote_fs: Utf8PathBuf,
    pub(super) ssh_port: u16,
    pub(super) executors: u32,
    pub(super) idle_termination_minutes: i32,
    pub(super) labels: BTreeSet<String>,
    pub(super) launcher: Launcher,
    pub(super) retention: RetentionStrategy,
    pub(super) properties: BTreeMap<String, String>,
    pub(super) init_script: Option<String>,
}

impl NodeSpec {
    /// Starts a builder for a [`NodeSpec`].
    #[must_use]
    pub fn builder() -> NodeSpecBuilder {
        NodeSpecBuilder::new()
    }
}

/// Builder for [`NodeSpec`] that trims and validates on [`build`](Self::build).
#[derive(Clone, Debug)]
pub struct NodeSpecBuilder {
    provisioning_id: Option<ProvisioningId>,
    cloud_name: String,
    name: String,
    description: String,
    resource_id: Option<ResourceId>,
    private_key: Secret,
    remote_admin: String,
    remote_fs: String,
    ssh_port: u16,
    executors: u32,
    idle_termination_minutes: i32,
    labels: String,
    launcher: Launcher,
    retention: RetentionStrategy,
    properties: BTreeMap<String, String>,
    init_script: Option<String>,
}

impl Default for NodeSpecBuilder {
    fn default() -> Self {
        Self {
            provisioning_id: None,
            cloud_name: String::new(),
            name: String::new(),
            description: String::new(),
            resource_id: None,
            private_key: Secret::new(""),
            remote_admin: String::new(),
            remote_fs: String::new(),
            ssh_port: DEFAULT_SSH_PORT,
            executors: 1,
            idle_termination_minutes: 0,
            labels: String::new(),
            launcher: Launcher::default(),
            retention: RetentionStrategy::default(),
            properties: BTreeMap::new(),
            init_script: None,
        }
    }
}

impl NodeSpecBuilder {
    /// Creates a builder with default port, executor count and policies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the provisioning id. A fresh id is generated when unset.
    #[must_use]
    pub const fn provisioning_id(mut self, value: ProvisioningId) -> Self {
        self.provisioning_id = Some(value);
        self
    }

    /// Sets the cloud configuration name.
    #[must_use]
    pub fn cloud_name(mut self, value: impl Into<String>) -> Self {
        self.cloud_name = value.into();
        self
    }

    /// Sets the node name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the free-form description.
    #[must_use]
    pub fn description(mut self, value: impl Into<String>) -> Self {
        self.description = value.into();
        self
    }

    /// Sets the backing droplet id, if known.
    #[must_use]
    pub const fn resource_id(mut self, value: Option<ResourceId>) -> Self {
        self.resource_id = value;
        self
    }

    /// Sets the private key used to reach the node.
    #[must_use]
    pub fn private_key(mut self, value: Secret) -> Self {
        self.private_key = value;
        self
    }

    /// Sets the remote admin user, stored verbatim. Empty means `root`.
    #[must_use]
    pub fn remote_admin(mut self, value: impl Into<String>) -> Self {
        self.remote_admin = value.into();
        self
    }

    /// Sets the absolute workspace root on the node.
    #[must_use]
    pub fn remote_fs(mut self, value: impl Into<String>) -> Self {
        self.remote_fs = value.into();
        self
    }

    /// Sets the SSH port.
    #[must_use]
    pub const fn ssh_port(mut self, value: u16) -> Self {
        self.ssh_port = value;
        self
    }

    /// Sets the number of executors.
    #[must_use]
    pub const fn executors(mut self, value: u32) -> Self {
        self.executors = value;
        self
    }

    /// Sets the idle-termination policy in minutes.
    #[must_use]
    pub const fn idle_termination_minutes(mut self, value: i32) -> Self {
        self.idle_termination_minutes = value;
        self
    }

    /// Sets the whitespace-separated label string.
    #[must_use]
    pub fn labels(mut self, value: impl Into<String>) -> Self {
        self.labels = value.into();
        self
    }

    /// Sets the launch mechanism.
    #[must_use]
    pub const fn launcher(mut self, value: Launcher) -> Self {
        self.launcher = value;
        self
    }

    /// Sets the retention strategy.
    #[must_use]
    pub const fn retention(mut self, value: RetentionStrategy) -> Self {
        self.retention = value;
        self
    }

    /// Adds a node property.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Sets the first-boot init script.
    #[must_use]
    pub fn init_script(mut self, value: Option<String>) -> Self {
        self.init_script = value;
        self
    }

    /// Builds and validates the [`NodeSpec`].
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Config`] when the cloud name is blank, the node
    /// name is blank or contains a reserved character, the workspace root is
    /// not an absolute path, or the port or executor count is zero.
    pub fn build(self) -> Result<NodeSpec, NodeError> {
        let cloud_name = self.cloud_name.trim().to_owned();
        if cloud_name.is_empty() {
            return Err(NodeError::config("cloud_name", "must not be empty"));
        }
        let name = self.name.trim().to_owned();
        if name.is_empty() {
            return Err(NodeError::config("name", "must not be empty"));
        }
        if let Some(bad) = name.chars().find(|ch| FORBIDDEN_NAME_CHARS.contains(ch)) {
            return Err(NodeError::config(
                "name",
                format!("contains reserved character '{bad}'"),
            ));
        }
        let remote_fs = Utf8PathBuf::from(self.remote_fs.trim());
        if !remote_fs.is_absolute() {
            return Err(NodeError::config(
                "remote_fs",
                format!("'{remote_fs}' is not an absolute path"),
            ));
        }
        if self.ssh_port == 0 {
            return Err(NodeError::config("ssh_port", "must be between 1 and 65535"));
        }
        if self.executors == 0 {
            return Err(NodeError::config("executors", "must be at least 1"));
        }

        Ok(NodeSpec {
            provisioning_id: self
                .provisioning_id
                .unwrap_or_else(ProvisioningId::generate),
            cloud_name,
            name,
            description: self.description.trim().to_owned(),
            resource_id: self.resource_id,
            private_key: self.private_key,
            remote_admin: self.remote_admin,
            remote_fs,
            ssh_port: self.ssh_port,
            executors: self.executors,
            idle_termination_minutes: self.idle_termination_minutes,
            labels: self
                .labels
                .split_whitespace()
                .map(str::to_owned)
                .collect(),
            launcher: self.launcher,
            retention: self.retention,
            properties: self.properties,
            init_script: self
                .init_script
                .filter(|script| !script.trim().is_empty()),
        })
    }
}
