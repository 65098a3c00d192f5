//! Core library for the nodekeeper teardown service.
//!
//! The crate tracks ephemeral build nodes backed by DigitalOcean droplets and
//! makes sure each droplet is destroyed when its node goes away: terminate
//! the node → resolve cloud and token → destroy the droplet in the
//! background, logging and recording anything that could leave it orphaned.

pub mod activity;
pub mod config;
pub mod credentials;
pub mod destroy;
pub mod digitalocean;
pub mod node;
pub mod provider;
pub mod registry;
pub mod test_support;

pub use activity::{
    ActivityEvent, ActivityKind, ActivityLog, ActivityRecorder, NoopActivity, ProvisioningId,
};
pub use config::{ConfigError, KeeperConfig};
pub use credentials::{CredentialError, CredentialResolver, EnvCredentials, Secret, StaticCredentials};
pub use destroy::{
    CoordinatorSettings, DestroyOutcome, DestroyScheduler, DestroyTicket, DestructionCoordinator,
    RetryPolicy,
};
pub use digitalocean::DigitalOceanProvider;
pub use node::{
    CloudNode, ComputeSession, Launcher, NodeError, NodeSpec, NodeSpecBuilder, NodeState,
    ProvisionedNode, RetentionStrategy, SkipReason, TeardownContext, TerminationOutcome,
};
pub use provider::{CloudProvider, DeleteOutcome, ProviderError, ResourceHandle, ResourceId};
pub use registry::{CloudRegistry, CloudSettings, RegistryError};
