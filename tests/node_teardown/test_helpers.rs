//! Shared fixtures for node teardown BDD scenarios.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nodekeeper::test_support::ScriptedProvider;
use nodekeeper::{
    ActivityLog, CloudRegistry, CoordinatorSettings, DestroyOutcome, DestructionCoordinator,
    ProvisionedNode, RetryPolicy, Secret, StaticCredentials, TeardownContext,
};
use rstest::fixture;
use tokio::runtime::{Builder, Runtime};

pub const CREDENTIAL_ID: &str = "do-east-token";
pub const TOKEN: &str = "dop_v1_bdd";

/// Scenario state shared by reference between steps.
pub struct TeardownWorld {
    pub runtime: Runtime,
    pub provider: ScriptedProvider,
    pub registry: CloudRegistry,
    pub credentials: StaticCredentials,
    pub activity: ActivityLog,
    pub node: Mutex<Option<ProvisionedNode>>,
    pub admin_before_termination: Mutex<Option<String>>,
    pub outcome: Mutex<Option<DestroyOutcome>>,
}

impl TeardownWorld {
    pub fn teardown_context(&self) -> TeardownContext {
        let coordinator = DestructionCoordinator::new(
            self.provider.clone(),
            self.runtime.handle().clone(),
            CoordinatorSettings {
                retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_secs(5)),
                max_concurrent: 2,
            },
        )
        .with_activity(Arc::new(self.activity.clone()));
        TeardownContext::new(
            self.registry.clone(),
            Arc::new(self.credentials.clone()),
            Arc::new(coordinator),
        )
        .with_activity(Arc::new(self.activity.clone()))
    }

    pub fn node(&self) -> MutexGuard<'_, Option<ProvisionedNode>> {
        self.node.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn admin_before_termination(&self) -> MutexGuard<'_, Option<String>> {
        self.admin_before_termination
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn outcome(&self) -> MutexGuard<'_, Option<DestroyOutcome>> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_token(&self) {
        self.credentials.insert(CREDENTIAL_ID, Secret::new(TOKEN));
    }
}

#[fixture]
pub fn teardown_world() -> TeardownWorld {
    let runtime = Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap_or_else(|err| panic!("tokio runtime should build: {err}"));
    TeardownWorld {
        runtime,
        provider: ScriptedProvider::new(),
        registry: CloudRegistry::new(),
        credentials: StaticCredentials::new(),
        activity: ActivityLog::new(),
        node: Mutex::new(None),
        admin_before_termination: Mutex::new(None),
        outcome: Mutex::new(None),
    }
}
