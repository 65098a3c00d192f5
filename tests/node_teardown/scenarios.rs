//! BDD scenarios for node teardown.

use rstest_bdd_macros::scenario;

use super::test_helpers::{TeardownWorld, teardown_world};

#[scenario(
    path = "tests/features/node_teardown.feature",
    name = "Destroy the droplet of a terminated node"
)]
fn scenario_destroy_droplet(teardown_world: TeardownWorld) {
    drop(teardown_world);
}

#[scenario(
    path = "tests/features/node_teardown.feature",
    name = "Treat a droplet that is already gone as destroyed"
)]
fn scenario_droplet_already_gone(teardown_world: TeardownWorld) {
    drop(teardown_world);
}

#[scenario(
    path = "tests/features/node_teardown.feature",
    name = "Dispose of the node even when the provider rejects the delete"
)]
fn scenario_provider_rejects_delete(teardown_world: TeardownWorld) {
    drop(teardown_world);
}

#[scenario(
    path = "tests/features/node_teardown.feature",
    name = "Skip teardown when the cloud is not registered"
)]
fn scenario_unknown_cloud(teardown_world: TeardownWorld) {
    drop(teardown_world);
}
