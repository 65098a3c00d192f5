//! BDD step definitions for node teardown.

use nodekeeper::{
    CloudSettings, DestroyOutcome, NodeSpec, NodeState, ProviderError, ProvisionedNode,
    ResourceId, TerminationOutcome,
};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{CREDENTIAL_ID, TOKEN, TeardownWorld};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a cloud \"{cloud}\" with a valid API token")]
fn cloud_with_token(teardown_world: &TeardownWorld, cloud: String) -> Result<(), StepError> {
    let settings = CloudSettings::new(cloud, CREDENTIAL_ID, "https://api.example.test/v2")
        .map_err(|err| StepError::Assertion(format!("cloud settings: {err}")))?;
    teardown_world.registry.register(settings);
    teardown_world.insert_token();
    Ok(())
}

#[given("the droplet delete succeeds")]
fn delete_succeeds(teardown_world: &TeardownWorld) {
    teardown_world.provider.push_deleted();
}

#[given("the droplet is already gone")]
fn droplet_already_gone(teardown_world: &TeardownWorld) {
    teardown_world.provider.push_not_found();
}

#[given("the provider rejects the API token")]
fn provider_rejects_token(teardown_world: &TeardownWorld) {
    teardown_world.provider.push_error(ProviderError::Unauthorized {
        status: 401,
        message: String::from("Unable to authenticate you"),
    });
}

#[given("a provisioned node on \"{cloud}\" backed by droplet {droplet:u64} with no remote admin")]
fn provisioned_node(
    teardown_world: &TeardownWorld,
    cloud: String,
    droplet: u64,
) -> Result<(), StepError> {
    let spec = NodeSpec::builder()
        .cloud_name(cloud)
        .name("do-build-bdd")
        .remote_fs("/home/build")
        .remote_admin("")
        .resource_id(Some(ResourceId::new(droplet)))
        .build()
        .map_err(|err| StepError::Assertion(format!("node spec: {err}")))?;
    let node = ProvisionedNode::new(spec, teardown_world.teardown_context());
    *teardown_world.node() = Some(node);
    Ok(())
}

#[when("the node is terminated")]
fn terminate_node(teardown_world: &TeardownWorld) -> Result<(), StepError> {
    let node_guard = teardown_world.node();
    let node = node_guard
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing node")))?;
    *teardown_world.admin_before_termination() = Some(node.effective_remote_admin().to_owned());

    match node.terminate() {
        TerminationOutcome::DestroyScheduled(ticket) => {
            let outcome = teardown_world.runtime.block_on(ticket.outcome());
            *teardown_world.outcome() = Some(outcome);
            Ok(())
        }
        TerminationOutcome::Skipped(_) | TerminationOutcome::NothingToDestroy => Ok(()),
        TerminationOutcome::AlreadyTerminated => Err(StepError::Assertion(String::from(
            "node was already terminated",
        ))),
    }
}

#[then("the effective remote admin before termination was \"{admin}\"")]
fn admin_before_termination(
    teardown_world: &TeardownWorld,
    admin: String,
) -> Result<(), StepError> {
    let recorded = teardown_world.admin_before_termination().clone();
    if recorded.as_deref() == Some(admin.as_str()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected remote admin {admin}, got {recorded:?}"
        )))
    }
}

#[then("exactly one destroy call targeted droplet {droplet:u64}")]
fn one_destroy_call(teardown_world: &TeardownWorld, droplet: u64) -> Result<(), StepError> {
    let calls = teardown_world.provider.calls();
    let [call] = calls.as_slice() else {
        return Err(StepError::Assertion(format!(
            "expected one destroy call, got {}",
            calls.len()
        )));
    };
    if call.resource_id != ResourceId::new(droplet) {
        return Err(StepError::Assertion(format!(
            "expected droplet {droplet}, got {}",
            call.resource_id
        )));
    }
    if teardown_world.provider.tokens() != [TOKEN] {
        return Err(StepError::Assertion(String::from(
            "destroy call did not carry the resolved token",
        )));
    }
    Ok(())
}

#[then("no destroy call is issued")]
fn no_destroy_call(teardown_world: &TeardownWorld) -> Result<(), StepError> {
    let calls = teardown_world.provider.calls();
    if calls.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no destroy calls, got {calls:?}"
        )))
    }
}

#[then("the node is disposed")]
fn node_disposed(teardown_world: &TeardownWorld) -> Result<(), StepError> {
    let state = teardown_world.node().as_ref().map(ProvisionedNode::state);
    if state == Some(NodeState::Terminated) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected terminated node, got {state:?}"
        )))
    }
}

#[then("the destroy outcome is \"{expected}\"")]
fn destroy_outcome(teardown_world: &TeardownWorld, expected: String) -> Result<(), StepError> {
    let outcome = teardown_world.outcome().clone();
    let matches = match (expected.as_str(), &outcome) {
        ("destroyed", Some(DestroyOutcome::Destroyed { .. }))
        | ("already gone", Some(DestroyOutcome::AlreadyGone { .. }))
        | ("failed", Some(DestroyOutcome::Failed { .. })) => true,
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected} outcome, got {outcome:?}"
        )))
    }
}

#[then("the droplet is reported as a suspected orphan")]
fn reported_orphan(teardown_world: &TeardownWorld) -> Result<(), StepError> {
    let orphans = teardown_world.activity.orphans();
    let node_id = teardown_world
        .node()
        .as_ref()
        .map(ProvisionedNode::provisioning_id);
    let [orphan] = orphans.as_slice() else {
        return Err(StepError::Assertion(format!(
            "expected one orphan, got {orphans:?}"
        )));
    };
    if Some(orphan.provisioning_id) == node_id {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected orphan for {node_id:?}, got {orphan:?}"
        )))
    }
}
