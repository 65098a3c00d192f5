//! Binary entry point for the `nodekeeper` CLI.
//!
//! `nodekeeper destroy <RESOURCE_ID>` is the manual remediation path for
//! droplets reported as orphaned: it runs the same teardown a build node
//! performs and waits for the outcome.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

use nodekeeper::{
    ActivityLog, CloudRegistry, DestroyOutcome, DestructionCoordinator, DigitalOceanProvider,
    KeeperConfig, NodeError, NodeSpec, ProvisionedNode, ResourceId, TeardownContext,
    TerminationOutcome,
};

mod cli;

use cli::{Cli, DestroyCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("invalid node: {0}")]
    Node(#[from] NodeError),
    #[error("destroy skipped: {0}")]
    Skipped(String),
    #[error("destroy of droplet {resource_id} failed: {message}")]
    DestroyFailed { resource_id: u64, message: String },
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nodekeeper=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Destroy(command) => destroy_command(command).await,
    }
}

async fn destroy_command(args: DestroyCommand) -> Result<i32, CliError> {
    let mut config =
        KeeperConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    if let Some(cloud) = args.cloud {
        config.cloud_name = cloud;
    }
    if let Some(attempts) = args.attempts {
        config.max_attempts = attempts;
    }
    let settings = config
        .cloud_settings()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let registry = CloudRegistry::new();
    registry.register(settings);
    let activity = Arc::new(ActivityLog::new());
    let provider = DigitalOceanProvider::new(config.call_timeout())
        .map_err(|err| CliError::Provider(err.to_string()))?;
    let coordinator =
        DestructionCoordinator::new(provider, Handle::current(), config.coordinator_settings())
            .with_activity(activity.clone());

    let spec = NodeSpec::builder()
        .cloud_name(&config.cloud_name)
        .name(format!("manual-{}", args.resource_id))
        .description("manual droplet teardown")
        .remote_fs("/")
        .resource_id(Some(ResourceId::new(args.resource_id)))
        .build()?;
    let teardown =
        TeardownContext::new(registry, Arc::new(config.credentials()), Arc::new(coordinator))
            .with_activity(activity);
    let node = ProvisionedNode::new(spec, teardown);

    match node.terminate() {
        TerminationOutcome::DestroyScheduled(ticket) => {
            let outcome = ticket.outcome().await;
            report_outcome(args.resource_id, outcome)
        }
        TerminationOutcome::Skipped(reason) => Err(CliError::Skipped(reason.to_string())),
        TerminationOutcome::NothingToDestroy | TerminationOutcome::AlreadyTerminated => Ok(0),
    }
}

fn report_outcome(resource_id: u64, outcome: DestroyOutcome) -> Result<i32, CliError> {
    let line = match outcome {
        DestroyOutcome::Destroyed { attempts } => {
            format!("droplet {resource_id} destroyed after {attempts} attempt(s)")
        }
        DestroyOutcome::AlreadyGone { .. } => format!("droplet {resource_id} was already deleted"),
        DestroyOutcome::Failed { error, .. } => {
            return Err(CliError::DestroyFailed {
                resource_id,
                message: error.to_string(),
            });
        }
        DestroyOutcome::Aborted { message } => {
            return Err(CliError::DestroyFailed {
                resource_id,
                message,
            });
        }
    };
    writeln!(io::stdout(), "{line}").ok();
    Ok(0)
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
