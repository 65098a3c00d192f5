//! Command-line interface definitions for the `nodekeeper` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `nodekeeper` binary.
#[derive(Debug, Parser)]
#[command(
    name = "nodekeeper",
    about = "Tear down DigitalOcean droplets left behind by build nodes",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Destroy one droplet through the configured cloud.
    #[command(name = "destroy", about = "Destroy a droplet and wait for the outcome")]
    Destroy(DestroyCommand),
}

/// Arguments for the `nodekeeper destroy` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DestroyCommand {
    /// Droplet identifier to destroy.
    #[arg(value_name = "RESOURCE_ID")]
    pub(crate) resource_id: u64,
    /// Cloud configuration to destroy through instead of the configured one.
    #[arg(long, value_name = "NAME")]
    pub(crate) cloud: Option<String>,
    /// Override the configured number of attempts for this destroy.
    #[arg(long, value_name = "COUNT")]
    pub(crate) attempts: Option<u32>,
}
