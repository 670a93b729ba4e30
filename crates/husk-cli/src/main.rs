//! # husk — OCI container runtime
//!
//! Creates, starts, signals and deletes containers from OCI bundles.
//! The same binary re-enters itself through the hidden `init` subcommand
//! to become a container's launcher.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;
mod logging;
mod output;

use clap::Parser;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log.as_deref(), cli.log_format)?;
    commands::execute(cli)
}
