//! `husk delete` — Remove a container.

use anyhow::Context;
use clap::Args;
use husk_common::types::ContainerId;
use husk_runtime::engine::Engine;

/// Arguments for the `delete` command.
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Container identifier.
    pub id: ContainerId,

    /// Kill a live container before removing it.
    #[arg(short, long)]
    pub force: bool,
}

/// Executes the `delete` command.
///
/// # Errors
///
/// Returns an error if the container does not exist or is not stopped
/// and `--force` was not given.
pub fn execute(args: &DeleteArgs, engine: &Engine) -> anyhow::Result<()> {
    engine
        .delete(&args.id, args.force)
        .with_context(|| format!("deleting container {}", args.id))
}
