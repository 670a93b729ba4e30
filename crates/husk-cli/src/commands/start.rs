//! `husk start` — Release a created container.

use anyhow::Context;
use clap::Args;
use husk_common::types::ContainerId;
use husk_runtime::engine::Engine;

/// Arguments for the `start` command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Container identifier.
    pub id: ContainerId,
}

/// Executes the `start` command.
///
/// Blocks until the container process exits.
///
/// # Errors
///
/// Returns an error if the container is not `created` or the handshake
/// fails.
pub fn execute(args: &StartArgs, engine: &Engine) -> anyhow::Result<()> {
    let _ = engine
        .start(&args.id)
        .with_context(|| format!("starting container {}", args.id))?;
    Ok(())
}
