//! `husk state` — Print a container's persisted state.

use anyhow::Context;
use clap::Args;
use husk_common::types::ContainerId;
use husk_runtime::engine::Engine;

use crate::output;

/// Arguments for the `state` command.
#[derive(Args, Debug)]
pub struct StateArgs {
    /// Container identifier.
    pub id: ContainerId,
}

/// Executes the `state` command.
///
/// # Errors
///
/// Returns an error if the container does not exist or its state cannot
/// be read.
pub fn execute(args: &StateArgs, engine: &Engine) -> anyhow::Result<()> {
    let state = engine
        .state(&args.id)
        .with_context(|| format!("reading state of {}", args.id))?;
    output::print_json(&state)
}
