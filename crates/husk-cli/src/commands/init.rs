//! `husk init` — Launcher entry point (hidden).
//!
//! Only ever invoked by `create` through `/proc/self/exe`.

use anyhow::Context;
use clap::Args;
use husk_common::config::HuskConfig;
use husk_common::types::ContainerId;

/// Arguments for the hidden `init` command.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Container being launched.
    pub id: ContainerId,
}

/// Executes the launcher.
///
/// Returns only for a container without a process; otherwise the process
/// image is replaced by the user program.
///
/// # Errors
///
/// Returns an error for any failed launch step.
pub fn execute(args: &InitArgs, config: &HuskConfig) -> anyhow::Result<()> {
    husk_runtime::launcher::init::run(config, &args.id)
        .inspect_err(|e| tracing::error!(id = %args.id, error = %e, "launcher failed"))
        .with_context(|| format!("launching container {}", args.id))
}
