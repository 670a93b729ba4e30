//! `husk create` — Create a container from a bundle.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use husk_common::types::ContainerId;
use husk_runtime::engine::{CreateOptions, Engine};

/// Arguments for the `create` command.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Container identifier.
    pub id: ContainerId,

    /// Bundle directory containing `config.json`.
    #[arg(short, long, default_value = ".")]
    pub bundle: PathBuf,

    /// Unix socket that receives the pty master for terminal containers.
    #[arg(short = 's', long)]
    pub console_socket: Option<PathBuf>,

    /// File to write the container process PID to.
    #[arg(short, long)]
    pub pid_file: Option<PathBuf>,
}

/// Executes the `create` command.
///
/// # Errors
///
/// Returns an error if the bundle is invalid or any creation step fails;
/// the partially created container is removed first.
pub fn execute(args: CreateArgs, engine: &Engine) -> anyhow::Result<()> {
    let id = args.id.clone();
    let state = engine
        .create(&CreateOptions {
            id: args.id,
            bundle: args.bundle,
            console_socket: args.console_socket,
            pid_file: args.pid_file,
        })
        .with_context(|| format!("creating container {id}"))?;
    tracing::info!(%id, pid = ?state.pid, "created");
    Ok(())
}
