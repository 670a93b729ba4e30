//! CLI command definitions and dispatch.

pub mod create;
pub mod delete;
pub mod init;
pub mod kill;
pub mod start;
pub mod state;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use husk_common::config::HuskConfig;
use husk_common::constants;
use husk_runtime::engine::Engine;

use crate::logging::LogFormat;

/// husk — OCI container runtime.
#[derive(Parser, Debug)]
#[command(name = "husk", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Runtime root holding container state.
    #[arg(long, global = true, env = "HUSK_ROOT", default_value = constants::DEFAULT_ROOT_DIR)]
    pub root: PathBuf,

    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    pub log: Option<PathBuf>,

    /// Log line format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Seconds `create` waits for the launcher to report ready.
    #[arg(long, global = true, default_value_t = constants::DEFAULT_READY_TIMEOUT_SECS)]
    pub ready_timeout: u64,
}

impl Cli {
    /// Runtime configuration derived from the global flags.
    pub fn config(&self) -> HuskConfig {
        HuskConfig {
            ready_timeout_secs: self.ready_timeout,
            ..HuskConfig::with_root(&self.root)
        }
    }

    /// Global flags the launcher needs to log the same way; `--root` is
    /// added by the launcher itself.
    pub fn launcher_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(log) = &self.log {
            args.push("--log".to_owned());
            args.push(log.display().to_string());
        }
        args.push("--log-format".to_owned());
        args.push(self.log_format.as_str().to_owned());
        args
    }

    /// Engine over [`Cli::config`].
    pub fn engine(&self) -> Engine {
        Engine::new(self.config()).with_launcher_args(self.launcher_args())
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a container from a bundle and park it before the user program.
    Create(create::CreateArgs),
    /// Release a created container's user program.
    Start(start::StartArgs),
    /// Send a signal to a container's process.
    Kill(kill::KillArgs),
    /// Remove a container and its resources.
    Delete(delete::DeleteArgs),
    /// Print a container's state as JSON.
    State(state::StateArgs),
    /// Launcher entry point, used by `create` only.
    #[command(hide = true)]
    Init(init::InitArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let engine = cli.engine();
    match cli.command {
        Command::Create(args) => create::execute(args, &engine),
        Command::Start(args) => start::execute(&args, &engine),
        Command::Kill(args) => kill::execute(&args, &engine),
        Command::Delete(args) => delete::execute(&args, &engine),
        Command::State(args) => state::execute(&args, &engine),
        Command::Init(args) => init::execute(&args, engine.config()),
    }
}
