//! `husk kill` — Signal a container's process.

use anyhow::Context;
use clap::Args;
use husk_common::types::ContainerId;
use husk_runtime::engine::Engine;
use husk_runtime::signal::parse_signal;
use nix::sys::signal::Signal;

/// Arguments for the `kill` command.
#[derive(Args, Debug)]
pub struct KillArgs {
    /// Container identifier.
    pub id: ContainerId,

    /// Signal name (`TERM`, `SIGTERM`) or number.
    #[arg(default_value = "SIGTERM", value_parser = parse_signal)]
    pub signal: Signal,
}

/// Executes the `kill` command.
///
/// # Errors
///
/// Returns an error if the container is neither `created` nor `running`,
/// or the signal cannot be delivered.
pub fn execute(args: &KillArgs, engine: &Engine) -> anyhow::Result<()> {
    let _ = engine
        .kill(&args.id, args.signal)
        .with_context(|| format!("killing container {}", args.id))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use crate::commands::{Cli, Command};

    use super::*;

    #[test]
    fn signal_defaults_to_sigterm() {
        let cli = Cli::parse_from(["husk", "kill", "web"]);
        let Command::Kill(args) = cli.command else {
            unreachable!("parsed kill");
        };
        assert_eq!(args.signal, Signal::SIGTERM);
    }

    #[test]
    fn signal_accepts_short_names_and_numbers() {
        for (input, expected) in [
            ("KILL", Signal::SIGKILL),
            ("9", Signal::SIGKILL),
            ("SIGHUP", Signal::SIGHUP),
        ] {
            let cli = Cli::parse_from(["husk", "kill", "web", input]);
            let Command::Kill(args) = cli.command else {
                unreachable!("parsed kill");
            };
            assert_eq!(args.signal, expected, "{input}");
        }
    }
}
