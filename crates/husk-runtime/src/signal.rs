//! Signal names accepted by `kill`.

use std::str::FromStr;

use husk_common::error::{HuskError, Result};
use nix::sys::signal::Signal;

/// Parses `TERM`, `SIGTERM`, `sigterm` or `15`.
///
/// # Errors
///
/// Returns [`HuskError::Validation`] for unknown names and numbers.
pub fn parse_signal(input: &str) -> Result<Signal> {
    let input = input.trim();
    if let Ok(number) = input.parse::<i32>() {
        return Signal::try_from(number)
            .map_err(|_| HuskError::validation(format!("unknown signal number {number}")));
    }

    let upper = input.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&name).map_err(|_| HuskError::validation(format!("unknown signal {input}")))
}
