//! Formatted output helpers for CLI commands.

use serde::Serialize;

/// Renders `value` as indented JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn pretty_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Prints `value` as indented JSON on stdout.
///
/// # Errors
///
/// Returns an error if serialization fails.
#[allow(clippy::print_stdout)]
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", pretty_json(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use husk_common::types::ContainerId;
    use husk_runtime::state::ContainerState;

    use super::*;

    #[test]
    fn state_is_printed_as_indented_oci_json() {
        let state = ContainerState::new(
            ContainerId::parse("web").expect("valid id"),
            PathBuf::from("/bundle"),
            PathBuf::from("/bundle/rootfs"),
        );
        let text = pretty_json(&state).expect("json");
        assert!(text.contains("\n  \"ociVersion\": \"1.2.0\""), "{text}");
        assert!(text.contains("\"status\": \"creating\""), "{text}");
        assert!(!text.contains("\"pid\""), "{text}");
    }
}
