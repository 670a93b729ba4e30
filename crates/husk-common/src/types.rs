//! Domain primitive types used across the husk workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{HuskError, Result};

/// Unique identifier for a container instance.
///
/// IDs become directory and socket names, so they are restricted to ASCII
/// alphanumerics plus `-`, `_` and `.`, and may not be `.` or `..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerId(String);

impl ContainerId {
    /// Validates and wraps a container ID.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Validation`] if the ID is empty, a dot entry, or
    /// contains characters outside `[A-Za-z0-9_.-]`.
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id == "." || id == ".." {
            return Err(HuskError::validation(format!("invalid container id: {id:?}")));
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(HuskError::validation(format!(
                "invalid character {bad:?} in container id {id:?}"
            )));
        }
        Ok(Self(id))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContainerId {
    type Err = HuskError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContainerId {
    type Error = HuskError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<ContainerId> for String {
    fn from(id: ContainerId) -> Self {
        id.0
    }
}

/// Lifecycle status of a container, as reported in `state.json`.
///
/// Valid transitions:
/// - Creating -> Created | Stopped
/// - Created -> Running | Stopped
/// - Running -> Stopped
/// - Stopped -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The container entry exists but the launcher has not reported ready.
    Creating,
    /// The launcher is parked waiting for the start message.
    Created,
    /// The user program has been released.
    Running,
    /// The container process is gone or was never launched.
    Stopped,
}

impl Status {
    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }

    /// Whether moving from `self` to `target` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Creating, Self::Created | Self::Stopped)
                | (Self::Created, Self::Running | Self::Stopped)
                | (Self::Running | Self::Stopped, Self::Stopped)
        )
    }

    /// Whether a live process may be associated with this status.
    #[must_use]
    pub const fn has_process(self) -> bool {
        matches!(self, Self::Created | Self::Running)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_id_accepts_common_forms() {
        for id in ["web", "web-1", "a.b_c", "0123456789abcdef"] {
            assert!(ContainerId::parse(id).is_ok(), "{id} should be valid");
        }
    }

    #[test]
    fn container_id_rejects_path_like_values() {
        for id in ["", ".", "..", "a/b", "a b", "x\0y"] {
            let err = ContainerId::parse(id).expect_err("id should be rejected");
            assert!(matches!(err, HuskError::Validation { .. }));
        }
    }

    #[test]
    fn container_id_deserialization_validates() {
        let ok: ContainerId = serde_json::from_str("\"box\"").expect("valid id");
        assert_eq!(ok.as_str(), "box");
        assert!(serde_json::from_str::<ContainerId>("\"../etc\"").is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&Status::Created).expect("serialize");
        assert_eq!(json, "\"created\"");
        let back: Status = serde_json::from_str("\"stopped\"").expect("deserialize");
        assert_eq!(back, Status::Stopped);
    }

    #[test]
    fn status_transitions_are_monotonic() {
        assert!(Status::Creating.can_transition_to(Status::Created));
        assert!(Status::Created.can_transition_to(Status::Running));
        assert!(Status::Running.can_transition_to(Status::Stopped));
        assert!(Status::Stopped.can_transition_to(Status::Stopped));

        assert!(!Status::Created.can_transition_to(Status::Creating));
        assert!(!Status::Running.can_transition_to(Status::Created));
        assert!(!Status::Stopped.can_transition_to(Status::Running));
        assert!(!Status::Creating.can_transition_to(Status::Running));
    }
}
