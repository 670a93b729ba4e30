//! Persistent container state.
//!
//! Each container has one `state.json`, the single source of truth shared
//! by every invocation. Writes go to a temporary file that is renamed over
//! the document, so readers never observe a partial write.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use husk_common::constants::OCI_VERSION;
use husk_common::error::{HuskError, Result};
use husk_common::types::{ContainerId, Status};
use serde::{Deserialize, Serialize};

/// The persisted state document, compatible with the OCI state schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    /// OCI runtime-spec version of this document.
    pub oci_version: String,
    /// Container identifier.
    pub id: ContainerId,
    /// Lifecycle status.
    pub status: Status,
    /// Launcher / container process, once spawned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    /// Absolute bundle path given to `create`.
    pub bundle: PathBuf,
    /// The container's rootfs copy.
    pub rootfs: PathBuf,
    /// Console socket given to `create`, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_socket: Option<PathBuf>,
    /// Annotations copied from `config.json`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
    /// Creation time.
    pub created: DateTime<Utc>,
}

impl ContainerState {
    /// A fresh `creating` document.
    #[must_use]
    pub fn new(id: ContainerId, bundle: PathBuf, rootfs: PathBuf) -> Self {
        Self {
            oci_version: OCI_VERSION.to_owned(),
            id,
            status: Status::Creating,
            pid: None,
            bundle,
            rootfs,
            console_socket: None,
            annotations: HashMap::new(),
            created: Utc::now(),
        }
    }

    /// Loads `state.json` for container `id`.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::NotFound`] if the file does not exist,
    /// [`HuskError::Io`] for other read failures, or
    /// [`HuskError::Serialization`] if it cannot be parsed.
    pub fn load(path: &Path, id: &ContainerId) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                HuskError::NotFound {
                    kind: "container",
                    id: id.to_string(),
                }
            } else {
                HuskError::io(path, e)
            }
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Atomically replaces `path` with this document.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Io`] if the temporary file cannot be written,
    /// synced, or renamed.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");

        let mut file = std::fs::File::create(&tmp).map_err(|e| HuskError::io(&tmp, e))?;
        file.write_all(&json).map_err(|e| HuskError::io(&tmp, e))?;
        file.sync_all().map_err(|e| HuskError::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| HuskError::io(path, e))?;

        tracing::debug!(id = %self.id, status = %self.status, path = %path.display(), "state saved");
        Ok(())
    }

    /// Moves to `status` if the transition is legal.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::InvalidState`] naming `operation` otherwise.
    pub fn transition(&mut self, status: Status, operation: &'static str) -> Result<()> {
        if !self.status.can_transition_to(status) {
            return Err(self.invalid(operation));
        }
        self.status = status;
        Ok(())
    }

    /// An [`HuskError::InvalidState`] for `operation` in the current status.
    #[must_use]
    pub fn invalid(&self, operation: &'static str) -> HuskError {
        HuskError::InvalidState {
            id: self.id.to_string(),
            status: self.status,
            operation,
        }
    }

    /// The document as compact JSON, as fed to hooks.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
