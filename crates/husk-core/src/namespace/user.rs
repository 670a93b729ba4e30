//! User namespace ID mapping.
//!
//! Maps container UIDs/GIDs to host IDs for a launcher cloned into a new
//! user namespace. The maps are written by the parent, which is still in
//! the initial namespace, before the child is released.

use std::path::PathBuf;

use husk_common::error::{HuskError, Result};
use husk_common::spec::IdMapping;
use nix::unistd::{Pid, getegid, geteuid};

/// Single-entry mapping of container ID 0 to `host_id`.
#[must_use]
pub const fn root_mapping(host_id: u32) -> IdMapping {
    IdMapping {
        container_id: 0,
        host_id,
        size: 1,
    }
}

/// UID and GID maps for a new user namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdMaps {
    /// Lines of `uid_map`.
    pub uid: Vec<IdMapping>,
    /// Lines of `gid_map`.
    pub gid: Vec<IdMapping>,
}

impl IdMaps {
    /// Uses the declared mappings, or maps root to the caller's effective IDs.
    #[must_use]
    pub fn resolve(uid_mappings: &[IdMapping], gid_mappings: &[IdMapping]) -> Self {
        let uid = if uid_mappings.is_empty() {
            vec![root_mapping(geteuid().as_raw())]
        } else {
            uid_mappings.to_vec()
        };
        let gid = if gid_mappings.is_empty() {
            vec![root_mapping(getegid().as_raw())]
        } else {
            gid_mappings.to_vec()
        };
        Self { uid, gid }
    }

    /// Writes `setgroups`, `uid_map` and `gid_map` for `pid`.
    ///
    /// An unprivileged caller must deny `setgroups` before it may write a
    /// GID map, so that happens whenever the caller is not root.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Io`] naming the `/proc` file that failed.
    pub fn write(&self, pid: Pid) -> Result<()> {
        let proc_dir = PathBuf::from(format!("/proc/{pid}"));

        if !geteuid().is_root() {
            let setgroups = proc_dir.join("setgroups");
            std::fs::write(&setgroups, "deny").map_err(|e| HuskError::io(&setgroups, e))?;
        }

        let uid_map = proc_dir.join("uid_map");
        std::fs::write(&uid_map, format_id_map(&self.uid))
            .map_err(|e| HuskError::io(&uid_map, e))?;

        let gid_map = proc_dir.join("gid_map");
        std::fs::write(&gid_map, format_id_map(&self.gid))
            .map_err(|e| HuskError::io(&gid_map, e))?;

        tracing::debug!(%pid, uid = ?self.uid, gid = ?self.gid, "wrote UID/GID map");
        Ok(())
    }
}

/// Renders mappings in the `/proc/<pid>/uid_map` line format.
#[must_use]
pub fn format_id_map(mappings: &[IdMapping]) -> String {
    mappings
        .iter()
        .map(|m| format!("{} {} {}\n", m.container_id, m.host_id, m.size))
        .collect()
}
