//! Cgroup attachment and resource limits.
//!
//! Supports both the unified (v2) hierarchy and the legacy (v1) per-
//! controller hierarchies. The container's cgroup is taken from
//! `linux.cgroupsPath` or defaults to `husk/<id>` below the cgroup root.

pub mod cpu;
pub mod devices;
pub mod memory;
pub mod pids;

use std::fmt;
use std::path::{Component, Path, PathBuf};

use husk_common::constants::DEFAULT_CGROUP_PARENT;
use husk_common::error::{HuskError, Result};
use husk_common::spec::Resources;
use husk_common::types::ContainerId;

/// Controllers used by the runtime on a legacy hierarchy.
const LEGACY_CONTROLLERS: [&str; 4] = ["devices", "memory", "cpu", "pids"];

/// Cgroup hierarchy layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hierarchy {
    /// Single tree with `cgroup.controllers` at its root (v2).
    Unified,
    /// One tree per controller (v1).
    Legacy,
}

impl Hierarchy {
    /// Detects the layout mounted at `root`.
    #[must_use]
    pub fn detect(root: &Path) -> Self {
        if root.join("cgroup.controllers").exists() {
            Self::Unified
        } else {
            Self::Legacy
        }
    }
}

impl fmt::Display for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unified => f.write_str("v2"),
            Self::Legacy => f.write_str("v1"),
        }
    }
}

/// Handle to a container's cgroup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupManager {
    root: PathBuf,
    relative: PathBuf,
    hierarchy: Hierarchy,
}

impl CgroupManager {
    /// Handle for `relative` below `root` in the given layout.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, relative: &Path, hierarchy: Hierarchy) -> Self {
        let relative = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect();
        Self {
            root: root.into(),
            relative,
            hierarchy,
        }
    }

    /// Handle for a container, detecting the layout mounted at `root`.
    #[must_use]
    pub fn for_container(root: &Path, cgroups_path: Option<&str>, id: &ContainerId) -> Self {
        let relative = cgroups_path
            .filter(|p| !p.is_empty())
            .map_or_else(
                || Path::new(DEFAULT_CGROUP_PARENT).join(id.as_str()),
                PathBuf::from,
            );
        Self::new(root, &relative, Hierarchy::detect(root))
    }

    /// The detected layout.
    #[must_use]
    pub const fn hierarchy(&self) -> Hierarchy {
        self.hierarchy
    }

    /// The cgroup path relative to the root.
    #[must_use]
    pub fn relative(&self) -> &Path {
        &self.relative
    }

    /// Directory of this cgroup for `controller` (ignored on v2).
    #[must_use]
    pub fn dir(&self, controller: &str) -> PathBuf {
        match self.hierarchy {
            Hierarchy::Unified => self.root.join(&self.relative),
            Hierarchy::Legacy => self.root.join(controller).join(&self.relative),
        }
    }

    fn dirs(&self) -> Vec<PathBuf> {
        match self.hierarchy {
            Hierarchy::Unified => vec![self.root.join(&self.relative)],
            Hierarchy::Legacy => LEGACY_CONTROLLERS
                .iter()
                .filter(|c| self.root.join(c).is_dir())
                .map(|c| self.root.join(c).join(&self.relative))
                .collect(),
        }
    }

    /// Creates the cgroup directories.
    ///
    /// On v2 the `cpu`, `memory` and `pids` controllers are delegated down
    /// the path when possible; failures there only limit what can be
    /// applied later and are logged.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Io`] if a directory cannot be created.
    pub fn create(&self) -> Result<()> {
        if self.hierarchy == Hierarchy::Unified {
            self.delegate_controllers();
        }
        for dir in self.dirs() {
            std::fs::create_dir_all(&dir).map_err(|e| HuskError::io(&dir, e))?;
        }
        tracing::info!(path = %self.relative.display(), hierarchy = %self.hierarchy, "cgroup created");
        Ok(())
    }

    fn delegate_controllers(&self) {
        let mut dir = self.root.clone();
        for part in self.relative.iter() {
            let control = dir.join("cgroup.subtree_control");
            if let Err(e) = std::fs::write(&control, "+cpu +memory +pids") {
                tracing::warn!(path = %control.display(), error = %e, "controller delegation failed");
            }
            dir.push(part);
            if let Err(e) = std::fs::create_dir_all(&dir) {
                tracing::warn!(path = %dir.display(), error = %e, "cannot create cgroup ancestor");
                return;
            }
        }
    }

    /// Applies device rules and limits.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Io`] if a control file cannot be written.
    pub fn apply(&self, resources: &Resources) -> Result<()> {
        devices::apply(self, &resources.devices)?;
        if let Some(memory) = &resources.memory {
            memory::apply(self, memory)?;
        }
        if let Some(cpu) = &resources.cpu {
            cpu::apply(self, cpu)?;
        }
        if let Some(pids) = &resources.pids {
            pids::apply(self, pids)?;
        }
        Ok(())
    }

    /// Moves `pid` into this cgroup.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Io`] if writing `cgroup.procs` fails.
    pub fn add_process(&self, pid: i32) -> Result<()> {
        for dir in self.dirs() {
            write_control(&dir, "cgroup.procs", &pid.to_string())?;
        }
        tracing::debug!(pid, path = %self.relative.display(), "added process to cgroup");
        Ok(())
    }

    /// Removes the cgroup directories; missing ones are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Io`] if an existing directory cannot be removed,
    /// for example because it still holds processes.
    pub fn destroy(&self) -> Result<()> {
        for dir in self.dirs() {
            match std::fs::remove_dir(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(HuskError::io(&dir, e)),
            }
        }
        tracing::info!(path = %self.relative.display(), "cgroup destroyed");
        Ok(())
    }
}

/// Writes one control file in a cgroup directory.
pub(crate) fn write_control(dir: &Path, file: &str, value: &str) -> Result<()> {
    let path = dir.join(file);
    std::fs::write(&path, value).map_err(|e| HuskError::io(&path, e))?;
    tracing::trace!(path = %path.display(), value, "cgroup control written");
    Ok(())
}
