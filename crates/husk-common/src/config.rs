//! Global configuration model for the husk runtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::types::ContainerId;

/// Root configuration for the husk runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HuskConfig {
    /// Runtime root holding one directory per container.
    pub root_dir: PathBuf,
    /// Seconds `create` waits for the launcher's ready message.
    pub ready_timeout_secs: u64,
    /// Mount point of the cgroup filesystem.
    pub cgroup_root: PathBuf,
}

impl Default for HuskConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(constants::DEFAULT_ROOT_DIR),
            ready_timeout_secs: constants::DEFAULT_READY_TIMEOUT_SECS,
            cgroup_root: PathBuf::from(constants::CGROUP_ROOT),
        }
    }
}

impl HuskConfig {
    /// Configuration rooted at `root_dir` with every other field defaulted.
    #[must_use]
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// The ready timeout as a [`Duration`].
    #[must_use]
    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    /// Directory that holds every container entry.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.root_dir.join(constants::CONTAINERS_DIR)
    }

    /// Per-container file layout under the runtime root.
    #[must_use]
    pub fn paths(&self, id: &ContainerId) -> ContainerPaths {
        ContainerPaths::new(self.containers_dir().join(id.as_str()))
    }
}

/// Fixed on-disk layout of one container entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPaths {
    dir: PathBuf,
}

impl ContainerPaths {
    /// Layout rooted at `dir`.
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The container directory itself.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `state.json`.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.dir.join(constants::STATE_FILE)
    }

    /// Copy of the bundle's `config.json`.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.dir.join(constants::CONFIG_FILE)
    }

    /// Copy of the bundle's root filesystem.
    #[must_use]
    pub fn rootfs(&self) -> PathBuf {
        self.dir.join(constants::ROOTFS_DIR)
    }

    /// Launcher-to-controller ready socket.
    #[must_use]
    pub fn init_socket(&self) -> PathBuf {
        self.dir.join(constants::INIT_SOCKET)
    }

    /// Controller-to-launcher start socket.
    #[must_use]
    pub fn container_socket(&self) -> PathBuf {
        self.dir.join(constants::CONTAINER_SOCKET)
    }
}
