//! System-wide constants and default paths.

/// Default runtime root holding one directory per container.
pub const DEFAULT_ROOT_DIR: &str = "/var/lib/husk";

/// Subdirectory of the runtime root that holds container entries.
pub const CONTAINERS_DIR: &str = "containers";

/// Persisted container state document.
pub const STATE_FILE: &str = "state.json";

/// Bundle spec document, both in the bundle and in the container copy.
pub const CONFIG_FILE: &str = "config.json";

/// Default rootfs directory name inside a bundle and a container entry.
pub const ROOTFS_DIR: &str = "rootfs";

/// Socket the launcher dials to report that setup finished.
pub const INIT_SOCKET: &str = "init.sock";

/// Socket the controller dials to release the launcher.
pub const CONTAINER_SOCKET: &str = "container.sock";

/// Payload sent by the launcher once the rootfs is built.
pub const READY_MESSAGE: &str = "ready";

/// Payload sent by the controller to release the launcher.
pub const START_MESSAGE: &str = "start";

/// OCI runtime-spec version reported in `state.json`.
pub const OCI_VERSION: &str = "1.2.0";

/// Seconds `create` waits for the launcher's ready message.
pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 30;

/// Cgroup filesystem mount point.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Parent cgroup used when the bundle config declares no `cgroupsPath`.
pub const DEFAULT_CGROUP_PARENT: &str = "husk";

/// Hidden subcommand that re-enters the binary as the launcher.
pub const INIT_SUBCOMMAND: &str = "init";

/// Application name used in CLI output and logs.
pub const APP_NAME: &str = "husk";
