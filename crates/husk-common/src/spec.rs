//! In-memory model of an OCI runtime bundle's `config.json`.
//!
//! Only the fields the runtime acts on are modelled; unknown fields are
//! ignored on load. Field names follow the runtime-spec JSON vocabulary.
//! Reference: <https://github.com/opencontainers/runtime-spec/blob/main/config.md>

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{HuskError, Result};

/// OCI runtime configuration (config.json).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    /// OCI specification version.
    pub oci_version: String,

    /// Container's root filesystem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<Root>,

    /// Container process to run. Absent for rootfs-only containers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<Process>,

    /// Container hostname, applied only inside a new UTS namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Container NIS domain name, applied only inside a new UTS namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domainname: Option<String>,

    /// Additional mounts beyond the root filesystem.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,

    /// Lifecycle hooks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Hooks>,

    /// Arbitrary metadata annotations.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,

    /// Linux-specific configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux: Option<Linux>,
}

impl Spec {
    /// Loads and validates `config.json` from a bundle directory.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Io`] if the file cannot be read,
    /// [`HuskError::Serialization`] if it is not valid JSON for this model, or
    /// [`HuskError::Validation`] if [`Spec::validate`] rejects it.
    pub fn load(bundle: &Path) -> Result<Self> {
        let path = bundle.join(constants::CONFIG_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| HuskError::io(&path, e))?;
        Self::from_json(&content)
    }

    /// Parses and validates a spec from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Serialization`] or [`HuskError::Validation`].
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: Self = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Checks the constraints the runtime relies on.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.oci_version.is_empty() {
            return Err(HuskError::validation("ociVersion is required"));
        }

        match &self.root {
            Some(root) if !root.path.as_os_str().is_empty() => {}
            _ => return Err(HuskError::validation("root.path is required")),
        }

        if let Some(process) = &self.process {
            if process.args.is_empty() {
                return Err(HuskError::validation("process.args must not be empty"));
            }
            if !process.cwd.is_absolute() {
                return Err(HuskError::validation(format!(
                    "process.cwd must be absolute, got {}",
                    process.cwd.display()
                )));
            }
        }

        for (i, mount) in self.mounts.iter().enumerate() {
            if mount.destination.as_os_str().is_empty() {
                return Err(HuskError::validation(format!(
                    "mounts[{i}].destination must not be empty"
                )));
            }
        }

        if let Some(hooks) = &self.hooks {
            hooks.validate()?;
        }

        if let Some(linux) = &self.linux {
            let mut seen = HashSet::new();
            for ns in &linux.namespaces {
                if !seen.insert(ns.ns_type) {
                    return Err(HuskError::validation(format!(
                        "namespace {} declared more than once",
                        ns.ns_type
                    )));
                }
            }
        }

        Ok(())
    }

    /// The rootfs path relative to the bundle (or absolute).
    #[must_use]
    pub fn root_path(&self) -> &Path {
        self.root
            .as_ref()
            .map_or_else(|| Path::new(constants::ROOTFS_DIR), |r| r.path.as_path())
    }

    /// Whether the root filesystem should be remounted read-only.
    #[must_use]
    pub fn root_readonly(&self) -> bool {
        self.root.as_ref().is_some_and(|r| r.readonly)
    }

    /// Declared namespaces (empty without a `linux` section).
    #[must_use]
    pub fn namespaces(&self) -> &[Namespace] {
        self.linux.as_ref().map_or(&[], |l| l.namespaces.as_slice())
    }

    /// Whether a namespace of `ns_type` is requested, new or joined.
    #[must_use]
    pub fn has_namespace(&self, ns_type: NamespaceType) -> bool {
        self.namespaces().iter().any(|ns| ns.ns_type == ns_type)
    }

    /// Hooks of one lifecycle point, in declaration order.
    #[must_use]
    pub fn hooks_for(&self, point: HookPoint) -> &[Hook] {
        self.hooks.as_ref().map_or(&[], |h| h.for_point(point))
    }
}

/// Container root filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    /// Path to the rootfs, relative to the bundle unless absolute.
    pub path: PathBuf,
    /// Remount the root read-only after pivoting.
    #[serde(default)]
    pub readonly: bool,
}

/// The user program and its execution context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    /// Attach a pseudo-terminal when a console socket is supplied.
    #[serde(default)]
    pub terminal: bool,
    /// Working directory inside the container.
    pub cwd: PathBuf,
    /// Environment as `KEY=VALUE` strings.
    #[serde(default)]
    pub env: Vec<String>,
    /// Program and arguments; `args[0]` is resolved on `PATH`.
    #[serde(default)]
    pub args: Vec<String>,
    /// Resource limits.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rlimits: Vec<Rlimit>,
    /// Capability sets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
    /// Value written to `/proc/self/oom_score_adj`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oom_score_adj: Option<i32>,
    /// Identity the program runs as.
    #[serde(default)]
    pub user: User,
}

impl Process {
    /// The `PATH` entry of the process environment, if any.
    #[must_use]
    pub fn path_env(&self) -> Option<&str> {
        self.env.iter().find_map(|kv| kv.strip_prefix("PATH="))
    }
}

/// Process identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User ID inside the container.
    #[serde(default)]
    pub uid: u32,
    /// Group ID inside the container.
    #[serde(default)]
    pub gid: u32,
    /// Supplementary group IDs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_gids: Vec<u32>,
}

/// Named capability sets, e.g. `"CAP_NET_BIND_SERVICE"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Bounding set; capabilities outside it are dropped.
    #[serde(default)]
    pub bounding: Vec<String>,
    /// Effective set.
    #[serde(default)]
    pub effective: Vec<String>,
    /// Inheritable set.
    #[serde(default)]
    pub inheritable: Vec<String>,
    /// Permitted set.
    #[serde(default)]
    pub permitted: Vec<String>,
    /// Ambient set.
    #[serde(default)]
    pub ambient: Vec<String>,
}

/// One process resource limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rlimit {
    /// Limit name, e.g. `"RLIMIT_NOFILE"`.
    #[serde(rename = "type")]
    pub rlimit_type: String,
    /// Soft limit.
    pub soft: u64,
    /// Hard limit.
    pub hard: u64,
}

/// A filesystem mount inside the container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Mount point, resolved inside the rootfs.
    pub destination: PathBuf,
    /// Filesystem type, e.g. `tmpfs`, `proc`, `bind`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mount_type: Option<String>,
    /// Device name, directory, or dummy source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// Mount options, e.g. `nosuid`, `mode=755`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// The six lifecycle points at which hooks can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// In the controller before the launcher runs (legacy).
    Prestart,
    /// In the controller during create.
    CreateRuntime,
    /// During create, after the runtime hooks.
    CreateContainer,
    /// In the launcher just before exec.
    StartContainer,
    /// After the user program has been released.
    Poststart,
    /// After the container process is gone.
    Poststop,
}

impl HookPoint {
    /// The runtime-spec name of this point.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prestart => "prestart",
            Self::CreateRuntime => "createRuntime",
            Self::CreateContainer => "createContainer",
            Self::StartContainer => "startContainer",
            Self::Poststart => "poststart",
            Self::Poststop => "poststop",
        }
    }

    /// Whether a failing hook aborts the enclosing operation.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::CreateRuntime | Self::CreateContainer | Self::StartContainer
        )
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container lifecycle hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hooks {
    /// Legacy hooks run before the user program is released.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prestart: Vec<Hook>,
    /// Hooks run during create in the runtime namespace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub create_runtime: Vec<Hook>,
    /// Hooks run during create after the runtime hooks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub create_container: Vec<Hook>,
    /// Hooks run inside the container just before exec.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub start_container: Vec<Hook>,
    /// Hooks run after the user program is released.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub poststart: Vec<Hook>,
    /// Hooks run after the container process is gone.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub poststop: Vec<Hook>,
}

impl Hooks {
    /// Hooks registered at `point`.
    #[must_use]
    pub fn for_point(&self, point: HookPoint) -> &[Hook] {
        match point {
            HookPoint::Prestart => &self.prestart,
            HookPoint::CreateRuntime => &self.create_runtime,
            HookPoint::CreateContainer => &self.create_container,
            HookPoint::StartContainer => &self.start_container,
            HookPoint::Poststart => &self.poststart,
            HookPoint::Poststop => &self.poststop,
        }
    }

    fn validate(&self) -> Result<()> {
        [
            HookPoint::Prestart,
            HookPoint::CreateRuntime,
            HookPoint::CreateContainer,
            HookPoint::StartContainer,
            HookPoint::Poststart,
            HookPoint::Poststop,
        ]
        .into_iter()
        .flat_map(|point| self.for_point(point).iter().map(move |h| (point, h)))
        .try_for_each(|(point, hook)| hook.validate(point))
    }
}

/// A single hook command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    /// Absolute path of the executable.
    pub path: PathBuf,
    /// Arguments including `argv[0]`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Complete environment as `KEY=VALUE` strings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Seconds before the hook is killed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Hook {
    fn validate(&self, point: HookPoint) -> Result<()> {
        if !self.path.is_absolute() {
            return Err(HuskError::validation(format!(
                "{point} hook path must be absolute, got {}",
                self.path.display()
            )));
        }
        if self.timeout == Some(0) {
            return Err(HuskError::validation(format!(
                "{point} hook {} has a zero timeout",
                self.path.display()
            )));
        }
        Ok(())
    }
}

/// Linux-specific configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Linux {
    /// Namespaces to create or join.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<Namespace>,
    /// User namespace UID mappings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uid_mappings: Vec<IdMapping>,
    /// User namespace GID mappings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gid_mappings: Vec<IdMapping>,
    /// Device nodes to create in `/dev`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<Device>,
    /// Cgroup path, absolute or relative to the cgroup root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cgroups_path: Option<String>,
    /// Cgroup resource limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    /// Propagation of the root mount: `shared`, `slave`, `private`, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rootfs_propagation: Option<String>,
    /// Paths hidden from the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub masked_paths: Vec<PathBuf>,
    /// Paths remounted read-only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readonly_paths: Vec<PathBuf>,
    /// Offsets for a new time namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_offsets: Option<TimeOffsets>,
}

/// One contiguous user-namespace ID range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdMapping {
    /// First ID inside the namespace.
    #[serde(rename = "containerID")]
    pub container_id: u32,
    /// First ID on the host.
    #[serde(rename = "hostID")]
    pub host_id: u32,
    /// Number of IDs in the range.
    pub size: u32,
}

/// Kind of device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    /// Block device.
    #[serde(rename = "b")]
    Block,
    /// Character device.
    #[serde(rename = "c")]
    Char,
    /// Unbuffered character device.
    #[serde(rename = "u")]
    Unbuffered,
    /// FIFO.
    #[serde(rename = "p")]
    Fifo,
    /// Unix socket.
    #[serde(rename = "s")]
    Socket,
}

impl DeviceType {
    /// Single-letter form used by `devices.allow`.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Block => 'b',
            Self::Char | Self::Unbuffered => 'c',
            Self::Fifo => 'p',
            Self::Socket => 's',
        }
    }
}

/// A device node to create inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Node type.
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Path inside the container.
    pub path: PathBuf,
    /// Major number.
    #[serde(default)]
    pub major: u64,
    /// Minor number.
    #[serde(default)]
    pub minor: u64,
    /// Permission bits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<u32>,
    /// Owner UID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    /// Owner GID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

/// Linux namespace kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    /// Process IDs.
    Pid,
    /// Network stack.
    Network,
    /// Mount table.
    Mount,
    /// System V IPC and POSIX message queues.
    Ipc,
    /// Hostname and domain name.
    Uts,
    /// User and group IDs.
    User,
    /// Cgroup root.
    Cgroup,
    /// Boot and monotonic clocks.
    Time,
}

impl NamespaceType {
    /// The runtime-spec name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pid => "pid",
            Self::Network => "network",
            Self::Mount => "mount",
            Self::Ipc => "ipc",
            Self::Uts => "uts",
            Self::User => "user",
            Self::Cgroup => "cgroup",
            Self::Time => "time",
        }
    }
}

impl fmt::Display for NamespaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A namespace to create (no path) or join (path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace kind.
    #[serde(rename = "type")]
    pub ns_type: NamespaceType,
    /// Existing namespace to join, e.g. `/proc/1234/ns/net`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Namespace {
    /// The path to join, treating an empty string as absent.
    #[must_use]
    pub fn join_path(&self) -> Option<&Path> {
        self.path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

/// Cgroup resource limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Device access rules, applied in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<DeviceRule>,
    /// Memory limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryResources>,
    /// CPU limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuResources>,
    /// Process count limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pids: Option<PidsResources>,
}

impl Resources {
    /// Whether no limit of any kind is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
            && self.memory.is_none()
            && self.cpu.is_none()
            && self.pids.is_none()
    }
}

/// One device cgroup rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRule {
    /// Allow or deny.
    pub allow: bool,
    /// Node type, or all types when absent.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
    /// Major number, or all when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<i64>,
    /// Minor number, or all when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor: Option<i64>,
    /// Access string made of `r`, `w`, `m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
}

/// Memory cgroup limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryResources {
    /// Hard limit in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    /// Soft limit in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation: Option<i64>,
}

/// CPU cgroup limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuResources {
    /// Relative weight (cgroup v1 shares).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares: Option<u64>,
    /// Microseconds of CPU time per period.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<i64>,
    /// Period length in microseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<u64>,
}

/// Pids cgroup limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidsResources {
    /// Maximum number of tasks; non-positive means unlimited.
    pub limit: i64,
}

/// Clock offsets for a new time namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOffsets {
    /// Offset of `CLOCK_MONOTONIC`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monotonic: Option<TimeOffset>,
    /// Offset of `CLOCK_BOOTTIME`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boottime: Option<TimeOffset>,
}

/// A clock offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOffset {
    /// Whole seconds.
    #[serde(default)]
    pub secs: i64,
    /// Nanoseconds.
    #[serde(default)]
    pub nanosecs: u32,
}
