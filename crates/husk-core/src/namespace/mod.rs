//! Linux namespace management for container isolation.
//!
//! A spec's namespace list is split into a [`NamespacePlan`]: kinds that are
//! created fresh become `clone(2)` flags, kinds with a path are joined with
//! `setns(2)`. PID and mount paths are split out because they cannot be
//! joined from the launcher's generic join step: a PID namespace only takes
//! effect for children, and a mount namespace must be entered while the
//! process is still single-threaded, before the launcher image runs.

pub mod user;
pub mod uts;

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use husk_common::error::{HuskError, Result};
use husk_common::spec::{NamespaceType, Spec, TimeOffsets};
use nix::sched::{CloneFlags, setns, unshare};

/// A namespace to enter by path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceJoin {
    /// Kind of namespace behind `path`.
    pub ns_type: NamespaceType,
    /// Namespace file, e.g. `/proc/42/ns/net`.
    pub path: PathBuf,
}

/// How each namespace of a spec is entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacePlan {
    /// Flags passed to `clone(2)` for namespaces created with the launcher.
    pub clone_flags: CloneFlags,
    /// Namespaces joined by the launcher, user namespace first.
    pub joins: Vec<NamespaceJoin>,
    /// PID namespace joined by the controller right before cloning.
    pub pid_join: Option<PathBuf>,
    /// Mount namespace joined by the clone child before it re-executes.
    pub mount_join: Option<PathBuf>,
    /// Whether a new time namespace is unshared by the controller.
    pub new_time: bool,
}

impl NamespacePlan {
    /// Splits the configured namespace list into clone flags and joins.
    #[must_use]
    pub fn from_spec(spec: &Spec) -> Self {
        let mut plan = Self {
            clone_flags: CloneFlags::empty(),
            joins: Vec::new(),
            pid_join: None,
            mount_join: None,
            new_time: false,
        };

        for ns in spec.namespaces() {
            match (ns.ns_type, ns.join_path()) {
                (NamespaceType::Time, None) => plan.new_time = true,
                (ns_type, None) => plan.clone_flags |= clone_flag(ns_type),
                (NamespaceType::Pid, Some(path)) => plan.pid_join = Some(path.to_path_buf()),
                (NamespaceType::Mount, Some(path)) => plan.mount_join = Some(path.to_path_buf()),
                (ns_type, Some(path)) => plan.joins.push(NamespaceJoin {
                    ns_type,
                    path: path.to_path_buf(),
                }),
            }
        }

        // Joining the owning user namespace first grants the privileges the
        // other setns calls are checked against.
        plan.joins
            .sort_by_key(|join| join.ns_type != NamespaceType::User);
        plan
    }

    /// Whether the launcher is cloned into a new user namespace.
    #[must_use]
    pub const fn creates_user_namespace(&self) -> bool {
        self.clone_flags.contains(CloneFlags::CLONE_NEWUSER)
    }
}

/// The `clone(2)`/`setns(2)` flag for a namespace kind.
#[must_use]
pub const fn clone_flag(ns_type: NamespaceType) -> CloneFlags {
    match ns_type {
        NamespaceType::Pid => CloneFlags::CLONE_NEWPID,
        NamespaceType::Network => CloneFlags::CLONE_NEWNET,
        NamespaceType::Mount => CloneFlags::CLONE_NEWNS,
        NamespaceType::Ipc => CloneFlags::CLONE_NEWIPC,
        NamespaceType::Uts => CloneFlags::CLONE_NEWUTS,
        NamespaceType::User => CloneFlags::CLONE_NEWUSER,
        NamespaceType::Cgroup => CloneFlags::CLONE_NEWCGROUP,
        NamespaceType::Time => CloneFlags::from_bits_retain(libc::CLONE_NEWTIME),
    }
}

/// Joins the namespace at `path`.
///
/// The explicit namespace type makes the kernel reject a path that refers
/// to a different kind of namespace.
///
/// # Errors
///
/// Returns [`HuskError::Io`] if the path cannot be opened or
/// [`HuskError::Syscall`] if `setns(2)` fails.
pub fn join(ns_type: NamespaceType, path: &Path) -> Result<()> {
    let file = File::open(path).map_err(|e| HuskError::io(path, e))?;
    setns(&file, clone_flag(ns_type)).map_err(|e| {
        HuskError::syscall(format!("setns {ns_type} {}", path.display()), e)
    })?;
    tracing::debug!(ns = %ns_type, path = %path.display(), "joined namespace");
    Ok(())
}

/// Joins every namespace in order.
///
/// # Errors
///
/// Stops at and returns the first failing join.
pub fn join_all(joins: &[NamespaceJoin]) -> Result<()> {
    joins.iter().try_for_each(|j| join(j.ns_type, &j.path))
}

/// Moves future children of the calling process into a new time namespace.
///
/// Offsets can only be written before the first process enters the
/// namespace, so this must run before the launcher is cloned.
///
/// # Errors
///
/// Returns [`HuskError::Syscall`] if `unshare(2)` fails or
/// [`HuskError::Io`] if the offsets cannot be written.
pub fn unshare_time(offsets: Option<&TimeOffsets>) -> Result<()> {
    unshare(clone_flag(NamespaceType::Time))
        .map_err(|e| HuskError::syscall("unshare time namespace", e))?;

    let Some(offsets) = offsets else {
        return Ok(());
    };
    let content = format_time_offsets(offsets);
    if content.is_empty() {
        return Ok(());
    }
    let path = Path::new("/proc/self/timens_offsets");
    let mut file = File::options()
        .write(true)
        .open(path)
        .map_err(|e| HuskError::io(path, e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| HuskError::io(path, e))?;
    tracing::debug!(offsets = %content.trim_end(), "time namespace offsets set");
    Ok(())
}

fn format_time_offsets(offsets: &TimeOffsets) -> String {
    [("monotonic", offsets.monotonic), ("boottime", offsets.boottime)]
        .into_iter()
        .filter_map(|(clock, off)| off.map(|o| format!("{clock} {} {}\n", o.secs, o.nanosecs)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use husk_common::spec::TimeOffset;

    fn spec_with(namespaces: &str) -> Spec {
        Spec::from_json(&format!(
            r#"{{"ociVersion":"1.2.0","root":{{"path":"rootfs"}},
                "linux":{{"namespaces":{namespaces}}}}}"#
        ))
        .expect("valid spec")
    }

    #[test]
    fn new_namespaces_become_clone_flags() {
        let plan = NamespacePlan::from_spec(&spec_with(
            r#"[{"type":"pid"},{"type":"mount"},{"type":"uts"},{"type":"user"}]"#,
        ));
        assert_eq!(
            plan.clone_flags,
            CloneFlags::CLONE_NEWPID
                | CloneFlags::CLONE_NEWNS
                | CloneFlags::CLONE_NEWUTS
                | CloneFlags::CLONE_NEWUSER
        );
        assert!(plan.creates_user_namespace());
        assert!(plan.joins.is_empty());
    }

    #[test]
    fn paths_are_joined_never_cloned() {
        let plan = NamespacePlan::from_spec(&spec_with(
            r#"[{"type":"network","path":"/proc/1/ns/net"},
                {"type":"ipc","path":"/proc/1/ns/ipc"},
                {"type":"user","path":"/proc/1/ns/user"}]"#,
        ));
        assert!(plan.clone_flags.is_empty());
        let order: Vec<_> = plan.joins.iter().map(|j| j.ns_type).collect();
        assert_eq!(
            order,
            [NamespaceType::User, NamespaceType::Network, NamespaceType::Ipc]
        );
    }

    #[test]
    fn pid_and_mount_paths_are_deferred() {
        let plan = NamespacePlan::from_spec(&spec_with(
            r#"[{"type":"pid","path":"/proc/7/ns/pid"},
                {"type":"mount","path":"/proc/7/ns/mnt"}]"#,
        ));
        assert!(plan.joins.is_empty());
        assert_eq!(plan.pid_join, Some(PathBuf::from("/proc/7/ns/pid")));
        assert_eq!(plan.mount_join, Some(PathBuf::from("/proc/7/ns/mnt")));
    }

    #[test]
    fn time_namespace_is_unshared_not_cloned() {
        let plan = NamespacePlan::from_spec(&spec_with(r#"[{"type":"time"}]"#));
        assert!(plan.new_time);
        assert!(plan.clone_flags.is_empty());
    }

    #[test]
    fn time_offsets_use_clock_names() {
        let offsets = TimeOffsets {
            monotonic: Some(TimeOffset {
                secs: 10,
                nanosecs: 5,
            }),
            boottime: None,
        };
        assert_eq!(format_time_offsets(&offsets), "monotonic 10 5\n");
    }
}
