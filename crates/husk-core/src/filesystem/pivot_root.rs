//! Secure root filesystem switching via `pivot_root(2)`, and the mount
//! adjustments that only make sense once the new root is in place.
//!
//! More secure than `chroot` because it actually changes the root mount
//! point rather than just the process's view of `/`.

use std::path::{Path, PathBuf};

use husk_common::error::{HuskError, Result};
use nix::mount::{MntFlags, MsFlags, umount2};
use nix::unistd::chdir;

use super::mount::{mount_at, propagation_flags, set_propagation};

const OLD_ROOT: &str = ".old_root";

/// Switches the root filesystem to `new_root` and detaches the old root.
///
/// `new_root` must already be a mount point (the rootfs builder bind-mounts
/// it onto itself).
///
/// # Errors
///
/// Returns [`HuskError::Syscall`] if `pivot_root(2)`, `chdir(2)` or the
/// detach of the old root fails.
pub fn pivot_root(new_root: &Path) -> Result<()> {
    let put_old = new_root.join(OLD_ROOT);
    std::fs::create_dir_all(&put_old).map_err(|e| HuskError::io(&put_old, e))?;

    nix::unistd::pivot_root(new_root, &put_old).map_err(|e| {
        HuskError::syscall(format!("pivot_root to {}", new_root.display()), e)
    })?;
    chdir("/").map_err(|e| HuskError::syscall("chdir to new root", e))?;

    let old = Path::new("/").join(OLD_ROOT);
    umount2(&old, MntFlags::MNT_DETACH)
        .map_err(|e| HuskError::syscall(format!("detach {}", old.display()), e))?;
    std::fs::remove_dir(&old).map_err(|e| HuskError::io(&old, e))?;

    tracing::info!(new_root = %new_root.display(), "pivoted root");
    Ok(())
}

/// Hides each existing path: directories get an empty read-only tmpfs,
/// files get `/dev/null` bound over them.
///
/// # Errors
///
/// Returns [`HuskError::Syscall`] if a mask cannot be mounted.
pub fn mask_paths(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        let Ok(meta) = path.metadata() else {
            continue;
        };
        if meta.is_dir() {
            mount_at(
                Some(Path::new("tmpfs")),
                path,
                Some("tmpfs"),
                MsFlags::MS_RDONLY,
                None,
            )?;
        } else {
            mount_at(
                Some(Path::new("/dev/null")),
                path,
                None,
                MsFlags::MS_BIND,
                None,
            )?;
        }
        tracing::debug!(path = %path.display(), "masked");
    }
    Ok(())
}

/// Remounts each existing path read-only.
///
/// # Errors
///
/// Returns [`HuskError::Syscall`] if the bind or the remount fails.
pub fn readonly_paths(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        if !path.exists() {
            continue;
        }
        mount_at(
            Some(path.as_path()),
            path,
            None,
            MsFlags::MS_BIND | MsFlags::MS_REC,
            None,
        )?;
        mount_at(
            None,
            path,
            None,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_REC,
            None,
        )?;
        tracing::debug!(path = %path.display(), "made read-only");
    }
    Ok(())
}

/// Applies a `rootfsPropagation` value to `/`.
///
/// # Errors
///
/// Returns [`HuskError::Validation`] for an unknown propagation name or
/// [`HuskError::Syscall`] if the mount call fails.
pub fn set_root_propagation(name: Option<&str>) -> Result<()> {
    let Some(name) = name.filter(|n| !n.is_empty()) else {
        return Ok(());
    };
    set_propagation(Path::new("/"), propagation_flags(name)?)
}

/// Remounts `/` read-only.
///
/// # Errors
///
/// Returns [`HuskError::Syscall`] if the remount fails.
pub fn remount_root_readonly() -> Result<()> {
    mount_at(
        None,
        Path::new("/"),
        None,
        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_paths_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = vec![dir.path().join("does-not-exist")];
        mask_paths(&missing).expect("nothing to mask");
        readonly_paths(&missing).expect("nothing to remount");
    }

    #[test]
    fn empty_propagation_is_a_no_op() {
        set_root_propagation(None).expect("no-op");
        set_root_propagation(Some("")).expect("no-op");
    }

    #[test]
    fn unknown_propagation_is_rejected_before_any_syscall() {
        let err = set_root_propagation(Some("bogus")).expect_err("invalid");
        assert!(matches!(err, HuskError::Validation { .. }));
    }
}
