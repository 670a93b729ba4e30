//! Rootfs builder.
//!
//! Turns the container's rootfs copy into a self-contained mount tree, in
//! this order:
//! 1. make `/` private and recursive,
//! 2. bind-mount the rootfs onto itself so it can be pivoted to,
//! 3. mount a fresh `/proc`,
//! 4. apply the configured mounts,
//! 5. create default and spec devices,
//! 6. create the standard `/dev` symlinks.

use std::path::Path;

use husk_common::error::{HuskError, Result};
use husk_common::spec::{Mount, Spec};
use nix::mount::MsFlags;

use super::device;
use super::mount::{MountArgs, mount_at, set_propagation};
use super::resolve_in_rootfs;

/// Symlinks created in every container, as `(target, link)`.
pub const DEFAULT_SYMLINKS: [(&str, &str); 5] = [
    ("/proc/self/fd", "/dev/fd"),
    ("/proc/self/fd/0", "/dev/stdin"),
    ("/proc/self/fd/1", "/dev/stdout"),
    ("/proc/self/fd/2", "/dev/stderr"),
    ("pts/ptmx", "/dev/ptmx"),
];

/// Builds the container filesystem under `rootfs`.
///
/// # Errors
///
/// Returns the first failing step; earlier mounts are left in place and
/// disappear with the launcher's mount namespace.
pub fn prepare_rootfs(rootfs: &Path, spec: &Spec) -> Result<()> {
    mount_at(
        None,
        Path::new("/"),
        None,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None,
    )?;
    mount_at(
        Some(rootfs),
        rootfs,
        None,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None,
    )?;
    mount_proc(rootfs)?;

    for mount in &spec.mounts {
        apply_mount(rootfs, mount)?;
    }

    let devices = spec.linux.as_ref().map_or(&[][..], |l| l.devices.as_slice());
    device::create_devices(rootfs, devices)?;
    create_symlinks(rootfs)?;

    tracing::info!(rootfs = %rootfs.display(), mounts = spec.mounts.len(), "rootfs prepared");
    Ok(())
}

fn mount_proc(rootfs: &Path) -> Result<()> {
    let target = rootfs.join("proc");
    std::fs::create_dir_all(&target).map_err(|e| HuskError::io(&target, e))?;
    mount_at(
        Some(Path::new("proc")),
        &target,
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV,
        None,
    )
}

/// Mounts one spec mount inside `rootfs`.
///
/// `cgroup` mounts are skipped: the container sees the cgroup tree through
/// its own `/sys`.
///
/// # Errors
///
/// Returns [`HuskError::Io`] if the mount point cannot be created or
/// [`HuskError::Syscall`] if a mount call fails.
pub fn apply_mount(rootfs: &Path, mount: &Mount) -> Result<()> {
    let mount_type = mount.mount_type.as_deref();
    if mount_type == Some("cgroup") {
        tracing::debug!(destination = %mount.destination.display(), "skipping cgroup mount");
        return Ok(());
    }

    let args = MountArgs::from_options(mount_type, &mount.options);
    let target = resolve_in_rootfs(rootfs, &mount.destination);
    let source = mount.source.as_deref();

    let file_source = args.is_bind() && source.is_some_and(Path::is_file);
    create_mount_point(&target, file_source)?;

    let fstype = if args.is_bind() { None } else { mount_type };
    mount_at(source, &target, fstype, args.flags, args.data.as_deref())?;

    // A bind mount ignores every flag but MS_BIND|MS_REC until remounted.
    let extra = args.flags.difference(MsFlags::MS_BIND | MsFlags::MS_REC);
    if args.is_bind() && !extra.is_empty() {
        mount_at(
            None,
            &target,
            None,
            extra | MsFlags::MS_BIND | MsFlags::MS_REMOUNT,
            None,
        )?;
    }

    if !args.propagation.is_empty() {
        set_propagation(&target, args.propagation)?;
    }

    tracing::debug!(
        destination = %mount.destination.display(),
        fstype = mount_type.unwrap_or("none"),
        "mounted"
    );
    Ok(())
}

fn create_mount_point(target: &Path, is_file: bool) -> Result<()> {
    if !is_file {
        return std::fs::create_dir_all(target).map_err(|e| HuskError::io(target, e));
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HuskError::io(parent, e))?;
    }
    if !target.exists() {
        drop(std::fs::File::create(target).map_err(|e| HuskError::io(target, e))?);
    }
    Ok(())
}

/// Creates [`DEFAULT_SYMLINKS`] under `rootfs`, keeping existing entries.
///
/// # Errors
///
/// Returns [`HuskError::Io`] if a link cannot be created.
pub fn create_symlinks(rootfs: &Path) -> Result<()> {
    for (target, link) in DEFAULT_SYMLINKS {
        let link = resolve_in_rootfs(rootfs, Path::new(link));
        if link.symlink_metadata().is_ok() {
            continue;
        }
        if let Some(parent) = link.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HuskError::io(parent, e))?;
        }
        std::os::unix::fs::symlink(target, &link).map_err(|e| HuskError::io(&link, e))?;
    }
    Ok(())
}
