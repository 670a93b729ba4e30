//! Device node creation inside the container's `/dev`.
//!
//! Nodes are created with `mknod(2)`. Inside a user namespace the kernel
//! refuses `mknod` with `EPERM`, so the host node of the same path is
//! bind-mounted over an empty file instead.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use husk_common::error::{HuskError, Result};
use husk_common::spec::{Device, DeviceType};
use nix::errno::Errno;
use nix::mount::MsFlags;
use nix::sys::stat::{Mode, SFlag, makedev, mknod};
use nix::unistd::{Gid, Uid, chown};

use super::mount::mount_at;
use super::resolve_in_rootfs;

const DEFAULT_MODE: u32 = 0o666;

/// A device node every container gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultDevice {
    /// Path inside the container.
    pub path: &'static str,
    /// Major number.
    pub major: u64,
    /// Minor number.
    pub minor: u64,
}

/// Character devices created in every container, mode 0666, owned by 0:0.
pub const DEFAULT_DEVICES: [DefaultDevice; 6] = [
    DefaultDevice { path: "/dev/null", major: 1, minor: 3 },
    DefaultDevice { path: "/dev/zero", major: 1, minor: 5 },
    DefaultDevice { path: "/dev/full", major: 1, minor: 7 },
    DefaultDevice { path: "/dev/random", major: 1, minor: 8 },
    DefaultDevice { path: "/dev/urandom", major: 1, minor: 9 },
    DefaultDevice { path: "/dev/tty", major: 5, minor: 0 },
];

impl DefaultDevice {
    /// The equivalent spec device.
    #[must_use]
    pub fn to_device(self) -> Device {
        Device {
            device_type: DeviceType::Char,
            path: PathBuf::from(self.path),
            major: self.major,
            minor: self.minor,
            file_mode: Some(DEFAULT_MODE),
            uid: Some(0),
            gid: Some(0),
        }
    }
}

/// Creates the default devices followed by the configured devices.
///
/// A spec device with the same path as a default replaces it.
///
/// # Errors
///
/// Returns the first device that could not be created.
pub fn create_devices(rootfs: &Path, devices: &[Device]) -> Result<()> {
    let defaults = DEFAULT_DEVICES
        .iter()
        .filter(|d| !devices.iter().any(|s| s.path == Path::new(d.path)))
        .map(|d| d.to_device());

    for device in defaults.chain(devices.iter().cloned()) {
        create_device(rootfs, &device)?;
    }
    Ok(())
}

/// Node type bits for `mknod(2)`.
#[must_use]
pub const fn node_kind(device_type: DeviceType) -> SFlag {
    match device_type {
        DeviceType::Block => SFlag::S_IFBLK,
        DeviceType::Char | DeviceType::Unbuffered => SFlag::S_IFCHR,
        DeviceType::Fifo => SFlag::S_IFIFO,
        DeviceType::Socket => SFlag::S_IFSOCK,
    }
}

/// Creates one device node inside `rootfs`, honoring mode and owner.
///
/// # Errors
///
/// Returns [`HuskError::Syscall`] if neither `mknod(2)` nor the bind-mount
/// fallback succeeds, or if the mode or owner cannot be applied.
pub fn create_device(rootfs: &Path, device: &Device) -> Result<()> {
    let target = resolve_in_rootfs(rootfs, &device.path);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HuskError::io(parent, e))?;
    }
    if target.symlink_metadata().is_ok() {
        std::fs::remove_file(&target).map_err(|e| HuskError::io(&target, e))?;
    }

    let mode = Mode::from_bits_truncate(device.file_mode.unwrap_or(DEFAULT_MODE));
    let dev = makedev(device.major, device.minor);

    match mknod(&target, node_kind(device.device_type), mode, dev) {
        Ok(()) => {}
        Err(Errno::EPERM) => return bind_host_device(&device.path, &target),
        Err(e) => {
            return Err(HuskError::syscall(
                format!("mknod {}", target.display()),
                e,
            ));
        }
    }

    // mknod applies the umask; chmod sets the exact requested bits.
    std::fs::set_permissions(&target, Permissions::from_mode(mode.bits()))
        .map_err(|e| HuskError::io(&target, e))?;

    if device.uid.is_some() || device.gid.is_some() {
        chown(
            &target,
            device.uid.map(Uid::from_raw),
            device.gid.map(Gid::from_raw),
        )
        .map_err(|e| HuskError::syscall(format!("chown {}", target.display()), e))?;
    }

    tracing::debug!(
        path = %device.path.display(),
        major = device.major,
        minor = device.minor,
        "device created"
    );
    Ok(())
}

fn bind_host_device(host_path: &Path, target: &Path) -> Result<()> {
    drop(
        std::fs::File::create(target).map_err(|e| HuskError::io(target, e))?,
    );
    mount_at(Some(host_path), target, Some("bind"), MsFlags::MS_BIND, None)?;
    tracing::debug!(path = %host_path.display(), "device bind-mounted from host");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_devices_are_world_accessible_char_nodes() {
        for default in DEFAULT_DEVICES {
            let device = default.to_device();
            assert_eq!(device.device_type, DeviceType::Char);
            assert_eq!(device.file_mode, Some(0o666));
            assert_eq!((device.uid, device.gid), (Some(0), Some(0)));
        }
        let null = DEFAULT_DEVICES[0];
        assert_eq!((null.path, null.major, null.minor), ("/dev/null", 1, 3));
        let tty = DEFAULT_DEVICES[5];
        assert_eq!((tty.path, tty.major, tty.minor), ("/dev/tty", 5, 0));
    }

    #[test]
    fn node_kinds_match_device_types() {
        assert_eq!(node_kind(DeviceType::Block), SFlag::S_IFBLK);
        assert_eq!(node_kind(DeviceType::Unbuffered), SFlag::S_IFCHR);
        assert_eq!(node_kind(DeviceType::Fifo), SFlag::S_IFIFO);
        assert_eq!(node_kind(DeviceType::Socket), SFlag::S_IFSOCK);
    }

    #[test]
    fn fifo_needs_no_privilege() {
        use std::os::unix::fs::FileTypeExt;

        let rootfs = tempfile::tempdir().expect("tempdir");
        let fifo = Device {
            device_type: DeviceType::Fifo,
            path: PathBuf::from("/dev/ctl"),
            major: 0,
            minor: 0,
            file_mode: Some(0o600),
            uid: None,
            gid: None,
        };
        create_device(rootfs.path(), &fifo).expect("fifo created");
        let meta = std::fs::metadata(rootfs.path().join("dev/ctl")).expect("stat");
        assert!(meta.file_type().is_fifo());
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }
}
