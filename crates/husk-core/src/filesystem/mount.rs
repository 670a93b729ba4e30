//! Mount option translation and mount helpers.
//!
//! Named options from a spec mount are looked up in the closed
//! [`MountOption`] table. Known options set or clear `MS_*` flags or select
//! a propagation type; anything else is passed to the filesystem as data.

use std::path::Path;

use husk_common::error::{HuskError, Result};
use nix::mount::{MsFlags, mount};

/// Mount options with a kernel flag equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountOption {
    /// `defaults`: no flags.
    Defaults,
    /// `ro`.
    ReadOnly,
    /// `rw`.
    ReadWrite,
    /// `suid`.
    Suid,
    /// `nosuid`.
    NoSuid,
    /// `dev`.
    Dev,
    /// `nodev`.
    NoDev,
    /// `exec`.
    Exec,
    /// `noexec`.
    NoExec,
    /// `sync`.
    Sync,
    /// `async`.
    Async,
    /// `dirsync`.
    DirSync,
    /// `remount`.
    Remount,
    /// `mand`.
    Mand,
    /// `nomand`.
    NoMand,
    /// `atime`.
    Atime,
    /// `noatime`.
    NoAtime,
    /// `diratime`.
    DirAtime,
    /// `nodiratime`.
    NoDirAtime,
    /// `relatime`.
    RelAtime,
    /// `norelatime`.
    NoRelAtime,
    /// `strictatime`.
    StrictAtime,
    /// `nostrictatime`.
    NoStrictAtime,
    /// `bind`.
    Bind,
    /// `rbind`.
    RecursiveBind,
    /// `private`.
    Private,
    /// `rprivate`.
    RecursivePrivate,
    /// `shared`.
    Shared,
    /// `rshared`.
    RecursiveShared,
    /// `slave`.
    Slave,
    /// `rslave`.
    RecursiveSlave,
    /// `unbindable`.
    Unbindable,
    /// `runbindable`.
    RecursiveUnbindable,
}

/// What a [`MountOption`] does to the mount call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionEffect {
    /// Adds flags.
    Set(MsFlags),
    /// Removes flags another option may have set.
    Clear(MsFlags),
    /// Applied by a second `mount(2)` call after the mount exists.
    Propagation(MsFlags),
}

impl MountOption {
    /// Looks up an option by name; `None` for filesystem data options.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "defaults" => Self::Defaults,
            "ro" => Self::ReadOnly,
            "rw" => Self::ReadWrite,
            "suid" => Self::Suid,
            "nosuid" => Self::NoSuid,
            "dev" => Self::Dev,
            "nodev" => Self::NoDev,
            "exec" => Self::Exec,
            "noexec" => Self::NoExec,
            "sync" => Self::Sync,
            "async" => Self::Async,
            "dirsync" => Self::DirSync,
            "remount" => Self::Remount,
            "mand" => Self::Mand,
            "nomand" => Self::NoMand,
            "atime" => Self::Atime,
            "noatime" => Self::NoAtime,
            "diratime" => Self::DirAtime,
            "nodiratime" => Self::NoDirAtime,
            "relatime" => Self::RelAtime,
            "norelatime" => Self::NoRelAtime,
            "strictatime" => Self::StrictAtime,
            "nostrictatime" => Self::NoStrictAtime,
            "bind" => Self::Bind,
            "rbind" => Self::RecursiveBind,
            "private" => Self::Private,
            "rprivate" => Self::RecursivePrivate,
            "shared" => Self::Shared,
            "rshared" => Self::RecursiveShared,
            "slave" => Self::Slave,
            "rslave" => Self::RecursiveSlave,
            "unbindable" => Self::Unbindable,
            "runbindable" => Self::RecursiveUnbindable,
            _ => return None,
        })
    }

    /// The flag change this option requests.
    #[must_use]
    pub const fn effect(self) -> OptionEffect {
        use OptionEffect::{Clear, Propagation, Set};
        match self {
            Self::Defaults => Set(MsFlags::empty()),
            Self::ReadOnly => Set(MsFlags::MS_RDONLY),
            Self::ReadWrite => Clear(MsFlags::MS_RDONLY),
            Self::Suid => Clear(MsFlags::MS_NOSUID),
            Self::NoSuid => Set(MsFlags::MS_NOSUID),
            Self::Dev => Clear(MsFlags::MS_NODEV),
            Self::NoDev => Set(MsFlags::MS_NODEV),
            Self::Exec => Clear(MsFlags::MS_NOEXEC),
            Self::NoExec => Set(MsFlags::MS_NOEXEC),
            Self::Sync => Set(MsFlags::MS_SYNCHRONOUS),
            Self::Async => Clear(MsFlags::MS_SYNCHRONOUS),
            Self::DirSync => Set(MsFlags::MS_DIRSYNC),
            Self::Remount => Set(MsFlags::MS_REMOUNT),
            Self::Mand => Set(MsFlags::MS_MANDLOCK),
            Self::NoMand => Clear(MsFlags::MS_MANDLOCK),
            Self::Atime => Clear(MsFlags::MS_NOATIME),
            Self::NoAtime => Set(MsFlags::MS_NOATIME),
            Self::DirAtime => Clear(MsFlags::MS_NODIRATIME),
            Self::NoDirAtime => Set(MsFlags::MS_NODIRATIME),
            Self::RelAtime => Set(MsFlags::MS_RELATIME),
            Self::NoRelAtime => Clear(MsFlags::MS_RELATIME),
            Self::StrictAtime => Set(MsFlags::MS_STRICTATIME),
            Self::NoStrictAtime => Clear(MsFlags::MS_STRICTATIME),
            Self::Bind => Set(MsFlags::MS_BIND),
            Self::RecursiveBind => Set(MsFlags::MS_BIND.union(MsFlags::MS_REC)),
            Self::Private => Propagation(MsFlags::MS_PRIVATE),
            Self::RecursivePrivate => Propagation(MsFlags::MS_PRIVATE.union(MsFlags::MS_REC)),
            Self::Shared => Propagation(MsFlags::MS_SHARED),
            Self::RecursiveShared => Propagation(MsFlags::MS_SHARED.union(MsFlags::MS_REC)),
            Self::Slave => Propagation(MsFlags::MS_SLAVE),
            Self::RecursiveSlave => Propagation(MsFlags::MS_SLAVE.union(MsFlags::MS_REC)),
            Self::Unbindable => Propagation(MsFlags::MS_UNBINDABLE),
            Self::RecursiveUnbindable => {
                Propagation(MsFlags::MS_UNBINDABLE.union(MsFlags::MS_REC))
            }
        }
    }
}

/// Propagation flags for a `rootfsPropagation` value.
///
/// # Errors
///
/// Returns [`HuskError::Validation`] for names that are not propagation types.
pub fn propagation_flags(name: &str) -> Result<MsFlags> {
    match MountOption::parse(name).map(MountOption::effect) {
        Some(OptionEffect::Propagation(flags)) => Ok(flags),
        _ => Err(HuskError::validation(format!(
            "invalid rootfs propagation {name:?}"
        ))),
    }
}

/// A spec mount's options translated for `mount(2)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountArgs {
    /// Flags for the mount call.
    pub flags: MsFlags,
    /// Propagation flags applied after mounting.
    pub propagation: MsFlags,
    /// Comma-joined filesystem data, if any.
    pub data: Option<String>,
}

impl MountArgs {
    /// Translates a mount's type and options.
    ///
    /// `uid=`, `gid=` and `newinstance` are dropped: they only make sense
    /// for a devpts instance the runtime does not own.
    #[must_use]
    pub fn from_options(mount_type: Option<&str>, options: &[String]) -> Self {
        let mut set = MsFlags::empty();
        let mut clear = MsFlags::empty();
        let mut propagation = MsFlags::empty();
        let mut data = Vec::new();

        if mount_type == Some("bind") {
            set |= MsFlags::MS_BIND;
        }

        for opt in options {
            match MountOption::parse(opt).map(MountOption::effect) {
                Some(OptionEffect::Set(flags)) => {
                    set |= flags;
                    clear.remove(flags);
                }
                Some(OptionEffect::Clear(flags)) => {
                    clear |= flags;
                    set.remove(flags);
                }
                Some(OptionEffect::Propagation(flags)) => propagation |= flags,
                None if is_excluded(opt) => {}
                None => data.push(opt.as_str()),
            }
        }

        Self {
            flags: set.difference(clear),
            propagation,
            data: (!data.is_empty()).then(|| data.join(",")),
        }
    }

    /// Whether the mount is a bind mount.
    #[must_use]
    pub const fn is_bind(&self) -> bool {
        self.flags.contains(MsFlags::MS_BIND)
    }
}

fn is_excluded(opt: &str) -> bool {
    opt.starts_with("uid=") || opt.starts_with("gid=") || opt == "newinstance"
}

/// Thin wrapper over `mount(2)` that names source and target on failure.
///
/// # Errors
///
/// Returns [`HuskError::Syscall`] if the mount fails.
pub fn mount_at(
    source: Option<&Path>,
    target: &Path,
    fstype: Option<&str>,
    flags: MsFlags,
    data: Option<&str>,
) -> Result<()> {
    mount(source, target, fstype, flags, data).map_err(|e| {
        HuskError::syscall(
            format!(
                "mount {} on {} (type {}, flags {flags:?})",
                source.map_or_else(|| "none".into(), |s| s.display().to_string()),
                target.display(),
                fstype.unwrap_or("none"),
            ),
            e,
        )
    })
}

/// Changes the propagation type of an existing mount point.
///
/// # Errors
///
/// Returns [`HuskError::Syscall`] if the mount call fails.
pub fn set_propagation(target: &Path, flags: MsFlags) -> Result<()> {
    mount_at(None, target, None, flags, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn tmpfs_noexec_nosuid_is_not_a_bind() {
        let args = MountArgs::from_options(Some("tmpfs"), &opts(&["noexec", "nosuid"]));
        assert_eq!(args.flags, MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID);
        assert!(!args.is_bind());
        assert!(args.data.is_none());
    }

    #[test]
    fn bind_type_sets_bind_flag() {
        let args = MountArgs::from_options(Some("bind"), &opts(&["ro"]));
        assert_eq!(args.flags, MsFlags::MS_BIND | MsFlags::MS_RDONLY);
    }

    #[test]
    fn later_option_overrides_earlier_one() {
        let args = MountArgs::from_options(None, &opts(&["ro", "rw", "noexec", "exec"]));
        assert!(args.flags.is_empty());
    }

    #[test]
    fn unknown_options_become_data() {
        let args = MountArgs::from_options(
            Some("tmpfs"),
            &opts(&["nosuid", "mode=755", "size=65536k"]),
        );
        assert_eq!(args.flags, MsFlags::MS_NOSUID);
        assert_eq!(args.data.as_deref(), Some("mode=755,size=65536k"));
    }

    #[test]
    fn devpts_identity_options_are_dropped() {
        let args = MountArgs::from_options(
            Some("devpts"),
            &opts(&["nosuid", "newinstance", "ptmxmode=0666", "gid=5", "uid=0"]),
        );
        assert_eq!(args.flags, MsFlags::MS_NOSUID);
        assert_eq!(args.data.as_deref(), Some("ptmxmode=0666"));
    }

    #[test]
    fn propagation_options_are_kept_apart() {
        let args = MountArgs::from_options(Some("bind"), &opts(&["rbind", "rslave"]));
        assert_eq!(args.flags, MsFlags::MS_BIND | MsFlags::MS_REC);
        assert_eq!(args.propagation, MsFlags::MS_SLAVE | MsFlags::MS_REC);
    }

    #[test]
    fn rootfs_propagation_names() {
        assert_eq!(
            propagation_flags("rprivate").expect("valid"),
            MsFlags::MS_PRIVATE | MsFlags::MS_REC
        );
        assert!(propagation_flags("noexec").is_err());
        assert!(propagation_flags("sideways").is_err());
    }
}
