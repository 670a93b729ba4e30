//! Linux capability management for least-privilege execution.
//!
//! Capabilities are applied in two steps around the identity switch:
//! [`restrict_bounding_set`] runs while the launcher is still root in its
//! namespace and sets keep-caps so permitted capabilities survive `setuid`;
//! [`apply`] then installs the final sets with `capset(2)` and raises the
//! ambient set.

use husk_common::error::{HuskError, Result};

/// Linux capability identifiers, numbered as in `<linux/capability.h>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Capability {
    /// `CAP_CHOWN`.
    Chown = 0,
    /// `CAP_DAC_OVERRIDE`.
    DacOverride = 1,
    /// `CAP_DAC_READ_SEARCH`.
    DacReadSearch = 2,
    /// `CAP_FOWNER`.
    Fowner = 3,
    /// `CAP_FSETID`.
    Fsetid = 4,
    /// `CAP_KILL`.
    Kill = 5,
    /// `CAP_SETGID`.
    Setgid = 6,
    /// `CAP_SETUID`.
    Setuid = 7,
    /// `CAP_SETPCAP`.
    Setpcap = 8,
    /// `CAP_LINUX_IMMUTABLE`.
    LinuxImmutable = 9,
    /// `CAP_NET_BIND_SERVICE`.
    NetBindService = 10,
    /// `CAP_NET_BROADCAST`.
    NetBroadcast = 11,
    /// `CAP_NET_ADMIN`.
    NetAdmin = 12,
    /// `CAP_NET_RAW`.
    NetRaw = 13,
    /// `CAP_IPC_LOCK`.
    IpcLock = 14,
    /// `CAP_IPC_OWNER`.
    IpcOwner = 15,
    /// `CAP_SYS_MODULE`.
    SysModule = 16,
    /// `CAP_SYS_RAWIO`.
    SysRawio = 17,
    /// `CAP_SYS_CHROOT`.
    SysChroot = 18,
    /// `CAP_SYS_PTRACE`.
    SysPtrace = 19,
    /// `CAP_SYS_PACCT`.
    SysPacct = 20,
    /// `CAP_SYS_ADMIN`.
    SysAdmin = 21,
    /// `CAP_SYS_BOOT`.
    SysBoot = 22,
    /// `CAP_SYS_NICE`.
    SysNice = 23,
    /// `CAP_SYS_RESOURCE`.
    SysResource = 24,
    /// `CAP_SYS_TIME`.
    SysTime = 25,
    /// `CAP_SYS_TTY_CONFIG`.
    SysTtyConfig = 26,
    /// `CAP_MKNOD`.
    Mknod = 27,
    /// `CAP_LEASE`.
    Lease = 28,
    /// `CAP_AUDIT_WRITE`.
    AuditWrite = 29,
    /// `CAP_AUDIT_CONTROL`.
    AuditControl = 30,
    /// `CAP_SETFCAP`.
    Setfcap = 31,
    /// `CAP_MAC_OVERRIDE`.
    MacOverride = 32,
    /// `CAP_MAC_ADMIN`.
    MacAdmin = 33,
    /// `CAP_SYSLOG`.
    Syslog = 34,
    /// `CAP_WAKE_ALARM`.
    WakeAlarm = 35,
    /// `CAP_BLOCK_SUSPEND`.
    BlockSuspend = 36,
    /// `CAP_AUDIT_READ`.
    AuditRead = 37,
    /// `CAP_PERFMON`.
    Perfmon = 38,
    /// `CAP_BPF`.
    Bpf = 39,
    /// `CAP_CHECKPOINT_RESTORE`.
    CheckpointRestore = 40,
}

impl Capability {
    /// Every capability, in numeric order.
    pub const ALL: [Self; 41] = [
        Self::Chown,
        Self::DacOverride,
        Self::DacReadSearch,
        Self::Fowner,
        Self::Fsetid,
        Self::Kill,
        Self::Setgid,
        Self::Setuid,
        Self::Setpcap,
        Self::LinuxImmutable,
        Self::NetBindService,
        Self::NetBroadcast,
        Self::NetAdmin,
        Self::NetRaw,
        Self::IpcLock,
        Self::IpcOwner,
        Self::SysModule,
        Self::SysRawio,
        Self::SysChroot,
        Self::SysPtrace,
        Self::SysPacct,
        Self::SysAdmin,
        Self::SysBoot,
        Self::SysNice,
        Self::SysResource,
        Self::SysTime,
        Self::SysTtyConfig,
        Self::Mknod,
        Self::Lease,
        Self::AuditWrite,
        Self::AuditControl,
        Self::Setfcap,
        Self::MacOverride,
        Self::MacAdmin,
        Self::Syslog,
        Self::WakeAlarm,
        Self::BlockSuspend,
        Self::AuditRead,
        Self::Perfmon,
        Self::Bpf,
        Self::CheckpointRestore,
    ];

    /// The `CAP_*` name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Chown => "CAP_CHOWN",
            Self::DacOverride => "CAP_DAC_OVERRIDE",
            Self::DacReadSearch => "CAP_DAC_READ_SEARCH",
            Self::Fowner => "CAP_FOWNER",
            Self::Fsetid => "CAP_FSETID",
            Self::Kill => "CAP_KILL",
            Self::Setgid => "CAP_SETGID",
            Self::Setuid => "CAP_SETUID",
            Self::Setpcap => "CAP_SETPCAP",
            Self::LinuxImmutable => "CAP_LINUX_IMMUTABLE",
            Self::NetBindService => "CAP_NET_BIND_SERVICE",
            Self::NetBroadcast => "CAP_NET_BROADCAST",
            Self::NetAdmin => "CAP_NET_ADMIN",
            Self::NetRaw => "CAP_NET_RAW",
            Self::IpcLock => "CAP_IPC_LOCK",
            Self::IpcOwner => "CAP_IPC_OWNER",
            Self::SysModule => "CAP_SYS_MODULE",
            Self::SysRawio => "CAP_SYS_RAWIO",
            Self::SysChroot => "CAP_SYS_CHROOT",
            Self::SysPtrace => "CAP_SYS_PTRACE",
            Self::SysPacct => "CAP_SYS_PACCT",
            Self::SysAdmin => "CAP_SYS_ADMIN",
            Self::SysBoot => "CAP_SYS_BOOT",
            Self::SysNice => "CAP_SYS_NICE",
            Self::SysResource => "CAP_SYS_RESOURCE",
            Self::SysTime => "CAP_SYS_TIME",
            Self::SysTtyConfig => "CAP_SYS_TTY_CONFIG",
            Self::Mknod => "CAP_MKNOD",
            Self::Lease => "CAP_LEASE",
            Self::AuditWrite => "CAP_AUDIT_WRITE",
            Self::AuditControl => "CAP_AUDIT_CONTROL",
            Self::Setfcap => "CAP_SETFCAP",
            Self::MacOverride => "CAP_MAC_OVERRIDE",
            Self::MacAdmin => "CAP_MAC_ADMIN",
            Self::Syslog => "CAP_SYSLOG",
            Self::WakeAlarm => "CAP_WAKE_ALARM",
            Self::BlockSuspend => "CAP_BLOCK_SUSPEND",
            Self::AuditRead => "CAP_AUDIT_READ",
            Self::Perfmon => "CAP_PERFMON",
            Self::Bpf => "CAP_BPF",
            Self::CheckpointRestore => "CAP_CHECKPOINT_RESTORE",
        }
    }

    /// Looks up a capability by its `CAP_*` name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|cap| cap.name() == name)
    }

    /// The capability number.
    #[must_use]
    pub const fn index(self) -> u8 {
        self as u8
    }
}

/// A set of capabilities as a 64-bit mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet(u64);

impl CapabilitySet {
    /// Parses a list of `CAP_*` names.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Validation`] for an unknown name.
    pub fn from_names(names: &[String]) -> Result<Self> {
        names.iter().try_fold(Self::default(), |set, name| {
            Capability::from_name(name)
                .map(|cap| set.with(cap))
                .ok_or_else(|| HuskError::validation(format!("unknown capability {name:?}")))
        })
    }

    /// This set plus `cap`.
    #[must_use]
    pub const fn with(self, cap: Capability) -> Self {
        Self(self.0 | (1 << cap.index()))
    }

    /// Whether `cap` is in the set.
    #[must_use]
    pub const fn contains(self, cap: Capability) -> bool {
        self.0 & (1 << cap.index()) != 0
    }

    /// Members in numeric order.
    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |cap| self.contains(*cap))
    }

    const fn low(self) -> u32 {
        (self.0 & 0xffff_ffff) as u32
    }

    const fn high(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

/// The five capability sets of a process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessCapabilities {
    /// Bounding set.
    pub bounding: CapabilitySet,
    /// Effective set.
    pub effective: CapabilitySet,
    /// Inheritable set.
    pub inheritable: CapabilitySet,
    /// Permitted set.
    pub permitted: CapabilitySet,
    /// Ambient set.
    pub ambient: CapabilitySet,
}

impl ProcessCapabilities {
    /// Resolves the named sets of a spec process.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Validation`] for any unknown name.
    pub fn from_spec(caps: &husk_common::spec::Capabilities) -> Result<Self> {
        Ok(Self {
            bounding: CapabilitySet::from_names(&caps.bounding)?,
            effective: CapabilitySet::from_names(&caps.effective)?,
            inheritable: CapabilitySet::from_names(&caps.inheritable)?,
            permitted: CapabilitySet::from_names(&caps.permitted)?,
            ambient: CapabilitySet::from_names(&caps.ambient)?,
        })
    }
}

/// Drops every capability outside `bounding` from the bounding set and
/// keeps permitted capabilities across the coming UID change.
///
/// Capabilities above the running kernel's `cap_last_cap` are skipped.
///
/// # Errors
///
/// Returns [`HuskError::Syscall`] if a `prctl(2)` call fails.
pub fn restrict_bounding_set(bounding: CapabilitySet) -> Result<()> {
    let last = last_cap();
    for cap in Capability::ALL {
        if cap.index() > last || bounding.contains(cap) {
            continue;
        }
        prctl(libc::PR_CAPBSET_DROP, libc::c_ulong::from(cap.index()), 0)
            .map_err(|e| HuskError::syscall(format!("drop {} from bounding set", cap.name()), e))?;
    }
    prctl(libc::PR_SET_KEEPCAPS, 1, 0)
        .map_err(|e| HuskError::syscall("set keep-caps", e))?;
    tracing::debug!(bounding = ?bounding.iter().map(Capability::name).collect::<Vec<_>>(), "bounding set restricted");
    Ok(())
}

/// Installs effective, permitted and inheritable sets, then raises the
/// ambient set.
///
/// # Errors
///
/// Returns [`HuskError::Syscall`] if `capset(2)` or an ambient raise fails.
pub fn apply(caps: &ProcessCapabilities) -> Result<()> {
    capset(caps).map_err(|e| HuskError::syscall("capset", e))?;
    for cap in caps.ambient.iter() {
        // SAFETY: PR_CAP_AMBIENT takes plain integer arguments.
        let rc = unsafe {
            libc::prctl(
                libc::PR_CAP_AMBIENT,
                libc::PR_CAP_AMBIENT_RAISE as libc::c_ulong,
                libc::c_ulong::from(cap.index()),
                0 as libc::c_ulong,
                0 as libc::c_ulong,
            )
        };
        if rc != 0 {
            return Err(HuskError::syscall(
                format!("raise ambient {}", cap.name()),
                std::io::Error::last_os_error(),
            ));
        }
    }
    tracing::debug!(
        effective = ?caps.effective.iter().map(Capability::name).collect::<Vec<_>>(),
        "capabilities applied"
    );
    Ok(())
}

fn last_cap() -> u8 {
    std::fs::read_to_string("/proc/sys/kernel/cap_last_cap")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(Capability::CheckpointRestore.index())
}

fn prctl(option: libc::c_int, arg2: libc::c_ulong, arg3: libc::c_ulong) -> std::io::Result<()> {
    // SAFETY: the options used here take integer arguments only.
    let rc = unsafe { libc::prctl(option, arg2, arg3, 0 as libc::c_ulong, 0 as libc::c_ulong) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

const LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: libc::c_int,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct CapUserData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

fn capset(caps: &ProcessCapabilities) -> std::io::Result<()> {
    let header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let data = [
        CapUserData {
            effective: caps.effective.low(),
            permitted: caps.permitted.low(),
            inheritable: caps.inheritable.low(),
        },
        CapUserData {
            effective: caps.effective.high(),
            permitted: caps.permitted.high(),
            inheritable: caps.inheritable.high(),
        },
    ];
    // SAFETY: header and data match the kernel's version-3 layout, which
    // takes exactly two data elements; both outlive the call.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_capset,
            std::ptr::from_ref(&header),
            data.as_ptr(),
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
