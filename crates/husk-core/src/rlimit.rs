//! Process resource limits.
//!
//! `RLIMIT_*` names from `config.json` are resolved through the closed
//! [`Rlimit`] table and applied with `setrlimit(2)` in the launcher.

use husk_common::error::{HuskError, Result};
use nix::sys::resource::{Resource, setrlimit};

/// Resource limit kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rlimit {
    /// `RLIMIT_AS`.
    As,
    /// `RLIMIT_CORE`.
    Core,
    /// `RLIMIT_CPU`.
    Cpu,
    /// `RLIMIT_DATA`.
    Data,
    /// `RLIMIT_FSIZE`.
    Fsize,
    /// `RLIMIT_LOCKS`.
    Locks,
    /// `RLIMIT_MEMLOCK`.
    Memlock,
    /// `RLIMIT_MSGQUEUE`.
    Msgqueue,
    /// `RLIMIT_NICE`.
    Nice,
    /// `RLIMIT_NOFILE`.
    Nofile,
    /// `RLIMIT_NPROC`.
    Nproc,
    /// `RLIMIT_RSS`.
    Rss,
    /// `RLIMIT_RTPRIO`.
    Rtprio,
    /// `RLIMIT_RTTIME`.
    Rttime,
    /// `RLIMIT_SIGPENDING`.
    Sigpending,
    /// `RLIMIT_STACK`.
    Stack,
}

impl Rlimit {
    /// Looks up a limit by its `RLIMIT_*` name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "RLIMIT_AS" => Self::As,
            "RLIMIT_CORE" => Self::Core,
            "RLIMIT_CPU" => Self::Cpu,
            "RLIMIT_DATA" => Self::Data,
            "RLIMIT_FSIZE" => Self::Fsize,
            "RLIMIT_LOCKS" => Self::Locks,
            "RLIMIT_MEMLOCK" => Self::Memlock,
            "RLIMIT_MSGQUEUE" => Self::Msgqueue,
            "RLIMIT_NICE" => Self::Nice,
            "RLIMIT_NOFILE" => Self::Nofile,
            "RLIMIT_NPROC" => Self::Nproc,
            "RLIMIT_RSS" => Self::Rss,
            "RLIMIT_RTPRIO" => Self::Rtprio,
            "RLIMIT_RTTIME" => Self::Rttime,
            "RLIMIT_SIGPENDING" => Self::Sigpending,
            "RLIMIT_STACK" => Self::Stack,
            _ => return None,
        })
    }

    /// The kernel resource identifier.
    #[must_use]
    pub const fn resource(self) -> Resource {
        match self {
            Self::As => Resource::RLIMIT_AS,
            Self::Core => Resource::RLIMIT_CORE,
            Self::Cpu => Resource::RLIMIT_CPU,
            Self::Data => Resource::RLIMIT_DATA,
            Self::Fsize => Resource::RLIMIT_FSIZE,
            Self::Locks => Resource::RLIMIT_LOCKS,
            Self::Memlock => Resource::RLIMIT_MEMLOCK,
            Self::Msgqueue => Resource::RLIMIT_MSGQUEUE,
            Self::Nice => Resource::RLIMIT_NICE,
            Self::Nofile => Resource::RLIMIT_NOFILE,
            Self::Nproc => Resource::RLIMIT_NPROC,
            Self::Rss => Resource::RLIMIT_RSS,
            Self::Rtprio => Resource::RLIMIT_RTPRIO,
            Self::Rttime => Resource::RLIMIT_RTTIME,
            Self::Sigpending => Resource::RLIMIT_SIGPENDING,
            Self::Stack => Resource::RLIMIT_STACK,
        }
    }
}

/// Resolves every limit name before any is applied.
///
/// # Errors
///
/// Returns [`HuskError::Validation`] for an unknown name or a soft limit
/// above its hard limit.
pub fn resolve(limits: &[husk_common::spec::Rlimit]) -> Result<Vec<(Rlimit, u64, u64)>> {
    limits
        .iter()
        .map(|limit| {
            let kind = Rlimit::from_name(&limit.rlimit_type).ok_or_else(|| {
                HuskError::validation(format!("unknown rlimit {:?}", limit.rlimit_type))
            })?;
            if limit.soft > limit.hard {
                return Err(HuskError::validation(format!(
                    "{} soft limit {} exceeds hard limit {}",
                    limit.rlimit_type, limit.soft, limit.hard
                )));
            }
            Ok((kind, limit.soft, limit.hard))
        })
        .collect()
}

/// Applies the configured resource limits to the calling process.
///
/// # Errors
///
/// Returns [`HuskError::Validation`] from [`resolve`] or
/// [`HuskError::Syscall`] if `setrlimit(2)` fails.
pub fn apply(limits: &[husk_common::spec::Rlimit]) -> Result<()> {
    for (kind, soft, hard) in resolve(limits)? {
        setrlimit(kind.resource(), soft, hard)
            .map_err(|e| HuskError::syscall(format!("setrlimit {kind:?}"), e))?;
        tracing::debug!(limit = ?kind, soft, hard, "rlimit applied");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(name: &str, soft: u64, hard: u64) -> husk_common::spec::Rlimit {
        husk_common::spec::Rlimit {
            rlimit_type: name.into(),
            soft,
            hard,
        }
    }

    #[test]
    fn known_names_resolve() {
        assert_eq!(Rlimit::from_name("RLIMIT_NOFILE"), Some(Rlimit::Nofile));
        assert_eq!(Rlimit::Nofile.resource(), Resource::RLIMIT_NOFILE);
        assert_eq!(Rlimit::from_name("RLIMIT_STACK"), Some(Rlimit::Stack));
        assert_eq!(Rlimit::from_name("NOFILE"), None);
    }

    #[test]
    fn resolve_rejects_unknown_and_inverted_limits() {
        assert!(resolve(&[limit("RLIMIT_BOGUS", 1, 1)]).is_err());
        assert!(resolve(&[limit("RLIMIT_CORE", 10, 5)]).is_err());
        let ok = resolve(&[limit("RLIMIT_CORE", 0, 0)]).expect("valid");
        assert_eq!(ok, vec![(Rlimit::Core, 0, 0)]);
    }

    #[test]
    fn lowering_own_core_limit_is_allowed() {
        apply(&[limit("RLIMIT_CORE", 0, 0)]).expect("lowering needs no privilege");
    }
}
