//! CPU resource control.
//!
//! v1 takes `cpu.shares` and CFS quota/period files directly; v2 folds
//! quota and period into `cpu.max` and expresses shares as `cpu.weight`.

use husk_common::error::Result;
use husk_common::spec::CpuResources;

use super::{CgroupManager, Hierarchy, write_control};

const DEFAULT_PERIOD_US: u64 = 100_000;

/// Writes the CPU limits.
///
/// # Errors
///
/// Returns an error if writing a CPU control file fails.
pub fn apply(cgroup: &CgroupManager, cpu: &CpuResources) -> Result<()> {
    let dir = cgroup.dir("cpu");
    match cgroup.hierarchy() {
        Hierarchy::Legacy => {
            if let Some(shares) = cpu.shares {
                write_control(&dir, "cpu.shares", &shares.to_string())?;
            }
            if let Some(period) = cpu.period {
                write_control(&dir, "cpu.cfs_period_us", &period.to_string())?;
            }
            if let Some(quota) = cpu.quota {
                write_control(&dir, "cpu.cfs_quota_us", &quota.to_string())?;
            }
        }
        Hierarchy::Unified => {
            if let Some(shares) = cpu.shares {
                write_control(&dir, "cpu.weight", &shares_to_weight(shares).to_string())?;
            }
            if cpu.quota.is_some() || cpu.period.is_some() {
                write_control(&dir, "cpu.max", &cpu_max(cpu.quota, cpu.period))?;
            }
        }
    }
    tracing::debug!(shares = ?cpu.shares, quota = ?cpu.quota, period = ?cpu.period, "cpu limits set");
    Ok(())
}

/// Maps v1 shares (2..=262144) onto v2 weight (1..=10000).
#[must_use]
pub fn shares_to_weight(shares: u64) -> u64 {
    if shares == 0 {
        return 100;
    }
    1 + (shares.clamp(2, 262_144) - 2) * 9_999 / 262_142
}

fn cpu_max(quota: Option<i64>, period: Option<u64>) -> String {
    let period = period.unwrap_or(DEFAULT_PERIOD_US);
    match quota {
        Some(q) if q > 0 => format!("{q} {period}"),
        _ => format!("max {period}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shares_map_to_weight_range() {
        assert_eq!(shares_to_weight(2), 1);
        assert_eq!(shares_to_weight(262_144), 10_000);
        assert_eq!(shares_to_weight(1024), 39);
        assert_eq!(shares_to_weight(0), 100);
    }

    #[test]
    fn cpu_max_defaults_period_and_unlimited_quota() {
        assert_eq!(cpu_max(Some(20_000), None), "20000 100000");
        assert_eq!(cpu_max(None, Some(50_000)), "max 50000");
        assert_eq!(cpu_max(Some(-1), None), "max 100000");
    }
}
