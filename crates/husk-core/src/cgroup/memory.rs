//! Memory resource control.
//!
//! v2 uses `memory.max` and `memory.low`; v1 uses `memory.limit_in_bytes`
//! and `memory.soft_limit_in_bytes`.

use husk_common::error::Result;
use husk_common::spec::MemoryResources;

use super::{CgroupManager, Hierarchy, write_control};

/// Writes the memory limits.
///
/// # Errors
///
/// Returns an error if writing a memory control file fails.
pub fn apply(cgroup: &CgroupManager, memory: &MemoryResources) -> Result<()> {
    let dir = cgroup.dir("memory");
    let (limit_file, soft_file) = match cgroup.hierarchy() {
        Hierarchy::Unified => ("memory.max", "memory.low"),
        Hierarchy::Legacy => ("memory.limit_in_bytes", "memory.soft_limit_in_bytes"),
    };
    if let Some(limit) = memory.limit {
        write_control(&dir, limit_file, &limit_value(cgroup.hierarchy(), limit))?;
    }
    if let Some(soft) = memory.reservation {
        write_control(&dir, soft_file, &limit_value(cgroup.hierarchy(), soft))?;
    }
    tracing::debug!(limit = ?memory.limit, reservation = ?memory.reservation, "memory limits set");
    Ok(())
}

/// Renders a byte limit; negative values mean unlimited.
fn limit_value(hierarchy: Hierarchy, bytes: i64) -> String {
    match (hierarchy, bytes < 0) {
        (Hierarchy::Unified, true) => "max".into(),
        (Hierarchy::Legacy, true) => "-1".into(),
        (_, false) => bytes.to_string(),
    }
}
