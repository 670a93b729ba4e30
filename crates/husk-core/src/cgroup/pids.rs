//! Process count limit via `pids.max`, identical on v1 and v2.

use husk_common::error::Result;
use husk_common::spec::PidsResources;

use super::{CgroupManager, write_control};

/// Writes `pids.max`; a non-positive limit means unlimited.
///
/// # Errors
///
/// Returns an error if writing `pids.max` fails.
pub fn apply(cgroup: &CgroupManager, pids: &PidsResources) -> Result<()> {
    let value = if pids.limit > 0 {
        pids.limit.to_string()
    } else {
        "max".into()
    };
    write_control(&cgroup.dir("pids"), "pids.max", &value)?;
    tracing::debug!(limit = %value, "pids limit set");
    Ok(())
}
