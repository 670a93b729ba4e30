//! Device access rules.
//!
//! The legacy hierarchy takes rules as lines written to `devices.allow` and
//! `devices.deny`. The unified hierarchy has no device files; its device
//! controller is an eBPF program, which this runtime does not load.

use husk_common::error::Result;
use husk_common::spec::DeviceRule;

use super::{CgroupManager, Hierarchy, write_control};

/// Renders a rule in the `devices.allow` line format, e.g. `c 1:3 rwm`.
#[must_use]
pub fn rule_line(rule: &DeviceRule) -> String {
    let kind = rule.device_type.map_or('a', |t| t.as_char());
    let number = |n: Option<i64>| n.filter(|n| *n >= 0).map_or_else(|| "*".into(), |n| n.to_string());
    let access = rule.access.as_deref().filter(|a| !a.is_empty()).unwrap_or("rwm");
    format!("{kind} {}:{} {access}", number(rule.major), number(rule.minor))
}

/// Writes the rules in order.
///
/// # Errors
///
/// Returns an error if a legacy device control file cannot be written.
pub fn apply(cgroup: &CgroupManager, rules: &[DeviceRule]) -> Result<()> {
    if rules.is_empty() {
        return Ok(());
    }
    if cgroup.hierarchy() == Hierarchy::Unified {
        tracing::warn!(
            rules = rules.len(),
            "device rules need an eBPF device program on cgroup v2; skipping"
        );
        return Ok(());
    }

    let dir = cgroup.dir("devices");
    for rule in rules {
        let file = if rule.allow { "devices.allow" } else { "devices.deny" };
        write_control(&dir, file, &rule_line(rule))?;
    }
    tracing::debug!(rules = rules.len(), "device rules applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use husk_common::spec::DeviceType;

    #[test]
    fn rule_lines_use_wildcards_for_missing_fields() {
        let deny_all = DeviceRule {
            allow: false,
            device_type: None,
            major: None,
            minor: None,
            access: Some("rwm".into()),
        };
        assert_eq!(rule_line(&deny_all), "a *:* rwm");

        let null = DeviceRule {
            allow: true,
            device_type: Some(DeviceType::Char),
            major: Some(1),
            minor: Some(3),
            access: None,
        };
        assert_eq!(rule_line(&null), "c 1:3 rwm");
    }
}
