//! A discovery rule: the declarative "what to scan" read from configuration.

use serde::{Deserialize, Serialize};

use crate::check::Check;
use crate::iprange::IpRange;
use utils::id::DRuleId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub druleid: DRuleId,
    /// Macro-expandable delay string (e.g. `"60s"` or `"{$DISCOVERY_DELAY}"`);
    /// resolving the macro is the `RuleSource` collaborator's job, not this
    /// type's.
    pub delay: String,
    pub iprange: IpRange,
    pub checks: Vec<Check>,
    /// Bumped by configuration whenever the rule's definition changes; the
    /// scheduler treats a stale `drule_revision` on an in-flight job as a
    /// cancellation signal.
    pub revision: u64,
    /// `dcheckid` of the check used to derive host uniqueness, if any of
    /// `checks` set `uniqueness_criteria`.
    pub unique_check_id: Option<utils::id::DCheckId>,
    pub enabled: bool,
}

impl Rule {
    /// Number of outstanding `(ip, check)` pairs a full, uncapped expansion
    /// of this rule would schedule — used by the scheduler to compare
    /// against remaining queue capacity before committing to enqueue.
    pub fn full_check_count(&self) -> u128 {
        let addrs = self.iprange.address_count();
        let mut checks: u128 = 0;
        for check in &self.checks {
            checks = checks.saturating_add(match check.check_type.batch_kind() {
                crate::check::BatchKind::Icmp => 1,
                _ => check.ports.count().max(1) as u128,
            });
        }
        addrs.saturating_mul(checks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckParams, CheckType};
    use crate::iprange::PortRange;
    use std::time::Duration;

    fn check(check_type: CheckType, ports: &str) -> Check {
        Check {
            dcheckid: utils::id::DCheckId::new(1),
            check_type,
            ports: PortRange::parse(ports).unwrap(),
            timeout: Duration::from_secs(1),
            params: CheckParams::None,
            uniqueness_criteria: false,
        }
    }

    #[test]
    fn full_check_count_multiplies_addresses_by_ports() {
        let rule = Rule {
            druleid: DRuleId::new(1),
            delay: "60s".to_owned(),
            iprange: IpRange::parse("10.0.0.1-10.0.0.4").unwrap(),
            checks: vec![check(CheckType::Tcp, "22,80")],
            revision: 1,
            unique_check_id: None,
            enabled: true,
        };
        assert_eq!(rule.full_check_count(), 8);
    }

    #[test]
    fn icmp_checks_count_once_per_address_regardless_of_ports() {
        let rule = Rule {
            druleid: DRuleId::new(1),
            delay: "60s".to_owned(),
            iprange: IpRange::parse("10.0.0.1-10.0.0.4").unwrap(),
            checks: vec![check(CheckType::Icmp, "0")],
            revision: 1,
            unique_check_id: None,
            enabled: true,
        };
        // The port spec is meaningless for ICMP; count is driven solely by
        // address count, one check per address.
        assert_eq!(rule.full_check_count(), 4);
    }
}
