//! Accumulator types written by workers and drained by the scheduler:
//! [`HostResult`] (the partial-to-complete per-`(druleid, ip)` row) and
//! [`RuleError`] (the error sideband).

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::SystemTime;

use crate::check::DiscoveredService;
use utils::id::{DCheckId, DRuleId};

/// One probed host's accumulated services, keyed externally by
/// `(druleid, ip)`. An empty `ip` (`None`) signals a rule-level status
/// update rather than a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostResult {
    pub druleid: DRuleId,
    pub ip: Option<IpAddr>,
    pub dnsname: String,
    pub services: Vec<DiscoveredService>,
    pub now: SystemTime,
    pub unique_dcheckid: Option<DCheckId>,
    /// How many checks the scheduler registered for this IP when it
    /// expanded the owning rule; used by `merge_partial` to detect a
    /// worker result produced against a stale task shape.
    pub processed_checks_per_ip: u32,
    pub error: Option<String>,
}

impl HostResult {
    pub fn empty_for_rule(druleid: DRuleId, now: SystemTime, error: Option<String>) -> Self {
        Self {
            druleid,
            ip: None,
            dnsname: String::new(),
            services: Vec::new(),
            now,
            unique_dcheckid: None,
            processed_checks_per_ip: 0,
            error,
        }
    }

    pub fn is_rule_level(&self) -> bool {
        self.ip.is_none()
    }
}

/// One error text associated with a rule, emitted through the queue's error
/// sideband and flushed to persistence on the next scheduler tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleError {
    pub druleid: DRuleId,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_for_rule_has_no_ip_and_no_services() {
        let r = HostResult::empty_for_rule(DRuleId::new(1), SystemTime::UNIX_EPOCH, None);
        assert!(r.is_rule_level());
        assert!(r.services.is_empty());
    }
}
