//! External collaborator traits. Database I/O, the user-macro resolver for
//! `delay`/timeout strings, and TLS bootstrap are all explicitly out of
//! scope — these traits are the entire surface this crate expects from
//! them. `discoverer` (the binary) wires real or stub implementations; unit
//! tests in this crate use the `Static*`/`Recording*` doubles below.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use discovery_api::{CheckType, Rule, ServiceStatus};
use utils::id::{DCheckId, DRuleId};

use crate::error::SchedulerError;

/// Reads rule definitions and resolves a rule's `delay` macro. The macro
/// grammar itself (`{$MACRO}` expansion) is an external resolver's job —
/// this trait only exposes the already-resolved outcome.
pub trait RuleSource: Send + Sync {
    fn active_revisions(&self) -> Vec<(DRuleId, u64)>;
    fn due_rules(&self, now: SystemTime) -> Vec<Rule>;
    fn resolve_delay(&self, rule: &Rule) -> Result<Duration, SchedulerError>;
    fn reschedule(&self, druleid: DRuleId, next_check: SystemTime);
}

/// Resolves a check type's configured timeout, independent of whatever
/// timeout the check itself already carries (site-wide overrides).
pub trait ConfigLookup: Send + Sync {
    fn timeout_for(&self, check_type: CheckType) -> Result<Duration, SchedulerError>;
}

/// The persistence interface discovered hosts and services flow through.
/// `open`/`close` bracket one scheduler tick's worth of writes, mirroring a
/// connection checkout from a pool.
pub trait PersistenceSink: Send + Sync {
    fn open(&self) -> anyhow::Result<()>;
    #[allow(clippy::too_many_arguments)]
    fn update_service(
        &self,
        druleid: DRuleId,
        ip: IpAddr,
        dcheckid: DCheckId,
        port: u16,
        status: ServiceStatus,
        value: &str,
        now: SystemTime,
    ) -> anyhow::Result<()>;
    fn update_service_down(&self, dhostid: u64, now: SystemTime) -> anyhow::Result<()>;
    fn update_host(
        &self,
        druleid: DRuleId,
        ip: IpAddr,
        dnsname: &str,
        status: ServiceStatus,
        now: SystemTime,
    ) -> anyhow::Result<()>;
    fn update_drule(&self, druleid: DRuleId, error: Option<&str>, now: SystemTime) -> anyhow::Result<()>;
    fn find_host(&self, druleid: DRuleId, ip: IpAddr) -> anyhow::Result<Option<u64>>;
    fn close(&self) -> anyhow::Result<()>;
}

/// Fixed-rule, fixed-delay test double — the macro resolver this trait
/// delegates to is out of scope, so tests supply an already-resolved delay.
pub struct StaticRuleSource {
    rules: Mutex<Vec<Rule>>,
    delay: Duration,
}

impl StaticRuleSource {
    pub fn new(rules: Vec<Rule>, delay: Duration) -> Self {
        Self {
            rules: Mutex::new(rules),
            delay,
        }
    }

    pub fn set_revision(&self, druleid: DRuleId, revision: u64) {
        let mut rules = self.rules.lock().unwrap();
        if let Some(rule) = rules.iter_mut().find(|r| r.druleid == druleid) {
            rule.revision = revision;
        }
    }

    pub fn remove(&self, druleid: DRuleId) {
        self.rules.lock().unwrap().retain(|r| r.druleid != druleid);
    }
}

impl RuleSource for StaticRuleSource {
    fn active_revisions(&self) -> Vec<(DRuleId, u64)> {
        self.rules.lock().unwrap().iter().map(|r| (r.druleid, r.revision)).collect()
    }

    fn due_rules(&self, _now: SystemTime) -> Vec<Rule> {
        self.rules.lock().unwrap().iter().filter(|r| r.enabled).cloned().collect()
    }

    fn resolve_delay(&self, _rule: &Rule) -> Result<Duration, SchedulerError> {
        Ok(self.delay)
    }

    fn reschedule(&self, _druleid: DRuleId, _next_check: SystemTime) {}
}

pub struct StaticConfigLookup {
    overrides: HashMap<CheckType, Duration>,
    default_timeout: Duration,
}

impl StaticConfigLookup {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            overrides: HashMap::new(),
            default_timeout,
        }
    }

    pub fn with_override(mut self, check_type: CheckType, timeout: Duration) -> Self {
        self.overrides.insert(check_type, timeout);
        self
    }
}

impl ConfigLookup for StaticConfigLookup {
    fn timeout_for(&self, check_type: CheckType) -> Result<Duration, SchedulerError> {
        Ok(self.overrides.get(&check_type).copied().unwrap_or(self.default_timeout))
    }
}

/// Appends a human-readable line per call instead of performing any I/O —
/// used by scenario tests to assert exactly which persistence calls a tick
/// produced, in order.
#[derive(Default)]
pub struct RecordingPersistenceSink {
    calls: Mutex<Vec<String>>,
}

impl RecordingPersistenceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, line: String) {
        self.calls.lock().unwrap().push(line);
    }
}

impl PersistenceSink for RecordingPersistenceSink {
    fn open(&self) -> anyhow::Result<()> {
        self.record("open".to_owned());
        Ok(())
    }

    fn update_service(
        &self,
        druleid: DRuleId,
        ip: IpAddr,
        dcheckid: DCheckId,
        port: u16,
        status: ServiceStatus,
        value: &str,
        _now: SystemTime,
    ) -> anyhow::Result<()> {
        self.record(format!(
            "update_service(druleid={druleid}, ip={ip}, dcheckid={dcheckid}, port={port}, status={status:?}, value={value:?})"
        ));
        Ok(())
    }

    fn update_service_down(&self, dhostid: u64, _now: SystemTime) -> anyhow::Result<()> {
        self.record(format!("update_service_down(dhostid={dhostid})"));
        Ok(())
    }

    fn update_host(
        &self,
        druleid: DRuleId,
        ip: IpAddr,
        dnsname: &str,
        status: ServiceStatus,
        _now: SystemTime,
    ) -> anyhow::Result<()> {
        self.record(format!(
            "update_host(druleid={druleid}, ip={ip}, dnsname={dnsname:?}, status={status:?})"
        ));
        Ok(())
    }

    fn update_drule(&self, druleid: DRuleId, error: Option<&str>, _now: SystemTime) -> anyhow::Result<()> {
        self.record(format!("update_drule(druleid={druleid}, error={error:?})"));
        Ok(())
    }

    fn find_host(&self, _druleid: DRuleId, _ip: IpAddr) -> anyhow::Result<Option<u64>> {
        Ok(None)
    }

    fn close(&self) -> anyhow::Result<()> {
        self.record("close".to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_captures_calls_in_order() {
        let sink = RecordingPersistenceSink::new();
        sink.open().unwrap();
        sink.update_drule(DRuleId::new(1), Some("boom"), SystemTime::UNIX_EPOCH).unwrap();
        sink.close().unwrap();
        assert_eq!(sink.calls(), vec![
            "open".to_owned(),
            "update_drule(druleid=1, error=Some(\"boom\"))".to_owned(),
            "close".to_owned(),
        ]);
    }

    #[test]
    fn static_config_lookup_falls_back_to_default() {
        let lookup = StaticConfigLookup::new(Duration::from_secs(5))
            .with_override(CheckType::Http, Duration::from_secs(2));
        assert_eq!(lookup.timeout_for(CheckType::Http).unwrap(), Duration::from_secs(2));
        assert_eq!(lookup.timeout_for(CheckType::Tcp).unwrap(), Duration::from_secs(5));
    }
}
