//! `SyncSingle`: one `(ip, port, check)` probe at a time, used for the agent
//! protocol. Each completion decrements `CheckCount` by exactly one, so this
//! driver yields one partial [`HostResult`] per probed item rather than
//! batching several into one.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::SystemTime;

use discovery_api::{CheckParams, DiscoveredService, HostResult, ServiceStatus, Task};
use discoverer_core::checker::{CheckContext, Checker};
use discoverer_core::error::CheckBatchError;

use crate::drivers::AgentDispatcher;

pub struct SyncSingleChecker<D> {
    dispatcher: D,
}

impl<D: AgentDispatcher> SyncSingleChecker<D> {
    pub fn new(dispatcher: D) -> Self {
        Self { dispatcher }
    }
}

impl<D: AgentDispatcher> Checker for SyncSingleChecker<D> {
    fn dispatch_batch(&self, task: &mut Task, ctx: &CheckContext) -> Result<Vec<HostResult>, CheckBatchError> {
        let mut by_ip: HashMap<IpAddr, Vec<DiscoveredService>> = HashMap::new();
        loop {
            let items = task.take_chunk(1);
            if items.is_empty() {
                break;
            }
            for item in items {
                let check = &task.checks[item.check_index];
                let CheckParams::Agent { key } = &check.params else {
                    continue;
                };
                let service = match self.dispatcher.query(item.ip, item.port, key, check.timeout) {
                    Ok(value) => DiscoveredService {
                        dcheckid: check.dcheckid,
                        check_type: check.check_type,
                        port: item.port,
                        status: ServiceStatus::Up,
                        value,
                    },
                    Err(_) => DiscoveredService {
                        dcheckid: check.dcheckid,
                        check_type: check.check_type,
                        port: item.port,
                        status: ServiceStatus::Down,
                        value: String::new(),
                    },
                };
                by_ip.entry(item.ip).or_default().push(service);
            }
        }

        Ok(by_ip
            .into_iter()
            .map(|(ip, services)| HostResult {
                druleid: task.druleid,
                ip: Some(ip),
                dnsname: String::new(),
                services,
                now: ctx.now,
                unique_dcheckid: None,
                processed_checks_per_ip: task.expected_checks_per_ip(),
                error: None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discovery_api::{BatchKind, Check, CheckType, IpRange, PortRange};
    use std::time::Duration;
    use utils::id::DCheckId;

    struct StubDispatcher;

    impl AgentDispatcher for StubDispatcher {
        fn query(&self, _addr: IpAddr, _port: u16, _key: &str, _timeout: Duration) -> Result<String, discoverer_core::error::CheckError> {
            Ok("linux".to_owned())
        }
    }

    #[test]
    fn one_service_per_agent_item() {
        let check = Check {
            dcheckid: DCheckId::new(1),
            check_type: CheckType::Agent,
            ports: PortRange::parse("10050").unwrap(),
            timeout: Duration::from_secs(1),
            params: CheckParams::Agent { key: "system.uname".to_owned() },
            uniqueness_criteria: false,
        };
        let mut task = Task::new(
            utils::id::DRuleId::new(1),
            BatchKind::Sync,
            vec![check],
            IpRange::parse("10.0.0.1").unwrap(),
        );
        let checker = SyncSingleChecker::new(StubDispatcher);
        let ctx = CheckContext { now: SystemTime::UNIX_EPOCH, job_tasks_inprogress_max: 1000 };
        let results = checker.dispatch_batch(&mut task, &ctx).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].services.len(), 1);
        assert_eq!(results[0].services[0].value, "linux");
    }
}
