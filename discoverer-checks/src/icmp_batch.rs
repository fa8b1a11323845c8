//! `IcmpBatch`: pings every address in a task's range in chunks bounded by
//! `job_tasks_inprogress_max`, then records one service entry per
//! responding host per ICMP check in the task. Non-responders are not
//! materialised as down hosts — ICMP's absence of a reply is not the same
//! evidence as a closed TCP port.

use std::collections::HashMap;
use std::net::IpAddr;

use discovery_api::{DiscoveredService, HostResult, ServiceStatus, Task};
use discoverer_core::checker::{CheckContext, Checker};
use discoverer_core::error::{CheckBatchError, CheckError};

use crate::drivers::IcmpDriver;

pub struct IcmpBatchChecker<D> {
    driver: D,
}

impl<D: IcmpDriver> IcmpBatchChecker<D> {
    pub fn new(driver: D) -> Self {
        Self { driver }
    }
}

impl<D: IcmpDriver> Checker for IcmpBatchChecker<D> {
    fn dispatch_batch(&self, task: &mut Task, ctx: &CheckContext) -> Result<Vec<HostResult>, CheckBatchError> {
        let chunk_size = (ctx.job_tasks_inprogress_max as usize).max(1);
        let checks = task.checks.clone();
        let timeout = checks.iter().map(|c| c.timeout).max().unwrap_or_default();

        let mut by_ip: HashMap<IpAddr, Vec<DiscoveredService>> = HashMap::new();
        loop {
            let items = task.take_chunk(chunk_size * checks.len().max(1));
            if items.is_empty() {
                break;
            }
            let unique_ips: Vec<IpAddr> = {
                let mut ips: Vec<IpAddr> = items.iter().map(|i| i.ip).collect();
                ips.sort();
                ips.dedup();
                ips
            };
            let responders = self
                .driver
                .ping_batch(&unique_ips, timeout)
                .map_err(|e: CheckError| CheckBatchError::Driver(e.to_string()))?;
            let responded: std::collections::HashSet<IpAddr> = responders.into_iter().collect();

            for ip in unique_ips {
                if !responded.contains(&ip) {
                    continue;
                }
                for check in &checks {
                    by_ip.entry(ip).or_default().push(DiscoveredService {
                        dcheckid: check.dcheckid,
                        check_type: check.check_type,
                        port: 0,
                        status: ServiceStatus::Up,
                        value: String::new(),
                    });
                }
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
    use discovery_api::{BatchKind, Check, CheckParams, CheckType, IpRange, PortRange};
    use std::time::Duration;
    use utils::id::DCheckId;

    struct AllRespond;

    impl IcmpDriver for AllRespond {
        fn ping_batch(&self, addrs: &[IpAddr], _timeout: Duration) -> Result<Vec<IpAddr>, CheckError> {
            Ok(addrs.to_vec())
        }
    }

    struct NoneRespond;

    impl IcmpDriver for NoneRespond {
        fn ping_batch(&self, _addrs: &[IpAddr], _timeout: Duration) -> Result<Vec<IpAddr>, CheckError> {
            Ok(vec![])
        }
    }

    fn icmp_task() -> Task {
        let check = Check {
            dcheckid: DCheckId::new(1),
            check_type: CheckType::Icmp,
            ports: PortRange::parse("0").unwrap(),
            timeout: Duration::from_secs(1),
            params: CheckParams::None,
            uniqueness_criteria: false,
        };
        Task::new(
            utils::id::DRuleId::new(1),
            BatchKind::Icmp,
            vec![check],
            IpRange::parse("10.0.0.1-10.0.0.3").unwrap(),
        )
    }

    #[test]
    fn responders_get_one_service_entry() {
        let mut task = icmp_task();
        let checker = IcmpBatchChecker::new(AllRespond);
        let ctx = CheckContext { now: std::time::SystemTime::UNIX_EPOCH, job_tasks_inprogress_max: 1000 };
        let results = checker.dispatch_batch(&mut task, &ctx).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.services.len() == 1));
    }

    #[test]
    fn non_responders_are_not_materialised() {
        let mut task = icmp_task();
        let checker = IcmpBatchChecker::new(NoneRespond);
        let ctx = CheckContext { now: std::time::SystemTime::UNIX_EPOCH, job_tasks_inprogress_max: 1000 };
        let results = checker.dispatch_batch(&mut task, &ctx).unwrap();
        assert!(results.is_empty());
    }
}
