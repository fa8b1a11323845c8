//! End-to-end scenarios that exercise the scheduler, queue, worker pool and
//! result store together, the way a single `discoverer` tick-and-drain cycle
//! does in the running process.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use discoverer_core::checker::{CheckContext, Checker};
use discoverer_core::collab::{RecordingPersistenceSink, StaticConfigLookup, StaticRuleSource};
use discoverer_core::config::Config;
use discoverer_core::error::CheckBatchError;
use discoverer_core::loadavg::LoadTracker;
use discoverer_core::proxy_group::ProxyGroupCache;
use discoverer_core::queue::Queue;
use discoverer_core::result_store::ResultStore;
use discoverer_core::scheduler::Scheduler;
use discoverer_core::worker::Worker;
use discovery_api::{
    Check, CheckParams, CheckType, DiscoveredService, HostProxyBinding, HostResult, IpRange, Proxy, ProxyGroup, ProxyGroupState, ProxyState,
    PortRange, Rule, ServiceStatus, Task,
};
use utils::id::{DCheckId, DRuleId, HostId, ProxyGroupId, ProxyId};

/// Answers every `(ip, port)` pair with UP for a fixed set of addresses and
/// DOWN (no services) for everything else — enough to model scenario 2's
/// "some hosts respond, some don't" ICMP sweep without opening a raw socket.
struct SelectiveChecker {
    responders: Vec<IpAddr>,
}

impl Checker for SelectiveChecker {
    fn dispatch_batch(&self, task: &mut Task, ctx: &CheckContext) -> Result<Vec<HostResult>, CheckBatchError> {
        let items = task.take_chunk(usize::MAX);
        let mut by_ip: HashMap<IpAddr, Vec<DiscoveredService>> = HashMap::new();
        for item in items {
            if self.responders.contains(&item.ip) {
                by_ip.entry(item.ip).or_default().push(DiscoveredService {
                    dcheckid: DCheckId::new(1),
                    check_type: CheckType::Icmp,
                    port: 0,
                    status: ServiceStatus::Up,
                    value: String::new(),
                });
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

fn tcp_check() -> Check {
    Check {
        dcheckid: DCheckId::new(1),
        check_type: CheckType::Tcp,
        ports: PortRange::parse("22").unwrap(),
        timeout: Duration::from_secs(1),
        params: CheckParams::None,
        uniqueness_criteria: false,
    }
}

fn icmp_check() -> Check {
    Check {
        dcheckid: DCheckId::new(2),
        check_type: CheckType::Icmp,
        ports: PortRange::parse("0").unwrap(),
        timeout: Duration::from_secs(1),
        params: CheckParams::None,
        uniqueness_criteria: false,
    }
}

/// Scenario 1: a single-IP, single-TCP-check rule schedules one job with one
/// task, a worker reports the service up, and the next scheduler tick
/// flushes exactly one `update_service` + `update_host` pair.
#[test]
fn single_ip_tcp_rule_flushes_update_service_then_update_host() {
    let rule = Rule {
        druleid: DRuleId::new(1),
        delay: "60s".to_owned(),
        iprange: IpRange::parse("10.0.0.1").unwrap(),
        checks: vec![tcp_check()],
        revision: 1,
        unique_check_id: None,
        enabled: true,
    };
    let rule_source = Arc::new(StaticRuleSource::new(vec![rule], Duration::from_secs(60)));
    let config_lookup = Arc::new(StaticConfigLookup::new(Duration::from_secs(5)));
    let persistence = Arc::new(RecordingPersistenceSink::new());
    let queue = Arc::new(Queue::new(&Config::default()));
    let store = Arc::new(ResultStore::new());

    let mut scheduler = Scheduler::new(queue.clone(), store.clone(), rule_source, config_lookup, persistence.clone());
    scheduler.tick(SystemTime::UNIX_EPOCH);
    assert_eq!(queue.pending_checks_count(), 1);

    let checker: Arc<dyn Checker> = Arc::new(SelectiveChecker {
        responders: vec!["10.0.0.1".parse().unwrap()],
    });
    let worker = Worker::new(0, queue.clone(), store.clone(), checker, Arc::new(LoadTracker::new(1)), Arc::new(AtomicBool::new(false)), 1000);
    worker.run_once();
    worker.run_once();
    assert_eq!(queue.pending_checks_count(), 0);

    scheduler.tick(SystemTime::UNIX_EPOCH);

    let calls = persistence.calls();
    let update_service_idx = calls.iter().position(|c| c.starts_with("update_service")).expect("update_service call");
    let update_host_idx = calls.iter().position(|c| c.starts_with("update_host")).expect("update_host call");
    assert!(update_service_idx < update_host_idx, "update_service must precede update_host: {calls:?}");
    assert!(calls[update_service_idx].contains("status=Up"));
}

/// Scenario 2: an ICMP sweep over a four-address range where two hosts
/// respond. The task is marked exhausted in one `take_chunk` pass, so
/// `merge_fullrange` backfills empty placeholders for the non-responders —
/// four results total, two up and two down.
#[test]
fn icmp_range_produces_a_result_per_address_responders_and_silent_alike() {
    let rule = Rule {
        druleid: DRuleId::new(2),
        delay: "60s".to_owned(),
        iprange: IpRange::parse("10.0.0.1-10.0.0.4").unwrap(),
        checks: vec![icmp_check()],
        revision: 1,
        unique_check_id: None,
        enabled: true,
    };
    let rule_source = Arc::new(StaticRuleSource::new(vec![rule], Duration::from_secs(60)));
    let config_lookup = Arc::new(StaticConfigLookup::new(Duration::from_secs(5)));
    let persistence = Arc::new(RecordingPersistenceSink::new());
    let queue = Arc::new(Queue::new(&Config::default()));
    let store = Arc::new(ResultStore::new());

    let mut scheduler = Scheduler::new(queue.clone(), store.clone(), rule_source, config_lookup, persistence);
    scheduler.tick(SystemTime::UNIX_EPOCH);
    assert_eq!(queue.pending_checks_count(), 4);

    let checker: Arc<dyn Checker> = Arc::new(SelectiveChecker {
        responders: vec!["10.0.0.1".parse().unwrap(), "10.0.0.3".parse().unwrap()],
    });
    let worker = Worker::new(0, queue.clone(), store.clone(), checker, Arc::new(LoadTracker::new(1)), Arc::new(AtomicBool::new(false)), 1000);
    worker.run_once();
    worker.run_once();
    assert_eq!(queue.pending_checks_count(), 0);

    let (completed, _more) = store.take_completed(&Default::default(), 10);
    assert_eq!(completed.len(), 4);
    let up = completed.iter().filter(|r| !r.services.is_empty()).count();
    let down = completed.iter().filter(|r| r.services.is_empty()).count();
    assert_eq!(up, 2);
    assert_eq!(down, 2);
}

fn proxy(id: u64, group: ProxyGroupId, lastaccess: SystemTime) -> Proxy {
    Proxy {
        proxyid: ProxyId::new(id),
        name: format!("proxy{id}"),
        group: Some(group),
        local_address: format!("10.0.0.{id}"),
        local_port: "10051".to_owned(),
        lastaccess,
        deleted_group_hosts: Vec::new(),
        sync_time: SystemTime::now(),
        state: ProxyState::Online,
    }
}

/// Scenario 5: a host added to a group with two online proxies gets
/// assigned to exactly one of them, and `hostmap_revision` advances exactly
/// once for the change (not again on a no-op rebalance).
#[test]
fn host_added_to_group_is_assigned_to_exactly_one_online_proxy() {
    let cache = ProxyGroupCache::new();
    let group_id = ProxyGroupId::new(1);
    cache.sync_proxy_group(
        vec![ProxyGroup {
            proxy_groupid: group_id,
            name: "g".to_owned(),
            failover_delay: Duration::from_secs(60),
            min_online: 1,
            proxies: vec![ProxyId::new(1), ProxyId::new(2)],
            hostids: vec![],
            hostmap_revision: 0,
            revision: 1,
            state: ProxyGroupState::Active,
        }],
        1,
    );
    cache.sync_proxy(
        vec![proxy(1, group_id, SystemTime::now()), proxy(2, group_id, SystemTime::now())],
        1,
    );

    let h3 = HostId::new(3);
    cache.update_host_pgroup(vec![(h3, ProxyGroupId::new(0), group_id)]);
    cache.cache_update_groups();
    let stats = cache.get_proxy_group_stats(group_id).unwrap();
    assert_eq!(stats.host_count, 1);
    assert_eq!(stats.online_count, 2);
    assert_eq!(stats.hostmap_revision, 1, "the first rebalance that actually moves a host must advance the revision");

    cache.cache_update_groups();
    let stats_again = cache.get_proxy_group_stats(group_id).unwrap();
    assert_eq!(stats_again.host_count, 1, "a repeat rebalance must not duplicate the host");
    assert_eq!(
        stats_again.hostmap_revision, 1,
        "a repeat rebalance with no membership change must not advance the revision again"
    );
}

/// Scenario 6: a proxy that has gone quiet for longer than its group's
/// failover delay issues exactly one redirect, then stamps `lastreset` so a
/// second call inside the same window is suppressed.
#[test]
fn failover_redirect_fires_once_then_is_suppressed_within_the_window() {
    let cache = ProxyGroupCache::new();
    let group_id = ProxyGroupId::new(1);
    let failover_delay = Duration::from_secs(60);
    let now = SystemTime::now();
    let stale_lastaccess = now - Duration::from_secs(120);

    cache.sync_proxy_group(
        vec![ProxyGroup {
            proxy_groupid: group_id,
            name: "g".to_owned(),
            failover_delay,
            min_online: 1,
            proxies: vec![ProxyId::new(1)],
            hostids: vec![],
            hostmap_revision: 0,
            revision: 1,
            state: ProxyGroupState::Active,
        }],
        1,
    );
    cache.sync_proxy(vec![proxy(1, group_id, stale_lastaccess)], 1);
    cache.sync_host_proxy(
        vec![HostProxyBinding {
            host_name: "host1".to_owned(),
            hostid: HostId::new(5),
            proxyid: ProxyId::new(1),
            revision: 1,
            lastreset: SystemTime::UNIX_EPOCH,
        }],
        1,
    );

    let first = cache.get_host_redirect("host1", ProxyId::new(1), now);
    assert!(first.is_some(), "a proxy silent past its failover delay must redirect on the first call");

    let second = cache.get_host_redirect("host1", ProxyId::new(1), now);
    assert!(second.is_none(), "a repeat call within failover_delay must be suppressed by the lastreset stamp");
}
