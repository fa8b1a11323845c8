//! [`Job`]/[`Task`]: the scheduler's materialisation of a [`crate::rule::Rule`]
//! into units a worker can pop and execute.
//!
//! A [`Task`] owns its address range outright; its cursor is three plain
//! indices (`ip_index`, `port_index`, `check_index`) advanced by
//! [`Task::take_chunk`], so a worker can resume a partially-consumed batch
//! without aliasing between a task and the job that owns it.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::check::{BatchKind, Check};
use crate::iprange::IpRange;
use utils::id::DRuleId;

/// One `(ip, port, check)` triple a [`Task`] has yielded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskItem {
    pub ip: IpAddr,
    pub port: u16,
    pub check_index: usize,
}

/// A scheduler-expanded unit of work: every check sharing one batch driver
/// (sync / icmp / async), against one IP range. A task is popped from its
/// owning [`Job`] as a whole, but a single worker may call
/// [`Task::take_chunk`] more than once against it (e.g. the ICMP driver
/// chunks by `DISCOVERER_JOB_TASKS_INPROGRESS_MAX`).
#[derive(Debug, Clone)]
pub struct Task {
    pub druleid: DRuleId,
    pub batch_kind: BatchKind,
    pub checks: Vec<Check>,
    pub ipranges: IpRange,

    ip_index: usize,
    port_index: usize,
    check_index: usize,

    current_ip: Option<IpAddr>,
    current_port: Option<u16>,

    /// Snapshot of every address in `ipranges`, computed once at task
    /// creation. The scheduler only ever builds tasks whose full expansion
    /// already fit under the queue's remaining capacity, so materialising
    /// this up front (rather than re-deriving it lazily on every
    /// `take_chunk` call) is bounded by construction.
    addrs: Vec<IpAddr>,

    consumed_checks: u64,
}

impl Task {
    pub fn new(druleid: DRuleId, batch_kind: BatchKind, checks: Vec<Check>, ipranges: IpRange) -> Self {
        let addrs: Vec<IpAddr> = ipranges.iter_addrs().collect();
        let current_ip = addrs.first().copied();
        let current_port = checks
            .first()
            .and_then(|c| c.ports.iter_ports().next());
        Self {
            druleid,
            batch_kind,
            checks,
            ipranges,
            ip_index: 0,
            port_index: 0,
            check_index: 0,
            current_ip,
            current_port,
            addrs,
            consumed_checks: 0,
        }
    }

    /// Expected number of checks per IP: one per `(port, check)` pair for
    /// async/sync checks, or one for ICMP regardless of port count. Used by
    /// `ResultStore` to know how many checks a given IP still owes.
    pub fn expected_checks_per_ip(&self) -> u32 {
        match self.batch_kind {
            BatchKind::Icmp => self.checks.len() as u32,
            BatchKind::Sync | BatchKind::Async => self
                .checks
                .iter()
                .map(|c| c.ports.count().max(1) as u32)
                .sum(),
        }
    }

    /// Total `(ip, port, check)` triples this task will ever yield. Equal to
    /// `addrs.len() * expected_checks_per_ip()` — computed once so the
    /// worker can subtract it from `pending_checks_count` in O(1) when the
    /// task is popped.
    pub fn total_checks(&self) -> u64 {
        self.addrs.len() as u64 * self.expected_checks_per_ip() as u64
    }

    pub fn is_exhausted(&self) -> bool {
        self.ip_index >= self.addrs.len()
    }

    pub fn current_ip(&self) -> Option<IpAddr> {
        self.current_ip
    }

    pub fn current_port(&self) -> Option<u16> {
        self.current_port
    }

    /// Pulls up to `max` unconsumed `(ip, port, check)` triples, advancing
    /// the cursor past them. Returns fewer than `max` only when the task is
    /// exhausted.
    pub fn take_chunk(&mut self, max: usize) -> Vec<TaskItem> {
        let mut out = Vec::with_capacity(max.min(64));
        while out.len() < max && self.ip_index < self.addrs.len() {
            let ip = self.addrs[self.ip_index];
            let check = &self.checks[self.check_index];
            let ports: Vec<u16> = check.ports.iter_ports().collect();
            let port = ports.get(self.port_index).copied().unwrap_or(0);

            out.push(TaskItem {
                ip,
                port,
                check_index: self.check_index,
            });
            self.consumed_checks += 1;

            // Advance check, then port, then ip — innermost to outermost,
            // matching the table-scan order `process_rule` used to expand
            // the task in.
            self.check_index += 1;
            if self.check_index >= self.checks.len() {
                self.check_index = 0;
                self.port_index += 1;
                if self.port_index >= ports.len().max(1) {
                    self.port_index = 0;
                    self.ip_index += 1;
                }
            }
        }

        self.current_ip = self.addrs.get(self.ip_index).copied();
        self.current_port = self
            .checks
            .get(self.check_index)
            .and_then(|c| c.ports.iter_ports().nth(self.port_index));

        out
    }

    /// Every address this task covers, consumed or not — used when a task
    /// is aborted mid-flight and the caller needs to account for every IP
    /// it would otherwise have touched (e.g. ICMP non-responders).
    pub fn addrs(&self) -> &[IpAddr] {
        &self.addrs
    }

    /// Checks this task has not yet yielded via [`Self::take_chunk`].
    pub fn remaining_checks(&self) -> u64 {
        self.total_checks().saturating_sub(self.consumed_checks)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Waiting,
    Removing,
}

/// A scheduler-materialised instance of a [`crate::rule::Rule`] currently
/// being processed. `workers_used` is tracked with an `AtomicU32` rather
/// than behind the queue mutex alone, because `Worker` reads it to decide
/// whether to self-throttle without always needing to hold the queue lock.
#[derive(Debug)]
pub struct Job {
    pub druleid: DRuleId,
    pub drule_revision: u64,
    pub tasks: Vec<Task>,
    /// `0` means unlimited parallelism.
    pub workers_max: u32,
    workers_used: AtomicU32,
    pub status: JobStatus,
}

impl Job {
    pub fn new(druleid: DRuleId, drule_revision: u64, tasks: Vec<Task>, workers_max: u32) -> Self {
        Self {
            druleid,
            drule_revision,
            tasks,
            workers_max,
            workers_used: AtomicU32::new(0),
            status: JobStatus::Queued,
        }
    }

    pub fn workers_used(&self) -> u32 {
        self.workers_used.load(Ordering::SeqCst)
    }

    pub fn inc_workers_used(&self) -> u32 {
        self.workers_used.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn dec_workers_used(&self) -> u32 {
        self.workers_used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .unwrap_or(0)
            .saturating_sub(1)
    }

    pub fn has_worker_capacity(&self) -> bool {
        self.workers_max == 0 || self.workers_used() < self.workers_max
    }

    pub fn pop_task(&mut self) -> Option<Task> {
        self.tasks.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Sum of each remaining task's unconsumed checks — used when a rule is
    /// cancelled mid-flight to subtract the right amount from
    /// `pending_checks_count`.
    pub fn remaining_checks(&self) -> u64 {
        self.tasks.iter().map(Task::remaining_checks).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckParams, CheckType};
    use crate::iprange::PortRange;
    use std::time::Duration;

    fn tcp_check(ports: &str) -> Check {
        Check {
            dcheckid: utils::id::DCheckId::new(1),
            check_type: CheckType::Tcp,
            ports: PortRange::parse(ports).unwrap(),
            timeout: Duration::from_secs(1),
            params: CheckParams::None,
            uniqueness_criteria: false,
        }
    }

    #[test]
    fn take_chunk_enumerates_every_ip_port_pair() {
        let mut task = Task::new(
            DRuleId::new(1),
            BatchKind::Async,
            vec![tcp_check("22,80")],
            IpRange::parse("10.0.0.1-10.0.0.2").unwrap(),
        );
        assert_eq!(task.total_checks(), 4);
        let chunk = task.take_chunk(10);
        assert_eq!(chunk.len(), 4);
        assert!(task.is_exhausted());
    }

    #[test]
    fn take_chunk_respects_max_and_resumes() {
        let mut task = Task::new(
            DRuleId::new(1),
            BatchKind::Async,
            vec![tcp_check("22,80")],
            IpRange::parse("10.0.0.1-10.0.0.2").unwrap(),
        );
        let first = task.take_chunk(2);
        assert_eq!(first.len(), 2);
        assert!(!task.is_exhausted());
        let second = task.take_chunk(2);
        assert_eq!(second.len(), 2);
        assert!(task.is_exhausted());
        let third = task.take_chunk(2);
        assert!(third.is_empty());
    }

    #[test]
    fn job_worker_capacity_tracks_max() {
        let job = Job::new(DRuleId::new(1), 1, vec![], 1);
        assert!(job.has_worker_capacity());
        job.inc_workers_used();
        assert!(!job.has_worker_capacity());
        job.dec_workers_used();
        assert!(job.has_worker_capacity());
    }

    #[test]
    fn job_zero_workers_max_means_unlimited() {
        let job = Job::new(DRuleId::new(1), 1, vec![], 0);
        for _ in 0..10 {
            job.inc_workers_used();
        }
        assert!(job.has_worker_capacity());
    }
}
