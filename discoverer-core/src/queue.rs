//! The job queue: a `Mutex<QueueInner>` plus a `Condvar`, matching this
//! workspace's preference for `std::sync::{Mutex, Condvar}` over hand-rolled
//! wait/notify plumbing.
//!
//! Each job lives in the queue's `jobs` map for its whole lifetime as an
//! `Arc<Mutex<Job>>`; `ready` only ever holds ids, so a job with tasks left
//! for more than one worker can be marked ready again immediately after a
//! task is popped from it, without any worker ever owning the job outright.
//! This is the Rust reading of the "workers borrow tasks by pop-out-of-list
//! rather than pointer sharing" rule: the thing being aliased is an `Arc`
//! behind a mutex, never a raw pointer into another thread's stack.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use discovery_api::{Job, RuleError};
use utils::id::DRuleId;

use crate::config::Config;

pub enum WaitOutcome {
    Notified,
    Timeout,
}

struct QueueInner {
    jobs: HashMap<DRuleId, Arc<Mutex<Job>>>,
    ready: VecDeque<DRuleId>,
    pending_checks_count: u64,
    errors: Vec<RuleError>,
    workers_registered: u32,
    snmpv3_allowed_workers: i32,
    queue_max_size: u64,
}

pub struct Queue {
    inner: Mutex<QueueInner>,
    condvar: Condvar,
}

impl Queue {
    pub fn new(config: &Config) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                jobs: HashMap::new(),
                ready: VecDeque::new(),
                pending_checks_count: 0,
                errors: Vec::new(),
                workers_registered: 0,
                snmpv3_allowed_workers: 1,
                queue_max_size: config.queue_max_size,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Remaining room under the pending-checks cap, used by the scheduler to
    /// bound a rule's expansion before any tasks or counts are committed.
    pub fn remaining_capacity(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner.queue_max_size.saturating_sub(inner.pending_checks_count)
    }

    pub fn pending_checks_count(&self) -> u64 {
        self.inner.lock().unwrap().pending_checks_count
    }

    pub fn jobs_active(&self) -> usize {
        self.inner.lock().unwrap().jobs.len()
    }

    pub fn add_pending(&self, n: u64) {
        self.inner.lock().unwrap().pending_checks_count += n;
    }

    pub fn sub_pending(&self, n: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending_checks_count = inner.pending_checks_count.saturating_sub(n);
    }

    /// Registers a newly-expanded job and makes it eligible for leasing.
    pub fn push(&self, job: Job) {
        let druleid = job.druleid;
        {
            let mut inner = self.inner.lock().unwrap();
            inner.jobs.insert(druleid, Arc::new(Mutex::new(job)));
            inner.ready.push_back(druleid);
        }
        self.condvar.notify_one();
    }

    /// Marks an already-registered job eligible for leasing again — used
    /// after a worker pops one task from a job that still has others left.
    pub fn mark_ready(&self, druleid: DRuleId) {
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.jobs.contains_key(&druleid) {
                return;
            }
            inner.ready.push_back(druleid);
        }
        self.condvar.notify_one();
    }

    /// Hands out a shared handle to the next ready job. The job stays
    /// registered in `job_refs` bookkeeping for as long as any handle to it
    /// is outstanding; only [`Self::finalize`] removes it.
    pub fn pop(&self) -> Option<Arc<Mutex<Job>>> {
        let mut inner = self.inner.lock().unwrap();
        while let Some(id) = inner.ready.pop_front() {
            if let Some(job) = inner.jobs.get(&id) {
                return Some(job.clone());
            }
        }
        None
    }

    /// Removes a job from bookkeeping entirely — called once a `REMOVING`
    /// job's task list is empty and `workers_used` has reached zero.
    pub fn finalize(&self, druleid: DRuleId) {
        self.inner.lock().unwrap().jobs.remove(&druleid);
    }

    /// Drops a job's remaining tasks and subtracts their checks from
    /// `pending_checks_count`, without waiting for in-flight workers to
    /// finish the tasks they already hold — used when a rule's revision
    /// changes mid-flight. An in-flight worker's result for this druleid
    /// will fail `ResultStore::decrement` once discarded and is dropped.
    pub fn cancel(&self, druleid: DRuleId) {
        let job = {
            let mut inner = self.inner.lock().unwrap();
            inner.jobs.remove(&druleid)
        };
        let Some(job) = job else { return };
        let mut job = job.lock().unwrap();
        let remaining = job.remaining_checks();
        job.tasks.clear();
        self.sub_pending(remaining);
    }

    pub fn is_active(&self, druleid: DRuleId) -> bool {
        self.inner.lock().unwrap().jobs.contains_key(&druleid)
    }

    pub fn wait(&self, timeout: Duration) -> WaitOutcome {
        let inner = self.inner.lock().unwrap();
        let (_guard, result) = self.condvar.wait_timeout(inner, timeout).unwrap();
        if result.timed_out() {
            WaitOutcome::Timeout
        } else {
            WaitOutcome::Notified
        }
    }

    pub fn notify_one(&self) {
        self.condvar.notify_one();
    }

    pub fn notify_all(&self) {
        self.condvar.notify_all();
    }

    pub fn append_error(&self, error: RuleError) {
        self.inner.lock().unwrap().errors.push(error);
    }

    pub fn drain_errors(&self) -> Vec<RuleError> {
        std::mem::take(&mut self.inner.lock().unwrap().errors)
    }

    pub fn register_worker(&self) {
        self.inner.lock().unwrap().workers_registered += 1;
    }

    pub fn workers_registered(&self) -> u32 {
        self.inner.lock().unwrap().workers_registered
    }

    /// Tries to claim the single SNMPv3 execution slot. Returns `false` if
    /// another worker already holds it.
    pub fn try_acquire_snmpv3(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.snmpv3_allowed_workers > 0 {
            inner.snmpv3_allowed_workers -= 1;
            true
        } else {
            false
        }
    }

    pub fn release_snmpv3(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.snmpv3_allowed_workers += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discovery_api::{BatchKind, Check, CheckParams, CheckType, IpRange, PortRange};
    use utils::id::DCheckId;

    fn empty_job(id: u64) -> Job {
        Job::new(DRuleId::new(id), 1, vec![], 0)
    }

    fn single_ip_task(druleid: u64) -> discovery_api::Task {
        let check = Check {
            dcheckid: DCheckId::new(1),
            check_type: CheckType::Tcp,
            ports: PortRange::parse("22").unwrap(),
            timeout: std::time::Duration::from_secs(1),
            params: CheckParams::None,
            uniqueness_criteria: false,
        };
        discovery_api::Task::new(
            DRuleId::new(druleid),
            BatchKind::Async,
            vec![check],
            IpRange::parse("10.0.0.1-10.0.0.2").unwrap(),
        )
    }

    #[test]
    fn push_then_pop_round_trips_a_job() {
        let queue = Queue::new(&Config::default());
        queue.push(empty_job(1));
        let job = queue.pop().expect("job should be ready");
        assert_eq!(job.lock().unwrap().druleid, DRuleId::new(1));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn mark_ready_requeues_a_job_still_in_job_refs() {
        let queue = Queue::new(&Config::default());
        queue.push(empty_job(1));
        let job = queue.pop().unwrap();
        queue.mark_ready(DRuleId::new(1));
        let job2 = queue.pop().expect("should be ready again");
        assert!(Arc::ptr_eq(&job, &job2));
    }

    #[test]
    fn finalize_removes_a_job_so_mark_ready_is_a_no_op() {
        let queue = Queue::new(&Config::default());
        queue.push(empty_job(1));
        let _job = queue.pop().unwrap();
        queue.finalize(DRuleId::new(1));
        queue.mark_ready(DRuleId::new(1));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn pending_checks_count_tracks_additions_and_subtractions() {
        let queue = Queue::new(&Config::default());
        queue.add_pending(10);
        queue.sub_pending(3);
        assert_eq!(queue.pending_checks_count(), 7);
        queue.sub_pending(100);
        assert_eq!(queue.pending_checks_count(), 0);
    }

    #[test]
    fn snmpv3_slot_admits_only_one_worker_at_a_time() {
        let queue = Queue::new(&Config::default());
        assert!(queue.try_acquire_snmpv3());
        assert!(!queue.try_acquire_snmpv3());
        queue.release_snmpv3();
        assert!(queue.try_acquire_snmpv3());
    }

    #[test]
    fn cancel_subtracts_remaining_checks_and_drops_the_job() {
        let queue = Queue::new(&Config::default());
        let mut job = empty_job(2);
        let task = single_ip_task(2);
        let remaining = task.remaining_checks();
        job.tasks.push(task);
        queue.add_pending(remaining);
        queue.push(job);
        queue.cancel(DRuleId::new(2));
        assert_eq!(queue.pending_checks_count(), 0);
        assert!(!queue.is_active(DRuleId::new(2)));
    }

    #[test]
    fn remaining_capacity_reflects_the_configured_cap() {
        let mut config = Config::default();
        config.queue_max_size = 100;
        let queue = Queue::new(&config);
        queue.add_pending(40);
        assert_eq!(queue.remaining_capacity(), 60);
    }
}
