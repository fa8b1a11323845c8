//! The worker loop: pop a job, lease one of its tasks, dispatch it through
//! the configured [`Checker`], merge results, and decide whether the job
//! goes back on the queue, waits for capacity, or is torn down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use discovery_api::{HostResult, Job, JobStatus, RuleError};
use utils::id::DRuleId;

use crate::checker::{CheckContext, Checker};
use crate::loadavg::LoadTracker;
use crate::queue::Queue;
use crate::result_store::ResultStore;

pub struct Worker {
    index: usize,
    queue: Arc<Queue>,
    result_store: Arc<ResultStore>,
    checker: Arc<dyn Checker>,
    load_tracker: Arc<LoadTracker>,
    stop: Arc<AtomicBool>,
    job_tasks_inprogress_max: u32,
}

impl Worker {
    pub fn new(
        index: usize,
        queue: Arc<Queue>,
        result_store: Arc<ResultStore>,
        checker: Arc<dyn Checker>,
        load_tracker: Arc<LoadTracker>,
        stop: Arc<AtomicBool>,
        job_tasks_inprogress_max: u32,
    ) -> Self {
        Self {
            index,
            queue,
            result_store,
            checker,
            load_tracker,
            stop,
            job_tasks_inprogress_max,
        }
    }

    /// Runs until `stop` is set. Intended to be the body of a
    /// `std::thread::spawn`'d OS thread, one per entry in the worker pool.
    pub fn run(&self) {
        self.queue.register_worker();
        while !self.stop.load(Ordering::SeqCst) {
            self.run_once();
        }
    }

    /// Pops and executes at most one task, or parks briefly if the queue is
    /// empty. Exposed so a caller that wants synchronous, single-step
    /// control over the worker loop — rather than the free-running
    /// `run` — can drive it directly.
    pub fn run_once(&self) {
        let idle_start = Instant::now();
        let job_arc = match self.queue.pop() {
            Some(job) => job,
            None => {
                self.queue.wait(Duration::from_secs(1));
                return;
            }
        };

        let task = {
            let mut job = job_arc.lock().unwrap();
            job.pop_task()
        };

        let mut task = match task {
            Some(task) => task,
            None => {
                self.finish_empty_job(&job_arc);
                return;
            }
        };

        let druleid = task.druleid;
        self.queue.sub_pending(task.total_checks());

        let should_wait = {
            let mut job = job_arc.lock().unwrap();
            let used = job.inc_workers_used();
            let should_wait = job.workers_max != 0 && used >= job.workers_max;
            if should_wait {
                job.status = JobStatus::Waiting;
            }
            should_wait
        };
        if !should_wait {
            self.queue.mark_ready(druleid);
        }

        let is_snmpv3 = task.checks.iter().any(|c| c.check_type.is_snmpv3());
        if is_snmpv3 {
            while !self.queue.try_acquire_snmpv3() {
                if self.stop.load(Ordering::SeqCst) {
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        }

        let busy_start = Instant::now();
        let ctx = CheckContext {
            now: SystemTime::now(),
            job_tasks_inprogress_max: self.job_tasks_inprogress_max,
        };
        let outcome = self.checker.dispatch_batch(&mut task, &ctx);
        let busy = busy_start.elapsed();
        let idle = idle_start.elapsed().saturating_sub(busy);
        self.load_tracker.record(self.index, busy, idle);

        if is_snmpv3 {
            self.queue.release_snmpv3();
        }

        match outcome {
            Ok(partials) => self.apply_results(&task, partials, ctx.now),
            Err(err) => {
                tracing::warn!(%druleid, error = %err, "task batch failed, aborting job");
                self.queue.append_error(RuleError {
                    druleid,
                    message: err.to_string(),
                });
                self.queue.cancel(druleid);
            }
        }

        self.complete_task(&job_arc, druleid);
    }

    fn apply_results(&self, task: &discovery_api::Task, partials: Vec<HostResult>, now: SystemTime) {
        if task.is_exhausted() {
            self.result_store.merge_fullrange(task, partials, now);
        } else {
            self.result_store.merge_partial(task, partials);
        }
    }

    fn finish_empty_job(&self, job_arc: &Arc<Mutex<Job>>) {
        let (druleid, workers_used, is_empty) = {
            let job = job_arc.lock().unwrap();
            (job.druleid, job.workers_used(), job.is_empty())
        };
        if workers_used == 0 && is_empty {
            self.result_store
                .insert_rule_level(HostResult::empty_for_rule(druleid, SystemTime::now(), None));
            self.queue.finalize(druleid);
        } else {
            job_arc.lock().unwrap().status = JobStatus::Removing;
        }
    }

    fn complete_task(&self, job_arc: &Arc<Mutex<Job>>, druleid: DRuleId) {
        let mut job = job_arc.lock().unwrap();
        let used = job.dec_workers_used();
        match job.status {
            JobStatus::Waiting => {
                job.status = JobStatus::Queued;
                drop(job);
                self.queue.mark_ready(druleid);
            }
            JobStatus::Removing if used == 0 && job.is_empty() => {
                drop(job);
                self.queue.finalize(druleid);
            }
            _ => {}
        }
    }

    pub fn wake(&self) {
        self.queue.notify_all();
    }
}

pub fn spawn_pool(
    count: usize,
    queue: Arc<Queue>,
    result_store: Arc<ResultStore>,
    checker: Arc<dyn Checker>,
    load_tracker: Arc<LoadTracker>,
    stop: Arc<AtomicBool>,
    job_tasks_inprogress_max: u32,
) -> Vec<std::thread::JoinHandle<()>> {
    (0..count)
        .map(|index| {
            let worker = Worker::new(
                index,
                queue.clone(),
                result_store.clone(),
                checker.clone(),
                load_tracker.clone(),
                stop.clone(),
                job_tasks_inprogress_max,
            );
            std::thread::Builder::new()
                .name(format!("discoverer-worker-{index}"))
                .spawn(move || worker.run())
                .expect("failed to spawn worker thread")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use discovery_api::{BatchKind, Check, CheckParams, CheckType, DiscoveredService, IpRange, PortRange, ServiceStatus};
    use utils::id::DCheckId;

    struct AlwaysUpChecker;

    impl Checker for AlwaysUpChecker {
        fn dispatch_batch(
            &self,
            task: &mut discovery_api::Task,
            ctx: &CheckContext,
        ) -> Result<Vec<HostResult>, crate::error::CheckBatchError> {
            let items = task.take_chunk(usize::MAX);
            let mut by_ip: std::collections::HashMap<std::net::IpAddr, Vec<DiscoveredService>> =
                std::collections::HashMap::new();
            for item in items {
                by_ip.entry(item.ip).or_default().push(DiscoveredService {
                    dcheckid: DCheckId::new(1),
                    check_type: CheckType::Tcp,
                    port: item.port,
                    status: ServiceStatus::Up,
                    value: String::new(),
                });
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

    struct AlwaysFailChecker;

    impl Checker for AlwaysFailChecker {
        fn dispatch_batch(
            &self,
            _task: &mut discovery_api::Task,
            _ctx: &CheckContext,
        ) -> Result<Vec<HostResult>, crate::error::CheckBatchError> {
            Err(crate::error::CheckBatchError::Driver("boom".to_owned()))
        }
    }

    fn tcp_task(druleid: u64, range: &str) -> discovery_api::Task {
        let check = Check {
            dcheckid: DCheckId::new(1),
            check_type: CheckType::Tcp,
            ports: PortRange::parse("22").unwrap(),
            timeout: std::time::Duration::from_secs(1),
            params: CheckParams::None,
            uniqueness_criteria: false,
        };
        discovery_api::Task::new(DRuleId::new(druleid), BatchKind::Async, vec![check], IpRange::parse(range).unwrap())
    }

    #[test]
    fn successful_task_flushes_a_result_and_clears_pending() {
        let queue = Arc::new(Queue::new(&Config::default()));
        let store = Arc::new(ResultStore::new());
        let checker: Arc<dyn Checker> = Arc::new(AlwaysUpChecker);
        let tracker = Arc::new(LoadTracker::new(1));
        let stop = Arc::new(AtomicBool::new(false));

        let task = tcp_task(1, "10.0.0.1");
        store.register_pending(task.druleid, "10.0.0.1".parse().unwrap(), task.expected_checks_per_ip());
        let remaining = task.remaining_checks();
        let job = Job::new(DRuleId::new(1), 1, vec![task], 0);
        queue.add_pending(remaining);
        queue.push(job);

        let worker = Worker::new(0, queue.clone(), store.clone(), checker, tracker, stop, 1000);
        worker.run_once(); // pops the task, dispatches, merges
        worker.run_once(); // observes the job empty, emits nothing further

        assert_eq!(queue.pending_checks_count(), 0);
        let (completed, _more) = store.take_completed(&Default::default(), 10);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].services.len(), 1);
    }

    #[test]
    fn failed_batch_aborts_the_job_and_records_an_error() {
        let queue = Arc::new(Queue::new(&Config::default()));
        let store = Arc::new(ResultStore::new());
        let checker: Arc<dyn Checker> = Arc::new(AlwaysFailChecker);
        let tracker = Arc::new(LoadTracker::new(1));
        let stop = Arc::new(AtomicBool::new(false));

        let task = tcp_task(2, "10.0.0.1-10.0.0.2");
        let remaining = task.remaining_checks();
        let job = Job::new(DRuleId::new(2), 1, vec![task], 0);
        queue.add_pending(remaining);
        queue.push(job);

        let worker = Worker::new(0, queue.clone(), store, checker, tracker, stop, 1000);
        worker.run_once();

        assert_eq!(queue.pending_checks_count(), 0);
        assert!(!queue.is_active(DRuleId::new(2)));
        let errors = queue.drain_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].druleid, DRuleId::new(2));
    }
}
