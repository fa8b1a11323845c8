//! Tunables that appear as fixed `#define`s in a single-tenant daemon but
//! belong on a `Config` struct once more than one discoverer can run in a
//! process (tests, embedding). Defaults match the documented constants.

/// Hard ceiling on `Queue::pending_checks_count`. The scheduler must not
/// push a job whose check count would cross this; it caps per-rule
/// expansion instead.
pub const DEFAULT_QUEUE_MAX_SIZE: u64 = 1_000_000;

/// Cap on simultaneous in-flight tasks for one job when `workers_max == 0`
/// (unlimited parallelism requested) — used by the ICMP batch driver to
/// size its ping chunk.
pub const DEFAULT_JOB_TASKS_INPROGRESS_MAX: u32 = 1000;

/// Grace period the service waits for worker threads to join on shutdown.
pub const DEFAULT_STARTUP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Config {
    pub queue_max_size: u64,
    pub job_tasks_inprogress_max: u32,
    pub worker_count: usize,
    pub tick_delay: std::time::Duration,
    pub startup_timeout: std::time::Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_max_size: DEFAULT_QUEUE_MAX_SIZE,
            job_tasks_inprogress_max: DEFAULT_JOB_TASKS_INPROGRESS_MAX,
            worker_count: 4,
            tick_delay: std::time::Duration::from_secs(60),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}
