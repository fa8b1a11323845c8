//! Orchestration core: the job queue, result accumulator, worker pool,
//! scheduler main loop, and proxy-group membership cache. No I/O driver
//! lives here — `discoverer-checks` supplies the [`checker::Checker`]
//! implementations and `discoverer` wires everything to a process.

pub mod checker;
pub mod collab;
pub mod config;
pub mod error;
pub mod loadavg;
pub mod metrics;
pub mod proxy_group;
pub mod queue;
pub mod result_store;
pub mod scheduler;
pub mod worker;

pub use checker::{CheckContext, Checker};
pub use collab::{ConfigLookup, PersistenceSink, RuleSource};
pub use config::Config;
pub use error::{CheckBatchError, CheckError, ErrorKind, ReportableError, SchedulerError, ServiceError};
pub use loadavg::LoadTracker;
pub use proxy_group::ProxyGroupCache;
pub use queue::Queue;
pub use result_store::ResultStore;
pub use scheduler::Scheduler;
pub use worker::{spawn_pool, Worker};
