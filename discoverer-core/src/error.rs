//! Error taxonomy shared by every subsystem in this crate: each layer gets
//! its own `thiserror` enum, and all of them expose the same coarse
//! [`ErrorKind`] so callers can decide "log and continue" vs "log and exit"
//! without matching on concrete variants.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// One protocol probe failed or timed out. Consumed inside the checker;
    /// never surfaces past it.
    Check,
    /// A whole batch driver failed; the owning job is aborted.
    Batch,
    /// Invalid delay/timeout, or the queue had no room for a rule's expansion.
    Scheduling,
    /// A worker's result referenced a rule revision the scheduler already
    /// retired. Silently discarded by design, but still worth a metric.
    RevisionSkew,
    /// IPC bind failure, thread spawn failure, or config-cache init failure.
    /// The process exits after logging.
    Fatal,
}

pub trait ReportableError: std::error::Error {
    fn kind(&self) -> ErrorKind;
}

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("check timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("probe failed: {0}")]
    ProbeFailed(String),
    #[error("dns resolution failed for {0}")]
    DnsFailed(String),
}

impl ReportableError for CheckError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Check
    }
}

#[derive(Debug, Error)]
pub enum CheckBatchError {
    #[error("batch driver error: {0}")]
    Driver(String),
    #[error(transparent)]
    Check(#[from] CheckError),
}

impl ReportableError for CheckBatchError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Driver(_) => ErrorKind::Batch,
            Self::Check(e) => e.kind(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid delay expression for rule {druleid}: {reason}")]
    InvalidDelay { druleid: u64, reason: String },
    #[error("invalid timeout configuration: {0}")]
    InvalidTimeout(String),
    #[error("discoverer queue is full, skipping discovery rule")]
    QueueFull,
    #[error("result for retired revision dropped: druleid={druleid}")]
    RevisionSkew { druleid: u64 },
}

impl ReportableError for SchedulerError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::RevisionSkew { .. } => ErrorKind::RevisionSkew,
            _ => ErrorKind::Scheduling,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to bind ipc socket at {path}: {source}")]
    IpcBind {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(std::io::Error),
    #[error("configuration cache failed to initialise: {0}")]
    ConfigInit(String),
}

impl ReportableError for ServiceError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Fatal
    }
}
