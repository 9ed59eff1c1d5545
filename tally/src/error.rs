use thiserror::Error;

use crate::job::JobId;

/// Errors returned by scheduler operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("job type must not be empty")]
    EmptyJobType,

    /// Only raised when `require_registered_processor` is enabled.
    #[error("no processor registered for job type '{0}'")]
    UnknownJobType(String),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("scheduler already started")]
    AlreadyStarted,

    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}

/// Why a single execution of a job did not succeed.
///
/// The `Display` form is what ends up in `Job::error`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobFailure {
    #[error("no processor registered for job type '{job_type}'")]
    MissingProcessor { job_type: String },

    /// Message of the processor's error, verbatim.
    #[error("{0}")]
    Processor(String),

    #[error("job timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("processor panicked: {0}")]
    Panicked(String),

    #[error("job cancelled")]
    Cancelled,

    #[error("no worker available to run job")]
    WorkerUnavailable,
}

impl JobFailure {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            JobFailure::MissingProcessor { .. } => "missing_processor",
            JobFailure::Processor(_) => "processor_error",
            JobFailure::Timeout { .. } => "timeout",
            JobFailure::Panicked(_) => "panicked",
            JobFailure::Cancelled => "cancelled",
            JobFailure::WorkerUnavailable => "worker_unavailable",
        }
    }
}
