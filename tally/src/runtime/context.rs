use serde_json::Value;
use std::sync::Weak;

use crate::error::SchedulerError;
use crate::job::{clamp_progress, Job, JobId};

use super::cancel::CancelToken;
use super::supervisor::SchedulerShared;

/// Handle passed to a [`Processor`](crate::Processor) for one execution.
///
/// Carries a snapshot of the job as it was when the execution started, a
/// way to report progress back to the scheduler, and the cancellation token
/// that fires when the job is removed while running.
#[derive(Clone)]
pub struct JobContext {
    job: Job,
    cancel: CancelToken,
    scheduler: Option<Weak<SchedulerShared>>,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job.id)
            .field("job_type", &self.job.job_type)
            .field("attempt", &self.job.attempts)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl JobContext {
    pub(crate) fn new(job: Job, cancel: CancelToken, scheduler: Weak<SchedulerShared>) -> Self {
        Self {
            job,
            cancel,
            scheduler: Some(scheduler),
        }
    }

    /// Context that is not attached to a scheduler.
    ///
    /// Progress reports are clamped and returned but go nowhere. Useful for
    /// calling a processor directly in tests.
    pub fn detached(job: Job, cancel: CancelToken) -> Self {
        Self {
            job,
            cancel,
            scheduler: None,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn id(&self) -> JobId {
        self.job.id
    }

    pub fn job_type(&self) -> &str {
        &self.job.job_type
    }

    pub fn payload(&self) -> &Value {
        &self.job.payload
    }

    /// 1-based number of the current execution.
    pub fn attempt(&self) -> u32 {
        self.job.attempts
    }

    /// Report progress for this job. The value is clamped into `[0, 100]`.
    ///
    /// Fails with `JobNotFound` once the job has been removed or the
    /// scheduler has been dropped.
    pub fn report_progress(&self, value: i64) -> Result<u8, SchedulerError> {
        match &self.scheduler {
            None => Ok(clamp_progress(value)),
            Some(weak) => match weak.upgrade() {
                Some(shared) => shared.update_progress(&self.job.id, value),
                None => Err(SchedulerError::JobNotFound(self.job.id)),
            },
        }
    }

    pub fn cancellation(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_detached_context_clamps_progress() {
        let job = Job::new("backup", json!({"target": "s3"}), JobOptions::default(), Utc::now());
        let ctx = JobContext::detached(job.clone(), CancelToken::new());

        assert_eq!(ctx.id(), job.id);
        assert_eq!(ctx.job_type(), "backup");
        assert_eq!(ctx.payload()["target"], "s3");
        assert_eq!(ctx.report_progress(-5), Ok(0));
        assert_eq!(ctx.report_progress(500), Ok(100));
    }

    #[test]
    fn test_dropped_scheduler_reports_not_found() {
        let job = Job::new("backup", Value::Null, JobOptions::default(), Utc::now());
        let ctx = JobContext::new(job.clone(), CancelToken::new(), Weak::new());
        assert_eq!(
            ctx.report_progress(10),
            Err(SchedulerError::JobNotFound(job.id))
        );
    }

    #[test]
    fn test_cancellation_is_visible() {
        let job = Job::new("backup", Value::Null, JobOptions::default(), Utc::now());
        let token = CancelToken::new();
        let ctx = JobContext::detached(job, token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(ctx.cancellation().is_cancelled());
    }
}
