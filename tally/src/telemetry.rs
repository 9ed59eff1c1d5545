//! Tracing spans and metric recorders for the job lifecycle.
//!
//! Every `record_*` helper logs through `tracing` and, when the `metrics`
//! feature is enabled, also updates the Prometheus collectors in
//! [`crate::metrics`]. Without the feature they only log.
//!
//! # Example
//!
//! ```ignore
//! use tally::telemetry::{job_dispatch_span, record_job_added};
//!
//! let span = job_dispatch_span(&job.id, &job.job_type, job.attempts);
//! let _enter = span.enter();
//! record_job_added(&job.id, &job.job_type);
//! ```

use std::fmt::Display;
use std::future::Future;
use tracing::{info_span, Instrument, Span};

use crate::queue::JobStats;

/// Span covering a submission.
#[must_use]
pub fn job_add_span(job_type: impl AsRef<str>, priority: i32, delay_ms: u64) -> Span {
    info_span!(
        "tally.add",
        job_type = %job_type.as_ref(),
        priority = priority,
        delay_ms = delay_ms,
    )
}

/// Span covering one execution of a job, from hand-off to report.
#[must_use]
pub fn job_dispatch_span(job_id: impl Display, job_type: impl AsRef<str>, attempt: u32) -> Span {
    info_span!(
        "tally.dispatch",
        job_id = %job_id,
        job_type = %job_type.as_ref(),
        attempt = attempt,
    )
}

/// Span covering the settlement of an execution outcome.
#[must_use]
pub fn job_settle_span(
    job_id: impl Display,
    job_type: impl AsRef<str>,
    outcome: impl AsRef<str>,
) -> Span {
    info_span!(
        "tally.settle",
        job_id = %job_id,
        job_type = %job_type.as_ref(),
        outcome = %outcome.as_ref(),
    )
}

/// Attach a dispatch span to a future.
pub fn instrument_dispatch<F>(
    job_id: impl Display,
    job_type: impl AsRef<str>,
    attempt: u32,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    future.instrument(job_dispatch_span(job_id, job_type, attempt))
}

pub fn record_job_added(job_id: impl Display, job_type: impl AsRef<str>) {
    tracing::debug!(
        job_id = %job_id,
        job_type = %job_type.as_ref(),
        "job added"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_added(job_type.as_ref());
}

/// Record the outcome of an execution.
///
/// `status` is one of `completed`, `retrying` or `failed`.
pub fn record_job_settled(
    job_id: impl Display,
    job_type: impl AsRef<str>,
    status: impl AsRef<str>,
) {
    tracing::debug!(
        job_id = %job_id,
        job_type = %job_type.as_ref(),
        status = %status.as_ref(),
        "job settled"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_settled(job_type.as_ref(), status.as_ref());
}

pub fn observe_job_duration(job_type: impl AsRef<str>, status: impl AsRef<str>, duration_secs: f64) {
    tracing::trace!(
        job_type = %job_type.as_ref(),
        status = %status.as_ref(),
        duration_secs = duration_secs,
        "job duration observed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_job_duration(job_type.as_ref(), status.as_ref(), duration_secs);
}

/// Publish a stats snapshot to the per-status gauge.
pub fn record_stats(stats: &JobStats) {
    tracing::trace!(
        waiting = stats.waiting,
        delayed = stats.delayed,
        active = stats.active,
        completed = stats.completed,
        failed = stats.failed,
        "job stats sampled"
    );

    #[cfg(feature = "metrics")]
    for status in crate::job::JobStatus::ALL {
        crate::metrics::set_job_gauge(status.as_str(), stats.count(status) as f64);
    }
}

/// Start timing an execution.
pub fn record_job_start(job_id: impl Display) -> JobTimingHandle {
    JobTimingHandle {
        job_id: job_id.to_string(),
        start: std::time::Instant::now(),
    }
}

/// Finish timing an execution and observe its duration.
pub fn record_job_end(handle: JobTimingHandle, job_type: impl AsRef<str>, status: impl AsRef<str>) {
    observe_job_duration(job_type, status, handle.start.elapsed().as_secs_f64());
}

/// Opaque timer returned by [`record_job_start`].
#[derive(Debug)]
pub struct JobTimingHandle {
    job_id: String,
    start: std::time::Instant,
}

impl JobTimingHandle {
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    /// Spans are disabled without a subscriber, so install a bare registry.
    fn with_subscriber<T>(f: impl FnOnce() -> T) -> T {
        tracing::subscriber::with_default(tracing_subscriber::registry(), f)
    }

    #[test]
    fn test_job_add_span() {
        with_subscriber(|| {
            let span = job_add_span("backup", 10, 0);
            assert!(!span.is_disabled());
            assert_eq!(span.metadata().unwrap().name(), "tally.add");
        });
    }

    #[test]
    fn test_job_dispatch_span() {
        with_subscriber(|| {
            let span = job_dispatch_span("job-123", "chain-sync", 1);
            assert_eq!(span.metadata().unwrap().name(), "tally.dispatch");
        });
    }

    #[test]
    fn test_job_settle_span() {
        with_subscriber(|| {
            let span = job_settle_span("job-123", "chain-sync", "completed");
            assert_eq!(span.metadata().unwrap().name(), "tally.settle");
        });
    }

    #[test]
    fn test_timing_handle() {
        let handle = record_job_start("job-123");
        assert_eq!(handle.job_id(), "job-123");

        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(handle.elapsed().as_nanos() > 0);

        record_job_end(handle, "backup", "completed");
    }

    #[test]
    fn test_record_helpers_do_not_panic() {
        record_job_added("job-1", "statistics");
        record_job_settled("job-1", "statistics", "retrying");
        record_stats(&JobStats::new(Utc::now()));
    }

    #[tokio::test]
    async fn test_instrument_dispatch_passes_output_through() {
        let value = instrument_dispatch("job-1", "echo", 1, async { 7 }).await;
        assert_eq!(value, 7);
    }
}
