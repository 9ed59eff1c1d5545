use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::JobFailure;
use crate::job::{Job, JobId};
use crate::registry::{Processor, ProcessorRegistry};
use crate::telemetry;

use super::cancel::CancelToken;
use super::context::JobContext;
use super::supervisor::SchedulerShared;

/// A job handed to an idle worker.
#[derive(Debug)]
pub(crate) struct Assignment {
    pub job: Job,
    pub cancel: CancelToken,
}

/// What a worker sends back once an execution settles.
#[derive(Debug)]
pub(crate) struct WorkerReport {
    pub worker: usize,
    pub job_id: JobId,
    pub job_type: String,
    pub outcome: Result<Value, JobFailure>,
    pub elapsed: Duration,
}

/// Run assignments one at a time until the assignment channel closes.
///
/// The report is sent after every execution, including failed ones, so the
/// dispatcher always learns when this worker is idle again.
pub(crate) async fn worker_loop(
    worker: usize,
    mut assignments: mpsc::Receiver<Assignment>,
    reports: mpsc::UnboundedSender<WorkerReport>,
    registry: ProcessorRegistry,
    scheduler: Weak<SchedulerShared>,
) {
    tracing::debug!(worker, "worker started");

    while let Some(Assignment { job, cancel }) = assignments.recv().await {
        let job_id = job.id;
        let job_type = job.job_type.clone();
        let attempt = job.attempts;
        let timeout_ms = job.options.timeout_ms;
        let processor = registry.get(&job_type);
        let ctx = JobContext::new(job, cancel.clone(), scheduler.clone());

        let timing = telemetry::record_job_start(job_id);
        let outcome = telemetry::instrument_dispatch(
            job_id,
            &job_type,
            attempt,
            execute(processor, ctx, timeout_ms, &cancel),
        )
        .await;

        let report = WorkerReport {
            worker,
            job_id,
            job_type,
            outcome,
            elapsed: timing.elapsed(),
        };
        if reports.send(report).is_err() {
            // Dispatcher is gone; the scheduler is shutting down.
            break;
        }
    }

    tracing::debug!(worker, "worker stopped");
}

/// Execute one job: look up failure cases, then race the processor against
/// its timeout and the job's cancellation token.
///
/// Panics inside the processor are caught and reported as failures.
pub(crate) async fn execute(
    processor: Option<Arc<dyn Processor>>,
    ctx: JobContext,
    timeout_ms: u64,
    cancel: &CancelToken,
) -> Result<Value, JobFailure> {
    let Some(processor) = processor else {
        return Err(JobFailure::MissingProcessor {
            job_type: ctx.job_type().to_string(),
        });
    };

    let run = AssertUnwindSafe(processor.process(ctx)).catch_unwind();

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(JobFailure::Cancelled),
        result = tokio::time::timeout(Duration::from_millis(timeout_ms), run) => match result {
            Err(_) => Err(JobFailure::Timeout { timeout_ms }),
            Ok(Err(panic)) => Err(JobFailure::Panicked(panic_message(panic.as_ref()))),
            Ok(Ok(Err(err))) => Err(JobFailure::Processor(err.to_string())),
            Ok(Ok(Ok(value))) => Ok(value),
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;
    use crate::registry::processor_fn;
    use chrono::Utc;
    use serde_json::json;

    fn ctx(job_type: &str) -> JobContext {
        let job = Job::new(job_type, json!({"value": 42}), JobOptions::default(), Utc::now());
        JobContext::detached(job, CancelToken::new())
    }

    fn arc<P: Processor + 'static>(processor: P) -> Option<Arc<dyn Processor>> {
        Some(Arc::new(processor))
    }

    #[tokio::test]
    async fn test_execute_success() {
        let processor = arc(processor_fn(|ctx: JobContext| async move {
            Ok(ctx.payload()["value"].clone())
        }));
        let outcome = execute(processor, ctx("echo"), 1_000, &CancelToken::new()).await;
        assert_eq!(outcome, Ok(json!(42)));
    }

    #[tokio::test]
    async fn test_execute_missing_processor() {
        let outcome = execute(None, ctx("backup"), 1_000, &CancelToken::new()).await;
        assert_eq!(
            outcome,
            Err(JobFailure::MissingProcessor {
                job_type: "backup".into()
            })
        );
    }

    #[tokio::test]
    async fn test_execute_error_message_is_verbatim() {
        let processor = arc(processor_fn(|_ctx: JobContext| async {
            Err(anyhow::anyhow!("Permanent failure"))
        }));
        let outcome = execute(processor, ctx("fail"), 1_000, &CancelToken::new()).await;
        assert_eq!(outcome, Err(JobFailure::Processor("Permanent failure".into())));
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let processor = arc(processor_fn(|_ctx: JobContext| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }));
        let outcome = execute(processor, ctx("slow"), 20, &CancelToken::new()).await;
        assert_eq!(outcome, Err(JobFailure::Timeout { timeout_ms: 20 }));
    }

    #[tokio::test]
    async fn test_execute_catches_panic() {
        let processor = arc(processor_fn(|_ctx: JobContext| async {
            if true {
                panic!("boom");
            }
            Ok(Value::Null)
        }));
        let outcome = execute(processor, ctx("panic"), 1_000, &CancelToken::new()).await;
        assert_eq!(outcome, Err(JobFailure::Panicked("boom".into())));
    }

    #[tokio::test]
    async fn test_execute_observes_cancellation() {
        let processor = arc(processor_fn(|_ctx: JobContext| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }));
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let outcome = execute(processor, ctx("slow"), 10_000, &cancel).await;
        assert_eq!(outcome, Err(JobFailure::Cancelled));
    }

    #[tokio::test]
    async fn test_worker_loop_reports_each_assignment() {
        let registry = ProcessorRegistry::new();
        registry.register(
            "echo",
            Arc::new(processor_fn(|ctx: JobContext| async move {
                Ok(ctx.payload()["value"].clone())
            })),
        );
        let (assign_tx, assign_rx) = mpsc::channel(1);
        let (report_tx, mut report_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(worker_loop(3, assign_rx, report_tx, registry, Weak::new()));

        let job = Job::new("echo", json!({"value": 7}), JobOptions::default(), Utc::now());
        let id = job.id;
        assign_tx
            .send(Assignment {
                job,
                cancel: CancelToken::new(),
            })
            .await
            .unwrap();

        let report = report_rx.recv().await.unwrap();
        assert_eq!(report.worker, 3);
        assert_eq!(report.job_id, id);
        assert_eq!(report.outcome, Ok(json!(7)));

        drop(assign_tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop when its channel closes")
            .unwrap();
    }
}
