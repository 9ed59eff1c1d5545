use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SchedulerConfig;
use crate::error::{JobFailure, SchedulerError};
use crate::events::{JobEvent, JobEventPayload, JobEventPublisher};
use crate::job::{Job, JobId, JobOptionsOverride, JobStatus};
use crate::queue::JobStats;
use crate::registry::{Processor, ProcessorRegistry};
use crate::store::{CleanReport, FailureOutcome, JobStore};
use crate::telemetry;

use super::builder::JobSchedulerBuilder;
use super::cancel::CancelToken;
use super::worker::{worker_loop, Assignment, WorkerReport};

/// State shared by the scheduler handle, its background tasks and every
/// [`JobContext`](super::JobContext).
pub(crate) struct SchedulerShared {
    config: SchedulerConfig,
    store: Mutex<JobStore>,
    registry: ProcessorRegistry,
    events: Arc<dyn JobEventPublisher>,
    paused: AtomicBool,
    started: AtomicBool,
    wake: Notify,
    shutdown: CancelToken,
    /// Cancellation tokens of jobs currently handed to a worker.
    inflight: Mutex<HashMap<JobId, CancelToken>>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// In-process job scheduler.
///
/// `JobScheduler` is a cheap, cloneable handle. Submissions and
/// administrative calls work whether or not the background loop is running;
/// jobs only execute after [`start`](Self::start).
///
/// ```ignore
/// let scheduler = JobScheduler::new(SchedulerConfig::default())?;
/// scheduler.register("echo", processor_fn(|ctx| async move {
///     Ok(ctx.payload()["value"].clone())
/// }));
/// scheduler.start().await?;
/// let id = scheduler.add("echo", json!({"value": 42}), JobOptionsOverride::default())?;
/// ```
#[derive(Clone)]
pub struct JobScheduler {
    shared: Arc<SchedulerShared>,
}

impl fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let task_count = self
            .shared
            .tasks
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();

        f.debug_struct("JobScheduler")
            .field("config", &self.shared.config)
            .field("job_types", &self.shared.registry.job_types())
            .field("jobs", &self.shared.store.lock().len())
            .field("paused", &self.is_paused())
            .field("started", &self.shared.started.load(Ordering::SeqCst))
            .field("task_count", &task_count)
            .field("shutdown_cancelled", &self.shared.shutdown.is_cancelled())
            .finish()
    }
}

impl JobScheduler {
    /// Build a scheduler with the default in-process event bus.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        JobSchedulerBuilder::new(config).build()
    }

    pub fn builder(config: SchedulerConfig) -> JobSchedulerBuilder {
        JobSchedulerBuilder::new(config)
    }

    pub(crate) fn from_parts(
        config: SchedulerConfig,
        registry: ProcessorRegistry,
        events: Arc<dyn JobEventPublisher>,
    ) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                config,
                store: Mutex::new(JobStore::new()),
                registry,
                events,
                paused: AtomicBool::new(false),
                started: AtomicBool::new(false),
                wake: Notify::new(),
                shutdown: CancelToken::new(),
                inflight: Mutex::new(HashMap::new()),
                tasks: tokio::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.shared.registry
    }

    pub fn events(&self) -> Arc<dyn JobEventPublisher> {
        Arc::clone(&self.shared.events)
    }

    /// Bind a processor to a job type. Returns `true` when it replaced an
    /// existing one.
    pub fn register<P>(&self, job_type: impl Into<String>, processor: P) -> bool
    where
        P: Processor + 'static,
    {
        self.shared.registry.register(job_type, Arc::new(processor))
    }

    /// Submit a job. `options` are merged over the configured defaults.
    pub fn add(
        &self,
        job_type: impl Into<String>,
        payload: Value,
        options: JobOptionsOverride,
    ) -> Result<JobId, SchedulerError> {
        self.shared.add(job_type.into(), payload, options)
    }

    pub fn get_job(&self, id: &JobId) -> Option<Job> {
        self.shared.store.lock().get(id).cloned()
    }

    /// Snapshots of every job with `status`, or of all jobs ordered by
    /// creation when `status` is `None`.
    pub fn get_jobs(&self, status: Option<JobStatus>) -> Vec<Job> {
        self.shared.store.lock().list(status)
    }

    /// Delete a job wherever it is. An active job's processor is asked to
    /// stop and its eventual result is discarded.
    pub fn remove_job(&self, id: &JobId) -> bool {
        self.shared.remove_job(id)
    }

    /// Prune the completed and failed archives to their retention counts.
    pub fn clean(&self) -> CleanReport {
        self.shared.clean()
    }

    /// Stop promoting and dispatching. Running jobs finish normally.
    pub fn pause(&self) {
        if !self.shared.paused.swap(true, Ordering::SeqCst) {
            tracing::info!("scheduler paused");
        }
    }

    /// Re-enable promotion and dispatch and run a pass immediately.
    pub fn resume(&self) {
        if self.shared.paused.swap(false, Ordering::SeqCst) {
            tracing::info!("scheduler resumed");
        }
        self.shared.promote();
        self.shared.wake.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    pub fn update_progress(&self, id: &JobId, value: i64) -> Result<u8, SchedulerError> {
        self.shared.update_progress(id, value)
    }

    pub fn get_stats(&self) -> JobStats {
        let stats = self.shared.store.lock().stats(Utc::now());
        telemetry::record_stats(&stats);
        stats
    }

    /// Receive every lifecycle event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.subscribe_jobs()
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    /// Spawn the worker pool, dispatcher and tickers on the current tokio
    /// runtime.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStarted);
        }

        let config = &self.shared.config;
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let mut handles = Vec::with_capacity(config.max_concurrency + 3);
        let mut workers = Vec::with_capacity(config.max_concurrency);

        for index in 0..config.max_concurrency {
            let (tx, rx) = mpsc::channel(1);
            workers.push(tx);
            handles.push(tokio::spawn(worker_loop(
                index,
                rx,
                report_tx.clone(),
                self.shared.registry.clone(),
                Arc::downgrade(&self.shared),
            )));
        }
        drop(report_tx);

        handles.push(tokio::spawn(dispatch_loop(
            Arc::clone(&self.shared),
            workers,
            report_rx,
        )));
        handles.push(tokio::spawn(promote_loop(Arc::clone(&self.shared))));
        handles.push(tokio::spawn(clean_loop(Arc::clone(&self.shared))));

        self.shared.tasks.lock().await.extend(handles);

        tracing::info!(
            max_concurrency = config.max_concurrency,
            promote_interval_ms = config.promote_interval_ms,
            dispatch_interval_ms = config.dispatch_interval_ms,
            "job scheduler started"
        );
        Ok(())
    }

    /// Stop the tickers and wait for workers to finish their current job.
    ///
    /// Jobs already running are settled as usual before the dispatcher
    /// exits. Each background task gets at most `shutdown_timeout_ms` to
    /// finish.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        tracing::info!("initiating graceful shutdown of job scheduler");

        self.shared.shutdown.cancel();

        let handles = {
            let mut guard = self.shared.tasks.lock().await;
            std::mem::take(&mut *guard)
        };

        let timeout = self.shared.config.shutdown_timeout();
        for handle in handles {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("scheduler task failed: {:?}", e),
                Err(_) => tracing::warn!("scheduler task timed out during shutdown"),
            }
        }

        tracing::info!("job scheduler shutdown complete");
        Ok(())
    }
}

impl SchedulerShared {
    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn publish(&self, payload: JobEventPayload) {
        if let Err(err) = self.events.publish(JobEvent::new(payload)) {
            tracing::error!("publish job event failed: {err}");
        }
    }

    fn add(
        &self,
        job_type: String,
        payload: Value,
        options: JobOptionsOverride,
    ) -> Result<JobId, SchedulerError> {
        if job_type.is_empty() {
            return Err(SchedulerError::EmptyJobType);
        }
        if self.config.require_registered_processor && !self.registry.contains(&job_type) {
            return Err(SchedulerError::UnknownJobType(job_type));
        }

        let options = options.merge_over(&self.config.default_options);
        let span = telemetry::job_add_span(&job_type, options.priority, options.delay_ms);
        let _enter = span.enter();

        let job = self.store.lock().add(job_type, payload, options, Utc::now());
        let id = job.id;
        telemetry::record_job_added(id, &job.job_type);
        let runnable = job.status == JobStatus::Waiting;
        self.publish(JobEventPayload::Added { job });

        if runnable {
            self.wake.notify_one();
        }
        Ok(id)
    }

    pub(crate) fn update_progress(&self, id: &JobId, value: i64) -> Result<u8, SchedulerError> {
        let job = self
            .store
            .lock()
            .update_progress(id, value)
            .ok_or(SchedulerError::JobNotFound(*id))?;
        let progress = job.progress;
        tracing::trace!(job_id = %id, progress, "job progress updated");
        self.publish(JobEventPayload::Progress { job });
        Ok(progress)
    }

    fn remove_job(&self, id: &JobId) -> bool {
        let removed = {
            let mut store = self.store.lock();
            let removed = store.remove(id);
            if let Some(job) = &removed {
                if job.status == JobStatus::Active {
                    if let Some(token) = self.inflight.lock().remove(id) {
                        token.cancel();
                    }
                }
            }
            removed
        };

        match removed {
            Some(job) => {
                tracing::info!(job_id = %id, job_type = %job.job_type, status = %job.status, "job removed");
                self.publish(JobEventPayload::Removed { job });
                true
            }
            None => false,
        }
    }

    fn clean(&self) -> CleanReport {
        let report = self.store.lock().clean();
        if report.total() > 0 {
            tracing::info!(
                completed = report.completed,
                failed = report.failed,
                "pruned archived jobs"
            );
        }
        report
    }

    /// Move due delayed jobs into the waiting queue. Returns how many moved.
    fn promote(&self) -> usize {
        let promoted = self.store.lock().promote_due(Utc::now());
        for job in &promoted {
            tracing::debug!(job_id = %job.id, job_type = %job.job_type, "delayed job promoted");
        }
        promoted.len()
    }

    /// Hand waiting jobs to idle workers while slots are free.
    fn dispatch_ready(&self, workers: &[mpsc::Sender<Assignment>], idle: &mut Vec<usize>) {
        while let Some(&worker) = idle.last() {
            let started = {
                let mut store = self.store.lock();
                if store.active_count() >= self.config.max_concurrency {
                    break;
                }
                store.start_next(Utc::now()).map(|job| {
                    let cancel = CancelToken::new();
                    self.inflight.lock().insert(job.id, cancel.clone());
                    (job, cancel)
                })
            };
            let Some((job, cancel)) = started else {
                break;
            };
            idle.pop();

            tracing::debug!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = job.attempts,
                worker,
                "job dispatched"
            );
            self.publish(JobEventPayload::Active { job: job.clone() });

            // An idle worker's channel is empty, so this only fails when the
            // worker task has exited. The worker is not returned to the pool.
            if let Err(err) = workers[worker].try_send(Assignment { job, cancel }) {
                tracing::error!(worker, "worker unavailable: {err}");
                let Assignment { job, .. } = err.into_inner();
                self.inflight.lock().remove(&job.id);
                self.settle_failure(&job.id, &job.job_type, &JobFailure::WorkerUnavailable);
            }
        }
    }

    fn settle(&self, report: WorkerReport) {
        self.inflight.lock().remove(&report.job_id);
        let WorkerReport {
            job_id,
            job_type,
            outcome,
            elapsed,
            ..
        } = report;

        match outcome {
            Ok(value) => {
                let span = telemetry::job_settle_span(job_id, &job_type, "completed");
                let _enter = span.enter();
                match self.store.lock().complete(&job_id, value, Utc::now()) {
                    Some(job) => {
                        tracing::debug!(job_id = %job_id, attempts = job.attempts, "job completed");
                        telemetry::record_job_settled(job_id, &job_type, "completed");
                        telemetry::observe_job_duration(&job_type, "completed", elapsed.as_secs_f64());
                        self.publish(JobEventPayload::Completed { job });
                    }
                    None => {
                        tracing::debug!(job_id = %job_id, "discarding result of job that is no longer active");
                    }
                }
            }
            Err(failure) => {
                if let Some(status) = self.settle_failure(&job_id, &job_type, &failure) {
                    telemetry::observe_job_duration(&job_type, status, elapsed.as_secs_f64());
                }
            }
        }
    }

    /// Apply a failed execution. Returns the settled status label, or `None`
    /// when the job was no longer active.
    fn settle_failure(&self, id: &JobId, job_type: &str, failure: &JobFailure) -> Option<&'static str> {
        let span = telemetry::job_settle_span(id, job_type, failure.kind());
        let _enter = span.enter();

        let outcome = self.store.lock().fail(id, failure, Utc::now());
        match outcome {
            Some(FailureOutcome::Retrying { job, delay_ms }) => {
                tracing::warn!(
                    job_id = %id,
                    attempt = job.attempts,
                    max_attempts = job.options.attempts,
                    delay_ms,
                    reason = failure.kind(),
                    "job failed: {failure}; retrying"
                );
                telemetry::record_job_settled(id, job_type, "retrying");
                self.publish(JobEventPayload::Retrying { job, delay_ms });
                Some("retrying")
            }
            Some(FailureOutcome::Failed(job)) => {
                tracing::warn!(
                    job_id = %id,
                    attempts = job.attempts,
                    reason = failure.kind(),
                    "job failed permanently: {failure}"
                );
                telemetry::record_job_settled(id, job_type, "failed");
                self.publish(JobEventPayload::Failed { job });
                Some("failed")
            }
            None => {
                tracing::debug!(job_id = %id, "discarding failure of job that is no longer active");
                None
            }
        }
    }
}

/// Assign work to idle workers and apply their reports.
async fn dispatch_loop(
    shared: Arc<SchedulerShared>,
    workers: Vec<mpsc::Sender<Assignment>>,
    mut reports: mpsc::UnboundedReceiver<WorkerReport>,
) {
    let mut idle: Vec<usize> = (0..workers.len()).rev().collect();
    let mut ticker = tokio::time::interval(shared.config.dispatch_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                tracing::info!("dispatcher shutting down");
                break;
            }
            Some(report) = reports.recv() => {
                let worker = report.worker;
                shared.settle(report);
                idle.push(worker);
            }
            _ = ticker.tick() => {}
            _ = shared.wake.notified() => {}
        }

        if !shared.is_paused() {
            shared.dispatch_ready(&workers, &mut idle);
        }
    }

    // Closing the assignment channels lets each worker finish its current
    // job and exit. Reports keep flowing until the last worker is gone.
    drop(workers);
    let drain = async {
        while let Some(report) = reports.recv().await {
            shared.settle(report);
        }
    };
    if tokio::time::timeout(shared.config.shutdown_timeout(), drain)
        .await
        .is_err()
    {
        tracing::warn!("workers still running after shutdown timeout; outcomes not recorded");
    }
    tracing::info!("dispatcher stopped");
}

async fn promote_loop(shared: Arc<SchedulerShared>) {
    let mut ticker = tokio::time::interval(shared.config.promote_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                tracing::info!("promotion ticker shutting down");
                break;
            }
            _ = ticker.tick() => {
                if shared.is_paused() {
                    continue;
                }
                if shared.promote() > 0 {
                    shared.wake.notify_one();
                }
            }
        }
    }
}

async fn clean_loop(shared: Arc<SchedulerShared>) {
    let period = shared.config.clean_interval();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                tracing::info!("clean ticker shutting down");
                break;
            }
            _ = ticker.tick() => {
                shared.clean();
                let stats = shared.store.lock().stats(Utc::now());
                telemetry::record_stats(&stats);
            }
        }
    }
}
