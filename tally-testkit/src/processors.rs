use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tally::{JobContext, JobId, Processor};
use tokio::sync::Semaphore;

/// Returns `payload.value`, or the whole payload when it has no `value` key.
#[derive(Clone, Debug, Default)]
pub struct EchoProcessor;

#[async_trait]
impl Processor for EchoProcessor {
    async fn process(&self, ctx: JobContext) -> anyhow::Result<Value> {
        let payload = ctx.payload();
        Ok(payload.get("value").cloned().unwrap_or_else(|| payload.clone()))
    }
}

/// Fails every execution before attempt `succeed_on`, then succeeds with the
/// attempt number.
#[derive(Clone, Debug)]
pub struct FlakyProcessor {
    succeed_on: u32,
    calls: Arc<AtomicU32>,
}

impl FlakyProcessor {
    pub fn new(succeed_on: u32) -> Self {
        Self {
            succeed_on,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor for FlakyProcessor {
    async fn process(&self, ctx: JobContext) -> anyhow::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let attempt = ctx.attempt();
        if attempt < self.succeed_on {
            return Err(anyhow!("flaky failure on attempt {attempt}"));
        }
        Ok(Value::from(attempt))
    }
}

/// Always fails with the same message.
#[derive(Clone, Debug)]
pub struct FailingProcessor {
    message: String,
}

impl FailingProcessor {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Processor for FailingProcessor {
    async fn process(&self, _ctx: JobContext) -> anyhow::Result<Value> {
        Err(anyhow!("{}", self.message))
    }
}

/// Panics with the given message.
#[derive(Clone, Debug)]
pub struct PanickingProcessor {
    message: String,
}

impl PanickingProcessor {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Processor for PanickingProcessor {
    async fn process(&self, _ctx: JobContext) -> anyhow::Result<Value> {
        panic!("{}", self.message);
    }
}

/// Sleeps for a fixed duration and tracks how many executions overlap.
#[derive(Clone, Debug)]
pub struct SlowProcessor {
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl SlowProcessor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping executions seen so far.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor for SlowProcessor {
    async fn process(&self, _ctx: JobContext) -> anyhow::Result<Value> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    }
}

/// Blocks every execution until the test releases it.
///
/// An execution whose job is cancelled stops waiting and fails; the number
/// of such executions is exposed by [`cancelled`](Self::cancelled).
#[derive(Clone, Debug)]
pub struct GatedProcessor {
    gate: Arc<Semaphore>,
    started: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
}

impl GatedProcessor {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            started: Arc::new(AtomicUsize::new(0)),
            cancelled: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Let `n` waiting (or future) executions finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for GatedProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for GatedProcessor {
    async fn process(&self, ctx: JobContext) -> anyhow::Result<Value> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            permit = self.gate.acquire() => {
                permit.map_err(|err| anyhow!("gate closed: {err}"))?.forget();
                Ok(Value::from(ctx.attempt()))
            }
            _ = ctx.cancellation().cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("cancelled while gated"))
            }
        }
    }
}

/// Reports each step through the job context, then returns the last
/// progress value the scheduler accepted.
#[derive(Clone, Debug)]
pub struct ProgressProcessor {
    steps: Vec<i64>,
}

impl ProgressProcessor {
    pub fn new(steps: impl Into<Vec<i64>>) -> Self {
        Self {
            steps: steps.into(),
        }
    }
}

#[async_trait]
impl Processor for ProgressProcessor {
    async fn process(&self, ctx: JobContext) -> anyhow::Result<Value> {
        let mut last = 0;
        for step in &self.steps {
            last = ctx.report_progress(*step)?;
            tokio::task::yield_now().await;
        }
        Ok(Value::from(last))
    }
}

/// Records every execution and returns a configurable outcome.
#[derive(Clone, Debug)]
pub struct RecordingProcessor {
    records: Arc<Mutex<Vec<ProcessRecord>>>,
    result: Arc<Mutex<Result<Value, String>>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProcessRecord {
    pub job_id: JobId,
    pub job_type: String,
    pub attempt: u32,
    pub payload: Value,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self::with_result(Ok(Value::Null))
    }

    pub fn with_result(result: Result<Value, String>) -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            result: Arc::new(Mutex::new(result)),
        }
    }

    pub fn records(&self) -> Vec<ProcessRecord> {
        self.records.lock().clone()
    }

    /// Job ids in the order their executions started.
    pub fn order(&self) -> Vec<JobId> {
        self.records.lock().iter().map(|r| r.job_id).collect()
    }

    pub fn assert_process_count_eq(&self, expected: usize) {
        let actual = self.records.lock().len();
        assert_eq!(actual, expected, "Expected {expected} executions, got {actual}");
    }

    pub fn set_result(&self, result: Result<Value, String>) {
        *self.result.lock() = result;
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Default for RecordingProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for RecordingProcessor {
    async fn process(&self, ctx: JobContext) -> anyhow::Result<Value> {
        self.records.lock().push(ProcessRecord {
            job_id: ctx.id(),
            job_type: ctx.job_type().to_string(),
            attempt: ctx.attempt(),
            payload: ctx.payload().clone(),
        });
        let result = self.result.lock().clone();
        result.map_err(|message| anyhow!(message))
    }
}
