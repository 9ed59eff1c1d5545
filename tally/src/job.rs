use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

/// Unique, immutable identifier assigned to a job at creation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of a job.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
    /// Reserved; the scheduler never assigns it.
    Stuck,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Waiting,
        JobStatus::Delayed,
        JobStatus::Active,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Stuck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Delayed => "delayed",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stuck => "stuck",
        }
    }

    /// `completed` and `failed` accept no further automatic transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown job status '{s}'"))
    }
}

/// Policy for computing the delay before a retry.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Every retry waits the base delay.
    Fixed,
    /// Retry N waits `base * 2^(N-1)`.
    #[default]
    Exponential,
}

/// Fully resolved per-job options.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobOptions {
    /// Higher values are dispatched sooner.
    pub priority: i32,
    /// Maximum number of executions, at least 1.
    pub attempts: u32,
    /// Initial deferral in milliseconds.
    #[serde(rename = "delay")]
    pub delay_ms: u64,
    pub backoff: BackoffStrategy,
    /// Base retry delay in milliseconds.
    #[serde(rename = "backoffDelay")]
    pub backoff_delay_ms: u64,
    /// Per-execution timeout in milliseconds.
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
    /// Number of completed jobs retained by `clean`.
    pub remove_on_complete: usize,
    /// Number of failed jobs retained by `clean`.
    pub remove_on_fail: usize,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            attempts: 3,
            delay_ms: 0,
            backoff: BackoffStrategy::Exponential,
            backoff_delay_ms: 1000,
            timeout_ms: 30_000,
            remove_on_complete: 50,
            remove_on_fail: 50,
        }
    }
}

impl JobOptions {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

/// Partial options supplied at submission, merged over the defaults.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobOptionsOverride {
    pub priority: Option<i32>,
    pub attempts: Option<u32>,
    #[serde(rename = "delay")]
    pub delay_ms: Option<u64>,
    pub backoff: Option<BackoffStrategy>,
    #[serde(rename = "backoffDelay")]
    pub backoff_delay_ms: Option<u64>,
    #[serde(rename = "timeout")]
    pub timeout_ms: Option<u64>,
    pub remove_on_complete: Option<usize>,
    pub remove_on_fail: Option<usize>,
}

impl JobOptionsOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy, delay_ms: u64) -> Self {
        self.backoff = Some(backoff);
        self.backoff_delay_ms = Some(delay_ms);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_retention(mut self, on_complete: usize, on_fail: usize) -> Self {
        self.remove_on_complete = Some(on_complete);
        self.remove_on_fail = Some(on_fail);
        self
    }

    /// Resolve against `defaults`. `attempts` is raised to at least 1.
    pub fn merge_over(&self, defaults: &JobOptions) -> JobOptions {
        JobOptions {
            priority: self.priority.unwrap_or(defaults.priority),
            attempts: self.attempts.unwrap_or(defaults.attempts).max(1),
            delay_ms: self.delay_ms.unwrap_or(defaults.delay_ms),
            backoff: self.backoff.unwrap_or(defaults.backoff),
            backoff_delay_ms: self
                .backoff_delay_ms
                .unwrap_or(defaults.backoff_delay_ms),
            timeout_ms: self.timeout_ms.unwrap_or(defaults.timeout_ms),
            remove_on_complete: self
                .remove_on_complete
                .unwrap_or(defaults.remove_on_complete),
            remove_on_fail: self.remove_on_fail.unwrap_or(defaults.remove_on_fail),
        }
    }
}

/// A unit of asynchronous work and its mutable lifecycle record.
///
/// Snapshots of this record are what administrative queries and event
/// subscribers observe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: Value,
    pub options: JobOptions,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    /// Executions started so far.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a job in its initial state: `delayed` when the options carry a
    /// delay, `waiting` otherwise.
    pub fn new(
        job_type: impl Into<String>,
        payload: Value,
        options: JobOptions,
        now: DateTime<Utc>,
    ) -> Self {
        let (status, next_run_at) = if options.delay_ms > 0 {
            (
                JobStatus::Delayed,
                Some(deadline_after(now, options.delay_ms)),
            )
        } else {
            (JobStatus::Waiting, None)
        };

        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            payload,
            options,
            status,
            progress: 0,
            result: None,
            error: None,
            created_at: now,
            processed_at: None,
            completed_at: None,
            failed_at: None,
            attempts: 0,
            next_run_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Clamp a reported progress value into `[0, 100]`.
pub fn clamp_progress(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

/// Millisecond count as a chrono duration, saturating at `i64::MAX`.
pub(crate) fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

/// `now + ms`, saturating at the largest representable instant.
pub(crate) fn deadline_after(now: DateTime<Utc>, ms: u64) -> DateTime<Utc> {
    now.checked_add_signed(millis(ms))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
