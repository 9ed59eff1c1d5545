use serde_json::{json, Value};
use tally::{BackoffStrategy, JobOptionsOverride};

/// Payload in the `{ "value": ... }` shape the echo processor understands.
pub fn value_payload(value: impl Into<Value>) -> Value {
    let value: Value = value.into();
    json!({ "value": value })
}

pub fn with_priority(priority: i32) -> JobOptionsOverride {
    JobOptionsOverride::new().with_priority(priority)
}

pub fn delayed(delay_ms: u64) -> JobOptionsOverride {
    JobOptionsOverride::new().with_delay_ms(delay_ms)
}

/// `attempts` tries with a 10ms fixed backoff.
pub fn quick_retries(attempts: u32) -> JobOptionsOverride {
    JobOptionsOverride::new()
        .with_attempts(attempts)
        .with_backoff(BackoffStrategy::Fixed, 10)
}

/// A single attempt: the first failure is final.
pub fn no_retry() -> JobOptionsOverride {
    JobOptionsOverride::new().with_attempts(1)
}

/// Keep at most `keep` completed and `keep` failed jobs after a clean pass.
pub fn retain(keep: usize) -> JobOptionsOverride {
    JobOptionsOverride::new().with_retention(keep, keep)
}
