//! Tally - in-process job scheduling.
//!
//! Accepts named units of asynchronous work, orders them by priority, defers
//! work scheduled for later, runs it under bounded concurrency and retries
//! failures with fixed or exponential backoff until the job's attempts are
//! exhausted.
//!
//! # Core Concepts
//!
//! - **Job**: a [`Job`] record with a type, an opaque JSON payload and fully
//!   resolved [`JobOptions`]. Jobs move through
//!   `waiting | delayed -> active -> completed | delayed (retry) | failed`.
//!
//! - **Processor**: the async handler bound to a job type in the
//!   [`ProcessorRegistry`]. Closures can be registered with [`processor_fn`].
//!
//! - **Store**: [`JobStore`] holds the index, the waiting queue, the delayed
//!   set, the active set and the bounded archives, and performs every state
//!   transition.
//!
//! - **Events**: lifecycle notifications published on a
//!   [`JobEventPublisher`], by default an [`InProcEventBus`].
//!
//! - **Runtime**: [`JobScheduler`] runs a fixed worker pool plus the
//!   promotion, dispatch and clean tickers on the ambient tokio runtime.
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use serde_json::json;
//! use tally::*;
//!
//! let scheduler = JobScheduler::new(SchedulerConfig::default())?;
//! scheduler.register("echo", processor_fn(|ctx| async move {
//!     Ok(ctx.payload()["value"].clone())
//! }));
//! scheduler.start().await?;
//!
//! let id = scheduler.add("echo", json!({"value": 42}), JobOptionsOverride::default())?;
//! ```

/// Scheduler configuration.
pub mod config;

/// Typed errors for scheduler calls and failed executions.
pub mod error;

/// Lifecycle events and the in-process event bus.
pub mod events;

/// Job record, identifiers, statuses and options.
pub mod job;

/// Prometheus metrics, behind the `metrics` feature.
#[cfg(feature = "metrics")]
pub mod metrics;

/// Waiting queue, delayed set, archives and stats snapshots.
pub mod queue;

/// Processor trait and the type-to-processor registry.
pub mod registry;

/// Backoff computation and retry decisions.
pub mod retry;

/// Scheduler handle, worker pool and background tickers.
pub mod runtime;

/// Job index and lifecycle transitions.
pub mod store;

/// Tracing spans and metric recorders.
pub mod telemetry;

pub use config::*;
pub use error::*;
pub use events::*;
pub use job::*;
pub use queue::*;
pub use registry::*;
pub use retry::*;
pub use runtime::{CancelToken, JobContext, JobScheduler, JobSchedulerBuilder};
pub use store::*;
