/// Scheduler builder.
pub mod builder;
/// Cooperative cancellation tokens.
pub mod cancel;
/// Per-execution handle passed to processors.
pub mod context;
/// Scheduler handle, dispatcher and tickers.
pub mod supervisor;
/// Worker pool and job execution.
pub mod worker;

pub use builder::JobSchedulerBuilder;
pub use cancel::CancelToken;
pub use context::JobContext;
pub use supervisor::JobScheduler;
