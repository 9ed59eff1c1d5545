//! Shared helpers for testing code built on `tally`.

pub mod fixtures;
pub mod processors;
pub mod recorder;
pub mod wait;

pub use fixtures::*;
pub use processors::*;
pub use recorder::EventRecorder;
pub use wait::{fast_config, wait_for_status, wait_for_terminal, wait_until};

/// Install a test subscriber honoring `RUST_LOG`. Safe to call from every
/// test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
