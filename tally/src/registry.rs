//! Bindings from job type to the processor that executes it.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::runtime::JobContext;

/// Executes the work behind one job type.
///
/// Implementations receive a [`JobContext`] with the job snapshot and return
/// the result to record on success. Returning an error (or panicking, or
/// running past the job's timeout) counts as a failed attempt.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, ctx: JobContext) -> anyhow::Result<Value>;
}

/// Adapter that turns an async closure into a [`Processor`].
///
/// ```ignore
/// scheduler.register("echo", processor_fn(|ctx| async move {
///     Ok(ctx.payload()["value"].clone())
/// }));
/// ```
pub struct ProcessorFn<F> {
    f: F,
}

impl<F> fmt::Debug for ProcessorFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorFn")
            .field("fn_type", &std::any::type_name::<F>())
            .finish()
    }
}

/// Wrap `f` as a processor.
pub fn processor_fn<F, Fut>(f: F) -> ProcessorFn<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    ProcessorFn { f }
}

#[async_trait]
impl<F, Fut> Processor for ProcessorFn<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn process(&self, ctx: JobContext) -> anyhow::Result<Value> {
        (self.f)(ctx).await
    }
}

/// Thread-safe map from job type to processor.
///
/// Lookups happen at execution time, so processors may be registered after
/// jobs of their type were submitted.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn Processor>>>>,
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `processor` to `job_type`, replacing any previous binding.
    ///
    /// Returns `true` when an existing processor was replaced.
    pub fn register(&self, job_type: impl Into<String>, processor: Arc<dyn Processor>) -> bool {
        let job_type = job_type.into();
        let replaced = self
            .inner
            .write()
            .insert(job_type.clone(), processor)
            .is_some();
        if replaced {
            tracing::warn!(job_type = %job_type, "processor re-registered; previous handler replaced");
        } else {
            tracing::info!(job_type = %job_type, "processor registered");
        }
        replaced
    }

    pub fn unregister(&self, job_type: &str) -> Option<Arc<dyn Processor>> {
        self.inner.write().remove(job_type)
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn Processor>> {
        self.inner.read().get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.inner.read().contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.inner.read().keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
