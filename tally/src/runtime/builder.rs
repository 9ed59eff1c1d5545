use std::fmt;
use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::events::{InProcEventBus, JobEventPublisher};
use crate::registry::ProcessorRegistry;

use super::supervisor::JobScheduler;

/// Builder for a [`JobScheduler`] with explicit collaborators.
///
/// Everything except the configuration is optional: without
/// [`with_events`](Self::with_events) the scheduler publishes on an
/// [`InProcEventBus`] sized by `event_capacity`, and without
/// [`with_registry`](Self::with_registry) it starts with an empty registry.
///
/// # Example
///
/// ```ignore
/// use tally::*;
///
/// let registry = ProcessorRegistry::new();
/// registry.register("echo", Arc::new(processor_fn(|ctx| async move {
///     Ok(ctx.payload().clone())
/// })));
///
/// let scheduler = JobSchedulerBuilder::new(SchedulerConfig::default())
///     .with_registry(registry)
///     .with_events(Arc::new(InProcEventBus::new(4096)))
///     .build()?;
/// ```
pub struct JobSchedulerBuilder {
    config: SchedulerConfig,
    registry: Option<ProcessorRegistry>,
    events: Option<Arc<dyn JobEventPublisher>>,
}

impl fmt::Debug for JobSchedulerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSchedulerBuilder")
            .field("config", &self.config)
            .field("registry_set", &self.registry.is_some())
            .field("events_set", &self.events.is_some())
            .finish()
    }
}

impl JobSchedulerBuilder {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            registry: None,
            events: None,
        }
    }

    /// Share an existing processor registry.
    pub fn with_registry(mut self, registry: ProcessorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Publish lifecycle events on `events` instead of the default bus.
    pub fn with_events(mut self, events: Arc<dyn JobEventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate the configuration and assemble the scheduler.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when the configuration fails validation.
    pub fn build(self) -> Result<JobScheduler, SchedulerError> {
        self.config.validate()?;

        let events = self
            .events
            .unwrap_or_else(|| {
                Arc::new(InProcEventBus::new(self.config.event_capacity)) as Arc<dyn JobEventPublisher>
            });
        let registry = self.registry.unwrap_or_default();

        Ok(JobScheduler::from_parts(self.config, registry, events))
    }
}
