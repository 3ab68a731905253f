//! Application state for the ingestion server

use std::sync::Arc;

use crate::config::IngestConfig;
use crate::error::Result;
use crate::processing::{
    BroadcastSink, FanoutSink, ProgressSink, RunContext, TaskRegistry, TracingSink,
};
use crate::providers::Collaborators;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Arc<IngestConfig>,
    /// Live tasks plus the finished-status cache
    registry: TaskRegistry,
    /// Collaborators and config handed to every job
    run_context: RunContext,
    /// Fan-out of progress events to SSE subscribers
    events: Arc<BroadcastSink>,
    /// SSE broadcast plus a debug log line per event
    sink: Arc<FanoutSink>,
}

impl AppState {
    /// Create state with the production collaborators
    pub fn new(config: IngestConfig) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Ok(Self::with_collaborators(config, collaborators))
    }

    /// Create state with caller-supplied collaborators
    pub fn with_collaborators(config: IngestConfig, collaborators: Collaborators) -> Self {
        tracing::info!("Collaborators: {:?}", collaborators);
        let config = Arc::new(config);
        let registry = TaskRegistry::new(config.tasks.finished_cache_size);
        let events = Arc::new(BroadcastSink::new(config.tasks.event_channel_capacity));
        let run_context = RunContext::new(collaborators, config.clone());
        let sink = Arc::new(
            FanoutSink::new()
                .with(events.clone())
                .with(Arc::new(TracingSink)),
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                registry,
                run_context,
                events,
                sink,
            }),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    pub fn run_context(&self) -> &RunContext {
        &self.inner.run_context
    }

    pub fn events(&self) -> &Arc<BroadcastSink> {
        &self.inner.events
    }

    /// The sink new tasks report into
    pub fn sink(&self) -> Arc<dyn ProgressSink> {
        self.inner.sink.clone()
    }
}
