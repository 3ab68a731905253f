//! Progress events and the sinks that carry them

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::state::{TaskKind, TaskState};
use super::stats::StatsSnapshot;

/// Immutable snapshot pushed to observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: String,
    pub kind: TaskKind,
    pub state: TaskState,
    pub progress: u8,
    pub message: String,
    pub stage: String,
    pub stats: StatsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Receives progress events.
///
/// Called while the emitting task holds its own lock: implementations must
/// not block and must not call back into the task.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// Fans events out over a tokio broadcast channel (the SSE stream reads from it)
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl ProgressSink for BroadcastSink {
    fn on_progress(&self, event: &ProgressEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event.clone());
    }
}

/// Records every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, task_id: &str) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }

    pub fn terminal_count(&self, task_id: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task_id == task_id && e.is_terminal())
            .count()
    }
}

impl ProgressSink for MemorySink {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Logs every event at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn on_progress(&self, event: &ProgressEvent) {
        tracing::debug!(
            task_id = %event.task_id,
            state = %event.state,
            progress = event.progress,
            "{}",
            event.message
        );
    }
}

/// Forwards every event to each inner sink in order
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ProgressSink for FanoutSink {
    fn on_progress(&self, event: &ProgressEvent) {
        for sink in &self.sinks {
            sink.on_progress(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::stats::StatisticsAggregate;

    fn event(task_id: &str, state: TaskState) -> ProgressEvent {
        ProgressEvent {
            task_id: task_id.to_string(),
            kind: TaskKind::FileProcessing,
            state,
            progress: 10,
            message: "working".to_string(),
            stage: "extract".to_string(),
            stats: StatisticsAggregate::new().to_snapshot(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        sink.on_progress(&event("t1", TaskState::Processing));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.task_id, "t1");
    }

    #[test]
    fn test_broadcast_sink_without_subscribers() {
        let sink = BroadcastSink::new(8);
        sink.on_progress(&event("t1", TaskState::Processing));
    }

    #[test]
    fn test_memory_sink_counts_terminal() {
        let sink = MemorySink::new();
        sink.on_progress(&event("a", TaskState::Processing));
        sink.on_progress(&event("a", TaskState::Completed));
        sink.on_progress(&event("b", TaskState::Failed));
        assert_eq!(sink.events_for("a").len(), 2);
        assert_eq!(sink.terminal_count("a"), 1);
        assert_eq!(sink.terminal_count("b"), 1);
    }

    #[test]
    fn test_event_serialization_shape() {
        let json = serde_json::to_value(event("a", TaskState::Queued)).unwrap();
        assert_eq!(json["state"], "queued");
        assert_eq!(json["kind"], "file_processing");
        assert!(json.get("details").is_none());
        assert!(json["stats"]["total_files"].is_number());
    }

    #[test]
    fn test_fanout_sink_reaches_every_sink() {
        let first = Arc::new(MemorySink::new());
        let second = Arc::new(MemorySink::new());
        let fanout = FanoutSink::new()
            .with(first.clone())
            .with(Arc::new(TracingSink))
            .with(second.clone());
        assert_eq!(fanout.len(), 3);

        fanout.on_progress(&event("a", TaskState::Processing));
        fanout.on_progress(&event("a", TaskState::Completed));
        assert_eq!(first.events_for("a").len(), 2);
        assert_eq!(second.terminal_count("a"), 1);
    }
}
