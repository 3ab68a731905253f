//! Task lifecycle: state machine, progress reporting and event emission
//!
//! A [`Task`] is mutated only by its own background work. Handlers read it
//! through [`Task::status`] or ask it to stop through [`Task::cancel`].
//! Every state change and progress update happens under the task's own lock,
//! and events are handed to the sink while that lock is held, so observers
//! see them in order and at most one terminal event is ever emitted.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::events::{ProgressEvent, ProgressSink};
use super::registry::RegistryInner;
use super::runner::{self, RunContext, TaskJob};
use super::state::{ItemState, ItemStatus, TaskKind, TaskState};
use super::stats::{StatisticsAggregate, StatsSnapshot};
use crate::error::{Error, Result};

/// Default minimum gap between non-critical emissions
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(500);

/// Returned by [`Task::start`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSummary {
    pub task_id: String,
    pub state: TaskState,
    pub message: String,
}

/// What a finished job hands to [`Task::complete`]
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub output_file: Option<PathBuf>,
    pub message: String,
    pub details: Option<Value>,
}

/// Polling view of a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub kind: TaskKind,
    pub state: TaskState,
    pub progress: u8,
    pub message: String,
    pub stage: String,
    pub stats: StatsSnapshot,
    pub details: Option<Value>,
    pub output_file: Option<String>,
    pub error: Option<String>,
    pub error_details: Option<Value>,
    pub items: Vec<ItemStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub duration_secs: f64,
    /// Whether anything usable was produced, even if the task did not complete
    pub has_partial_results: bool,
}

#[derive(Debug)]
struct TaskInner {
    state: TaskState,
    progress: u8,
    message: String,
    stage: String,
    output_file: Option<PathBuf>,
    error: Option<String>,
    error_details: Option<Value>,
    details: Option<Value>,
    items: Vec<ItemStatus>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_emit: Option<Instant>,
    last_emitted_state: Option<TaskState>,
    /// Why cancellation was requested ("user" or "timeout")
    cancel_reason: Option<&'static str>,
}

/// One unit of background work
pub struct Task {
    id: String,
    kind: TaskKind,
    stats: Arc<StatisticsAggregate>,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    /// Fires once the task reaches a terminal state
    finished: CancellationToken,
    min_interval: Duration,
    registry: OnceCell<Weak<RegistryInner>>,
    inner: Mutex<TaskInner>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl Task {
    pub fn new(id: impl Into<String>, kind: TaskKind, sink: Arc<dyn ProgressSink>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            stats: Arc::new(StatisticsAggregate::new()),
            sink,
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            min_interval: DEFAULT_MIN_INTERVAL,
            registry: OnceCell::new(),
            inner: Mutex::new(TaskInner {
                state: TaskState::Pending,
                progress: 0,
                message: "Task created".to_string(),
                stage: "pending".to_string(),
                output_file: None,
                error: None,
                error_details: None,
                details: None,
                items: Vec::new(),
                created_at: now,
                updated_at: now,
                last_emit: None,
                last_emitted_state: None,
                cancel_reason: None,
            }),
        }
    }

    /// Override the throttle interval for non-critical emissions
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    pub fn progress(&self) -> u8 {
        self.inner.lock().progress
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn stats(&self) -> &Arc<StatisticsAggregate> {
        &self.stats
    }

    /// Token observed by the job and handed to collaborators
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cooperative cancellation check; call at least once per processed unit
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once the task is terminal
    pub async fn wait_finished(&self) {
        self.finished.cancelled().await
    }

    pub(crate) fn attach_registry(&self, registry: Weak<RegistryInner>) -> bool {
        self.registry.set(registry).is_ok()
    }

    /// Move `pending -> queued`, emit the initial snapshot and spawn the job.
    ///
    /// Returns immediately. A second call fails with `AlreadyStarted` and spawns nothing.
    pub fn start(self: &Arc<Self>, job: TaskJob, ctx: RunContext) -> Result<StartSummary> {
        if job.kind() != self.kind {
            return Err(Error::InvalidInput(format!(
                "Job of kind {} cannot run on a {} task",
                job.kind(),
                self.kind
            )));
        }

        let summary = {
            let mut inner = self.inner.lock();
            if inner.state != TaskState::Pending {
                return Err(Error::AlreadyStarted(self.id.clone()));
            }
            transition(&mut inner, TaskState::Queued);
            inner.stage = "queued".to_string();
            inner.message = "Task queued".to_string();
            self.emit_locked(&mut inner, true);
            StartSummary {
                task_id: self.id.clone(),
                state: inner.state,
                message: inner.message.clone(),
            }
        };

        tracing::info!("[{}] {} task queued", self.id, self.kind);
        runner::spawn(self.clone(), job, ctx);
        Ok(summary)
    }

    /// Move `queued -> processing`; false if the task was cancelled first
    pub(crate) fn begin_processing(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != TaskState::Queued || self.cancel.is_cancelled() {
            return false;
        }
        transition(&mut inner, TaskState::Processing);
        inner.stage = "processing".to_string();
        inner.message = "Processing started".to_string();
        self.emit_locked(&mut inner, true);
        true
    }

    /// Report progress; clamped to `[current, 99]` and throttled.
    ///
    /// No-op once terminal.
    pub fn report_progress(&self, progress: u8, message: impl Into<String>, details: Option<Value>) {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return;
        }
        inner.progress = progress.min(99).max(inner.progress);
        inner.message = message.into();
        if details.is_some() {
            inner.details = details;
        }
        inner.updated_at = Utc::now();
        self.emit_locked(&mut inner, false);
    }

    /// Name the phase the job is in
    pub fn set_stage(&self, stage: &str) {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() || inner.stage == stage {
            return;
        }
        inner.stage = stage.to_string();
        inner.updated_at = Utc::now();
    }

    pub fn stage(&self) -> String {
        self.inner.lock().stage.clone()
    }

    /// Replace the kind-specific summary without emitting
    pub fn set_details(&self, details: Value) {
        let mut inner = self.inner.lock();
        if !inner.state.is_terminal() {
            inner.details = Some(details);
        }
    }

    /// Replace the per-item list
    pub fn init_items<I, S>(&self, labels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.lock();
        inner.items = labels
            .into_iter()
            .enumerate()
            .map(|(i, label)| ItemStatus::new(i, label))
            .collect();
    }

    /// Mutate one item; ignored for unknown indices and terminal tasks
    pub fn update_item<F>(&self, index: usize, f: F)
    where
        F: FnOnce(&mut ItemStatus),
    {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return;
        }
        if let Some(item) = inner.items.get_mut(index) {
            f(item);
            inner.updated_at = Utc::now();
        }
    }

    pub fn items(&self) -> Vec<ItemStatus> {
        self.inner.lock().items.clone()
    }

    /// Move to `failed`. While cancelling, the task ends `cancelled` instead.
    ///
    /// False for a task that was never started.
    pub fn fail(&self, message: impl Into<String>, stage: Option<&str>, details: Option<Value>) -> bool {
        let message = message.into();
        let finished = self.finish(|task, inner| {
            if inner.state == TaskState::Pending {
                return false;
            }
            let mut error_details = details.unwrap_or_else(|| json!({}));
            if let Some(stage) = stage {
                inner.stage = stage.to_string();
            }
            if let Value::Object(map) = &mut error_details {
                map.entry("stage").or_insert_with(|| json!(inner.stage));
            }
            if inner.state == TaskState::Cancelling {
                task.set_cancelled(inner);
                if let Value::Object(map) = &mut error_details {
                    map.insert("reason".to_string(), json!(inner.cancel_reason.unwrap_or("user")));
                }
                inner.error = Some(message.clone());
            } else {
                transition(inner, TaskState::Failed);
                inner.message = format!("Failed: {}", message);
                inner.error = Some(message.clone());
            }
            inner.error_details = Some(error_details);
            true
        });
        if finished {
            tracing::error!("[{}] task failed: {}", self.id, message);
        }
        finished
    }

    /// Move to `completed` with progress 100. While cancelling, the task ends `cancelled`.
    ///
    /// False unless the task is processing or cancelling.
    pub fn complete(&self, outcome: JobOutcome) -> bool {
        let finished = self.finish(|task, inner| {
            if !matches!(inner.state, TaskState::Processing | TaskState::Cancelling) {
                return false;
            }
            if outcome.details.is_some() {
                inner.details = outcome.details.clone();
            }
            if inner.state == TaskState::Cancelling {
                task.set_cancelled(inner);
                return true;
            }
            transition(inner, TaskState::Completed);
            inner.progress = 100;
            inner.stage = "done".to_string();
            inner.output_file = outcome.output_file.clone();
            inner.message = if outcome.message.is_empty() {
                "Task completed".to_string()
            } else {
                outcome.message.clone()
            };
            true
        });
        if finished {
            tracing::info!("[{}] task finished as {}", self.id, self.state());
        }
        finished
    }

    /// Request cooperative cancellation.
    ///
    /// False if the task is already terminal. A task that never started is
    /// cancelled on the spot.
    pub fn cancel(&self) -> bool {
        self.request_cancel("user")
    }

    /// Cancellation requested by the watchdog
    pub(crate) fn cancel_for_timeout(&self) -> bool {
        self.request_cancel("timeout")
    }

    fn request_cancel(&self, reason: &'static str) -> bool {
        {
            let mut inner = self.inner.lock();
            let state = inner.state;
            match state {
                s if s.is_terminal() => return false,
                TaskState::Cancelling => return true,
                TaskState::Pending => {
                    drop(inner);
                    self.cancel.cancel();
                    return self.finish(|task, inner| {
                        inner.cancel_reason = Some(reason);
                        task.set_cancelled(inner);
                        true
                    });
                }
                _ => {
                    inner.cancel_reason = Some(reason);
                    transition(&mut inner, TaskState::Cancelling);
                    inner.message = if reason == "timeout" {
                        "Timed out, cancelling".to_string()
                    } else {
                        "Cancellation requested".to_string()
                    };
                    self.emit_locked(&mut inner, true);
                }
            }
        }
        tracing::info!("[{}] cancellation requested ({})", self.id, reason);
        self.cancel.cancel();
        true
    }

    /// Move `cancelling -> cancelled` once the job has unwound
    pub fn mark_cancelled(&self) -> bool {
        let finished = self.finish(|task, inner| {
            task.set_cancelled(inner);
            true
        });
        if finished {
            tracing::info!("[{}] task cancelled", self.id);
        }
        finished
    }

    fn set_cancelled(&self, inner: &mut TaskInner) {
        if matches!(inner.state, TaskState::Queued | TaskState::Processing) {
            // A job that stopped without a request still passes through cancelling
            transition(inner, TaskState::Cancelling);
            self.emit_locked(inner, true);
        }
        let reason = inner.cancel_reason.unwrap_or("user");
        transition(inner, TaskState::Cancelled);
        inner.message = if reason == "timeout" {
            "Task timed out".to_string()
        } else {
            "Task cancelled".to_string()
        };
        let mut details = inner.error_details.take().unwrap_or_else(|| json!({}));
        if let Value::Object(map) = &mut details {
            map.insert("reason".to_string(), json!(reason));
        }
        inner.error_details = Some(details);
    }

    /// Apply a terminal transition exactly once: emit, release waiters, deregister.
    ///
    /// `apply` returns false, without touching anything, to refuse the transition.
    fn finish<F>(&self, apply: F) -> bool
    where
        F: FnOnce(&Self, &mut TaskInner) -> bool,
    {
        let status = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() || !apply(self, &mut inner) {
                return false;
            }
            debug_assert!(inner.state.is_terminal());
            self.stats.mark_finished();
            self.emit_locked(&mut inner, true);
            self.status_locked(&inner)
        };

        self.finished.cancel();
        if let Some(registry) = self.registry.get().and_then(Weak::upgrade) {
            registry.retire(&self.id, status);
        }
        true
    }

    /// Read-only snapshot
    pub fn status(&self) -> TaskStatus {
        let inner = self.inner.lock();
        self.status_locked(&inner)
    }

    fn status_locked(&self, inner: &TaskInner) -> TaskStatus {
        let stats = self.stats.to_snapshot();
        let has_partial_results = stats.processed_files > 0
            || inner.output_file.is_some()
            || inner
                .items
                .iter()
                .any(|i| i.status == ItemState::Success);
        TaskStatus {
            task_id: self.id.clone(),
            kind: self.kind,
            state: inner.state,
            progress: inner.progress,
            message: inner.message.clone(),
            stage: inner.stage.clone(),
            duration_secs: stats.duration_secs,
            stats,
            details: inner.details.clone(),
            output_file: inner
                .output_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            error: inner.error.clone(),
            error_details: inner.error_details.clone(),
            items: inner.items.clone(),
            created_at: inner.created_at,
            updated_at: inner.updated_at,
            has_partial_results,
        }
    }

    /// Emit unless throttled. Critical emissions (forced, first, state change,
    /// terminal) always go out.
    fn emit_locked(&self, inner: &mut TaskInner, force: bool) {
        let critical = force
            || inner.state.is_terminal()
            || inner.last_emitted_state != Some(inner.state);
        if !critical {
            if let Some(last) = inner.last_emit {
                if last.elapsed() < self.min_interval {
                    return;
                }
            }
        }

        let event = ProgressEvent {
            task_id: self.id.clone(),
            kind: self.kind,
            state: inner.state,
            progress: inner.progress,
            message: inner.message.clone(),
            stage: inner.stage.clone(),
            stats: self.stats.to_snapshot(),
            details: inner.details.clone(),
            timestamp: Utc::now(),
        };
        self.sink.on_progress(&event);
        inner.last_emit = Some(Instant::now());
        inner.last_emitted_state = Some(inner.state);
    }
}

/// Move to `next`, which must be an edge of the lifecycle table
fn transition(inner: &mut TaskInner, next: TaskState) {
    debug_assert!(
        inner.state.can_transition_to(next),
        "illegal task transition {} -> {}",
        inner.state,
        next
    );
    inner.state = next;
    inner.updated_at = Utc::now();
}
