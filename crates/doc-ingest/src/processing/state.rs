//! Task and item lifecycle states

use serde::{Deserialize, Serialize};

/// The closed set of task kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    FileProcessing,
    PlaylistDownload,
    WebScrape,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::FileProcessing => "file_processing",
            TaskKind::PlaylistDownload => "playlist_download",
            TaskKind::WebScrape => "web_scrape",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle state
///
/// `pending -> queued -> processing -> {completed | failed | cancelling -> cancelled}`.
/// A pending task may be cancelled directly, and a queued task may enter
/// `cancelling` before its worker starts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Queued,
    Processing,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Whether `self -> next` is a legal edge
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Cancelled)
                | (Queued, Processing)
                | (Queued, Cancelling)
                | (Queued, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelling)
                | (Cancelling, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Queued => "queued",
            TaskState::Processing => "processing",
            TaskState::Cancelling => "cancelling",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-item status within a task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Queued,
    Downloading,
    Processing,
    Success,
    Error,
}

/// One URL, file or playlist tracked inside a task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemStatus {
    pub index: usize,
    /// URL, playlist URL or file name
    pub label: String,
    pub status: ItemState,
    pub progress: u8,
    pub retries: u32,
    pub error: Option<String>,
    /// Path of whatever the item produced
    pub output: Option<String>,
}

impl ItemStatus {
    pub fn new(index: usize, label: impl Into<String>) -> Self {
        Self {
            index,
            label: label.into(),
            status: ItemState::Queued,
            progress: 0,
            retries: 0,
            error: None,
            output: None,
        }
    }

    pub fn succeed(&mut self, output: Option<String>) {
        self.status = ItemState::Success;
        self.progress = 100;
        self.output = output;
        self.error = None;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ItemState::Error;
        self.error = Some(error.into());
    }
}
