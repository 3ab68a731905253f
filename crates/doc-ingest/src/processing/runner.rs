//! Drives a job on its own tokio task and maps its outcome onto the lifecycle

use serde_json::{json, Value};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::sync::Arc;
use std::time::Duration;

use super::bulk::BulkJob;
use super::playlist::PlaylistJob;
use super::retry::RetryPolicy;
use super::scrape::ScrapeJob;
use super::state::TaskKind;
use super::task::{JobOutcome, Task};
use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::providers::Collaborators;

/// The closed set of work a task can run
#[derive(Debug, Clone)]
pub enum TaskJob {
    Bulk(BulkJob),
    Playlist(PlaylistJob),
    Scrape(ScrapeJob),
}

impl TaskJob {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskJob::Bulk(_) => TaskKind::FileProcessing,
            TaskJob::Playlist(_) => TaskKind::PlaylistDownload,
            TaskJob::Scrape(_) => TaskKind::WebScrape,
        }
    }

    /// Cheap up-front checks, run by handlers before a task is created
    pub fn validate(&self, ctx: &RunContext) -> Result<()> {
        match self {
            TaskJob::Bulk(job) => job.validate(),
            TaskJob::Playlist(job) => job.validate(ctx),
            TaskJob::Scrape(job) => job.validate(),
        }
    }

    async fn run(self, task: &Arc<Task>, ctx: &RunContext) -> Result<JobOutcome> {
        match self {
            TaskJob::Bulk(job) => job.run(task, ctx).await,
            TaskJob::Playlist(job) => job.run(task, ctx).await,
            TaskJob::Scrape(job) => job.run(task, ctx).await,
        }
    }
}

/// Everything a running job may use
#[derive(Clone)]
pub struct RunContext {
    pub collaborators: Collaborators,
    pub config: Arc<IngestConfig>,
}

impl RunContext {
    pub fn new(collaborators: Collaborators, config: Arc<IngestConfig>) -> Self {
        Self {
            collaborators,
            config,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.config.retry)
    }
}

/// Spawn the runner for a freshly queued task
pub(crate) fn spawn(task: Arc<Task>, job: TaskJob, ctx: RunContext) {
    if let Some(timeout) = ctx.config.tasks.task_timeout() {
        tokio::spawn(watchdog(task.clone(), timeout));
    }

    tokio::spawn(async move {
        if !task.begin_processing() {
            task.mark_cancelled();
            return;
        }

        // Run the job on its own tokio task so a panic surfaces as a JoinError
        let job_task = task.clone();
        let handle = tokio::spawn(async move { job.run(&job_task, &ctx).await });

        match handle.await {
            Ok(Ok(outcome)) => {
                task.complete(outcome);
            }
            Ok(Err(Error::Cancelled)) => {
                task.mark_cancelled();
            }
            Ok(Err(e)) => {
                let stage = task.stage();
                task.fail(e.to_string(), None, Some(error_details(e.kind(), &stage)));
            }
            Err(join_err) if join_err.is_panic() => {
                let panic = join_err.into_panic();
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                let stage = task.stage();
                task.fail(
                    format!("Job panicked: {}", message),
                    None,
                    Some(error_details("panic", &stage)),
                );
            }
            Err(_) => {
                task.mark_cancelled();
            }
        }
    });
}

fn error_details(kind: &str, stage: &str) -> Value {
    let mut details = json!({
        "kind": kind,
        "stage": stage,
    });
    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        details["backtrace"] = json!(backtrace.to_string());
    }
    details
}

/// Cancel the task if it is still running after `timeout`
async fn watchdog(task: Arc<Task>, timeout: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(timeout) => {
            if task.cancel_for_timeout() {
                tracing::warn!("[{}] timed out after {:?}", task.id(), timeout);
            }
        }
        _ = task.wait_finished() => {}
    }
}
