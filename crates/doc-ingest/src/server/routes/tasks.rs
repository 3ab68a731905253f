//! Task submission, status, cancellation and artifact download

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::processing::{
    BulkJob, PlaylistJob, ScrapeJob, ScrapeMode, ScrapeTarget, StartSummary, Task, TaskJob,
    TaskState, TaskStatus,
};
use crate::server::state::AppState;
use crate::types::ChunkOptions;

/// Request body for `POST /api/process`
#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub input_dir: PathBuf,
    #[serde(default)]
    pub output_file: Option<PathBuf>,
    #[serde(default)]
    pub chunk_options: Option<ChunkOptions>,
}

/// Request body for `POST /api/playlist`
#[derive(Debug, Deserialize)]
pub struct PlaylistRequest {
    #[serde(alias = "urls")]
    pub playlists: Vec<String>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub output_file: Option<PathBuf>,
}

/// Request body for `POST /api/scrape`
///
/// `urls` share one `mode`; `targets` can set a mode per URL.
#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub mode: ScrapeMode,
    #[serde(default)]
    pub targets: Vec<ScrapeTarget>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub output_file: Option<PathBuf>,
}

/// Response from a cancel request
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub task_id: String,
    /// Whether this request moved the task to `cancelling`
    pub cancelled: bool,
    pub state: Option<TaskState>,
}

/// Response from `GET /api/tasks`
#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskStatus>,
    pub active: usize,
    pub finished: usize,
}

/// POST /api/process - Process a local directory
pub async fn process(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> Result<(StatusCode, Json<StartSummary>)> {
    let task_id = new_task_id();
    let output_file = request
        .output_file
        .unwrap_or_else(|| default_output_file(&state, &task_id));

    let mut job = BulkJob::new(request.input_dir, output_file);
    job.chunk_options = request.chunk_options;
    submit(&state, task_id, TaskJob::Bulk(job))
}

/// POST /api/playlist - Download playlists, then process the downloads
pub async fn playlist(
    State(state): State<AppState>,
    Json(request): Json<PlaylistRequest>,
) -> Result<(StatusCode, Json<StartSummary>)> {
    let task_id = new_task_id();
    let output_dir = request
        .output_dir
        .unwrap_or_else(|| default_work_dir(&state, &task_id, "playlists"));
    let output_file = request
        .output_file
        .unwrap_or_else(|| default_output_file(&state, &task_id));

    let job = PlaylistJob::new(request.playlists, output_dir, output_file);
    submit(&state, task_id, TaskJob::Playlist(job))
}

/// POST /api/scrape - Scrape URLs, then process the results
pub async fn scrape(
    State(state): State<AppState>,
    Json(request): Json<ScrapeRequest>,
) -> Result<(StatusCode, Json<StartSummary>)> {
    let task_id = new_task_id();
    let mode = request.mode;
    let mut targets: Vec<ScrapeTarget> = request
        .urls
        .into_iter()
        .map(|url| ScrapeTarget::new(url, mode))
        .collect();
    targets.extend(request.targets);

    let output_dir = request
        .output_dir
        .unwrap_or_else(|| default_work_dir(&state, &task_id, "scraped"));
    let output_file = request
        .output_file
        .unwrap_or_else(|| default_output_file(&state, &task_id));

    let job = ScrapeJob::new(targets, output_dir, output_file);
    submit(&state, task_id, TaskJob::Scrape(job))
}

/// GET /api/status/:id - Live status, or the cached terminal status
pub async fn get_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatus>> {
    state
        .registry()
        .status(&task_id)
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("Task {}", task_id)))
}

/// POST /api/cancel/:id - Request cooperative cancellation
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<CancelResponse>> {
    let cancelled = state.registry().cancel(&task_id)?;
    let task_state = state.registry().status(&task_id).map(|s| s.state);

    tracing::info!("[{}] cancel requested (accepted: {})", task_id, cancelled);
    Ok(Json(CancelResponse {
        task_id,
        cancelled,
        state: task_state,
    }))
}

/// GET /api/tasks - List live and recently finished tasks
pub async fn list_tasks(State(state): State<AppState>) -> Json<TaskListResponse> {
    let registry = state.registry();
    Json(TaskListResponse {
        tasks: registry.list(),
        active: registry.active_count(),
        finished: registry.finished_count(),
    })
}

/// GET /api/download/:id - Serve the artifact of a completed task
pub async fn download_artifact(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response> {
    let status = state
        .registry()
        .status(&task_id)
        .ok_or_else(|| Error::NotFound(format!("Task {}", task_id)))?;

    if status.state != TaskState::Completed {
        return Err(Error::InvalidInput(format!(
            "Task {} is {}, artifact is only available once completed",
            task_id, status.state
        )));
    }
    let path = status
        .output_file
        .map(PathBuf::from)
        .ok_or_else(|| Error::NotFound(format!("Artifact for task {}", task_id)))?;

    let body = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(format!("Artifact {}", path.display())),
        _ => Error::Io(e),
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.json", task_id));

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        body,
    )
        .into_response())
}

/// Validate, register and start a task
fn submit(
    state: &AppState,
    task_id: String,
    job: TaskJob,
) -> Result<(StatusCode, Json<StartSummary>)> {
    let ctx = state.run_context().clone();
    job.validate(&ctx)?;

    let task = Arc::new(
        Task::new(task_id, job.kind(), state.sink())
            .with_min_interval(state.config().tasks.progress_interval()),
    );
    state.registry().register(task.clone())?;
    let summary = task.start(job, ctx)?;

    Ok((StatusCode::ACCEPTED, Json(summary)))
}

fn new_task_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_output_file(state: &AppState, task_id: &str) -> PathBuf {
    state
        .config()
        .processing
        .output_dir
        .join(format!("{}.json", task_id))
}

fn default_work_dir(state: &AppState, task_id: &str, name: &str) -> PathBuf {
    state.config().processing.output_dir.join(task_id).join(name)
}
