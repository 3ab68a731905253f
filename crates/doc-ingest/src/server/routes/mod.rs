//! API routes for the ingestion server

pub mod events;
pub mod tasks;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};

use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Task submission
        .route("/process", post(tasks::process))
        .route("/playlist", post(tasks::playlist))
        .route("/scrape", post(tasks::scrape))
        // Task management
        .route("/tasks", get(tasks::list_tasks))
        .route("/status/:id", get(tasks::get_status))
        .route("/cancel/:id", post(tasks::cancel_task))
        .route("/download/:id", get(tasks::download_artifact))
        // Progress stream
        .route("/events", get(events::progress_events))
        // Info
        .route("/info", get(info))
}

/// API info endpoint
async fn info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "doc-ingest",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Background document ingestion with progress tracking",
        "endpoints": {
            "POST /api/process": "Process a local directory into a JSON artifact",
            "POST /api/playlist": "Download playlist transcripts and process them",
            "POST /api/scrape": "Scrape URLs (text, metadata, title or PDF) and process them",
            "GET /api/tasks": "List live and recently finished tasks",
            "GET /api/status/:id": "Get task status",
            "POST /api/cancel/:id": "Request cooperative cancellation",
            "GET /api/download/:id": "Download the artifact of a completed task",
            "GET /api/events": "Server-sent progress events (optional ?task_id=)"
        },
        "collaborators": state.run_context().collaborators.describe(),
        "tasks": {
            "active": state.registry().active_count(),
            "finished": state.registry().finished_count(),
        }
    }))
}
