//! Ingestion server binary
//!
//! Run with: cargo run -p doc-ingest --bin doc-ingest-server [config.toml]

use doc_ingest::{config::IngestConfig, server::DocServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doc_ingest=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Config path: first argument, then DOC_INGEST_CONFIG
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DOC_INGEST_CONFIG").ok())
        .map(PathBuf::from);
    let config = IngestConfig::load(config_path.as_deref())?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Workers: {}", config.processing.workers());
    tracing::info!("  - Output dir: {}", config.processing.output_dir.display());
    tracing::info!(
        "  - Chunking: {} chars, {} overlap",
        config.chunking.chunk_size,
        config.chunking.chunk_overlap
    );
    tracing::info!(
        "  - Retry: {} attempts, {}ms base delay",
        config.retry.max_attempts,
        config.retry.base_delay_ms
    );
    match config.tasks.task_timeout() {
        Some(timeout) => tracing::info!("  - Task timeout: {:?}", timeout),
        None => tracing::info!("  - Task timeout: none"),
    }

    let server = DocServer::new(config)?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nEndpoints:");
    println!("  POST /api/process    - Process a local directory");
    println!("  POST /api/scrape     - Scrape URLs");
    println!("  POST /api/playlist   - Download playlist transcripts");
    println!("  GET  /api/status/:id - Task status");
    println!("  GET  /api/events     - Progress stream (SSE)");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
