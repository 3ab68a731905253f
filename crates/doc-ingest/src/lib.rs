//! doc-ingest: background document ingestion with task tracking
//!
//! Local directories, scraped web pages, downloaded PDFs and playlist transcripts are
//! extracted, chunked and written to one JSON artifact per task. Every task runs in the
//! background with a lifecycle, running statistics, throttled progress events and
//! cooperative cancellation.

pub mod config;
pub mod error;
pub mod ingestion;
pub mod processing;
pub mod providers;
pub mod server;
pub mod types;

pub use config::IngestConfig;
pub use error::{Error, Result};
pub use processing::{
    BulkJob, PlaylistJob, ProgressEvent, ProgressSink, RunContext, ScrapeJob, ScrapeMode,
    ScrapeTarget, Task, TaskJob, TaskKind, TaskRegistry, TaskState, TaskStatus,
};
pub use providers::Collaborators;
pub use types::{ChunkOptions, DocumentEntry, ExtractedDocument, FileType};
