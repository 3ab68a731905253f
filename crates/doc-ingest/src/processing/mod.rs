//! Background tasks with lifecycle, statistics and throttled progress

mod bulk;
mod events;
pub mod output;
mod playlist;
mod progress;
mod registry;
mod retry;
mod runner;
mod scrape;
mod state;
mod stats;
mod task;

pub use bulk::{BulkJob, FileError};
pub use events::{
    BroadcastSink, FanoutSink, MemorySink, NullSink, ProgressEvent, ProgressSink, TracingSink,
};
pub use output::{collection_name, write_documents, write_json_atomic, write_with_fallback, WriteMode};
pub use playlist::{is_playlist_url, PlaylistJob};
pub use progress::ProgressBand;
pub use registry::{TaskRegistry, DEFAULT_FINISHED_CAPACITY};
pub use retry::{Retried, RetryPolicy};
pub use runner::{RunContext, TaskJob};
pub use scrape::{ScrapeJob, ScrapeMode, ScrapeTarget};
pub use state::{ItemState, ItemStatus, TaskKind, TaskState};
pub use stats::{DomainMetric, LargestFile, StatField, StatisticsAggregate, StatsSnapshot};
pub use task::{JobOutcome, StartSummary, Task, TaskStatus, DEFAULT_MIN_INTERVAL};
