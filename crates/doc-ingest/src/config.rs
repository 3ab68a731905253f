//! Configuration for the ingestion service

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// File discovery and worker configuration
    pub processing: ProcessingConfig,
    /// Text chunking configuration
    pub chunking: ChunkingConfig,
    /// Task lifecycle configuration
    pub tasks: TaskConfig,
    /// Retry policy shared by all task kinds
    pub retry: RetryConfig,
    /// Web scraping configuration
    pub scrape: ScrapeConfig,
    /// Playlist download configuration
    pub playlist: PlaylistConfig,
}

impl IngestConfig {
    /// Load configuration from an optional TOML file, then apply `DOC_INGEST_*` overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                toml::from_str::<IngestConfig>(&raw).map_err(|e| {
                    Error::Config(format!("Failed to parse {}: {}", path.display(), e))
                })?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production)
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("DOC_INGEST_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("DOC_INGEST_PORT") {
            self.server.port = parse_env("DOC_INGEST_PORT", &port)?;
        }
        if let Some(workers) = lookup("DOC_INGEST_WORKERS") {
            self.processing.max_workers = Some(parse_env("DOC_INGEST_WORKERS", &workers)?);
        }
        if let Some(dir) = lookup("DOC_INGEST_OUTPUT_DIR") {
            self.processing.output_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup("DOC_INGEST_TASK_TIMEOUT_SECS") {
            self.tasks.task_timeout_secs = Some(parse_env("DOC_INGEST_TASK_TIMEOUT_SECS", &secs)?);
        }
        if let Some(binary) = lookup("DOC_INGEST_YTDLP") {
            self.playlist.binary = binary;
        }
        Ok(())
    }

    /// Reject configurations the runtime cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(Error::Config("chunking.chunk_size must be > 0".to_string()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(Error::Config(
                "chunking.chunk_overlap must be smaller than chunk_size".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be >= 1".to_string()));
        }
        if self.scrape.max_concurrent_downloads == 0 {
            return Err(Error::Config(
                "scrape.max_concurrent_downloads must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!("{} has invalid value '{}'", name, value))
    })
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

/// File discovery and worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Number of files extracted concurrently (default: CPU count, max 8)
    pub max_workers: Option<usize>,
    /// Files larger than this are counted and skipped (default: 50MB)
    pub max_file_size: u64,
    /// Lowercase extensions eligible for processing
    pub allowed_extensions: Vec<String>,
    /// Where artifacts go when a request names no output path
    pub output_dir: PathBuf,
}

impl ProcessingConfig {
    /// Effective worker count
    pub fn workers(&self) -> usize {
        self.max_workers
            .unwrap_or_else(|| num_cpus::get().min(8))
            .max(1)
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        let allowed = [
            "txt", "md", "markdown", "pdf", "html", "htm", "csv", "json", "vtt", "srt", "rs", "py",
            "js", "ts", "go", "java", "c", "cpp", "h", "sh", "toml", "yaml", "yml", "xml", "sql",
        ];
        Self {
            max_workers: None, // Auto-detect from CPU count
            max_file_size: 50 * 1024 * 1024,
            allowed_extensions: allowed.iter().map(|s| s.to_string()).collect(),
            output_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("doc-ingest")
                .join("output"),
        }
    }
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Overlap between chunks in characters
    pub chunk_overlap: usize,
    /// Minimum chunk size (smaller trailing chunks are dropped)
    pub min_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            chunk_overlap: 200,
            min_chunk_size: 50,
        }
    }
}

/// Task lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Minimum gap between non-critical progress events
    pub progress_interval_ms: u64,
    /// Watchdog timeout per task (None = no watchdog)
    pub task_timeout_secs: Option<u64>,
    /// How many terminal statuses stay queryable after a task leaves the registry
    pub finished_cache_size: usize,
    /// Capacity of the progress event broadcast channel
    pub event_channel_capacity: usize,
}

impl TaskConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: 500,
            task_timeout_secs: None,
            finished_cache_size: 256,
            event_channel_capacity: 1024,
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Upper bound for the exponential backoff
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 10_000,
        }
    }
}

/// Web scraping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// URLs downloaded concurrently per task
    pub max_concurrent_downloads: usize,
    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 4,
            request_timeout_secs: 30,
            user_agent: format!("doc-ingest/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Playlist download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistConfig {
    /// Enable playlist tasks (requires the downloader binary)
    pub enabled: bool,
    /// Path or name of the yt-dlp binary
    pub binary: String,
    /// Subtitle languages requested per video
    pub subtitle_langs: String,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: "yt-dlp".to_string(),
            subtitle_langs: "en.*".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tasks.progress_interval(), Duration::from_millis(500));
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.processing.workers() >= 1);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let raw = r#"
            [server]
            port = 9000

            [retry]
            max_attempts = 2
        "#;
        let config: IngestConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, 2_000);
        assert_eq!(config.chunking.chunk_size, 1024);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("DOC_INGEST_PORT", "7070"),
            ("DOC_INGEST_WORKERS", "3"),
            ("DOC_INGEST_TASK_TIMEOUT_SECS", "60"),
        ]
        .into_iter()
        .collect();

        let mut config = IngestConfig::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.port, 7070);
        assert_eq!(config.processing.workers(), 3);
        assert_eq!(config.tasks.task_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_invalid_env_value_is_config_error() {
        let mut config = IngestConfig::default();
        let err = config
            .apply_env_overrides(|k| (k == "DOC_INGEST_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let mut config = IngestConfig::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(config.validate().is_err());
    }
}
