//! Collaborator abstractions for downloading, page fetching and playlist retrieval
//!
//! Task code only sees the traits here plus [`Extractor`]; concrete backends are
//! chosen once at startup and handed around as a [`Collaborators`] set.

pub mod http;
pub mod ytdlp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::IngestConfig;
use crate::error::Result;
use crate::ingestion::{Extractor, LocalExtractor};

pub use http::{HttpDownloader, HttpPageFetcher};
pub use ytdlp::YtDlpDownloader;

/// Progress callback shared by every collaborator: `(done, total, stage, detail)`.
///
/// `total == 0` means the total is not known yet.
pub type ProgressFn = Arc<dyn Fn(usize, usize, &str, Option<&str>) + Send + Sync>;

/// A callback that drops every report
pub fn no_progress() -> ProgressFn {
    Arc::new(|_: usize, _: usize, _: &str, _: Option<&str>| {})
}

/// Downloads a URL into a directory
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` into `dest_dir`, returning the written file
    async fn download(&self, url: &str, dest_dir: &Path, progress: ProgressFn) -> Result<PathBuf>;

    /// Get downloader name
    fn name(&self) -> &str;
}

/// A fetched and parsed HTML page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchedPage {
    /// URL after redirects
    pub url: String,
    pub title: Option<String>,
    /// Readable text, one block per line
    pub text: String,
    /// Absolute link targets
    pub links: Vec<String>,
    /// `<meta>` name/content pairs
    pub meta: Vec<(String, String)>,
}

/// Fetches a single HTML page
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;

    /// Get fetcher name
    fn name(&self) -> &str;
}

/// Downloads every entry of a video playlist as text artifacts (metadata, subtitles)
#[async_trait]
pub trait PlaylistDownloader: Send + Sync {
    async fn download_playlist(
        &self,
        url: &str,
        dest_dir: &Path,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<Vec<PathBuf>>;

    /// Get downloader name
    fn name(&self) -> &str;
}

/// The capability set injected into every task
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn Extractor>,
    pub downloader: Arc<dyn Downloader>,
    pub fetcher: Arc<dyn PageFetcher>,
    /// Absent when no playlist tool is configured or installed
    pub playlist: Option<Arc<dyn PlaylistDownloader>>,
}

impl Collaborators {
    /// Build the production collaborators
    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        let downloader = HttpDownloader::new(&config.scrape)?;
        let fetcher = HttpPageFetcher::new(&config.scrape)?;

        let playlist: Option<Arc<dyn PlaylistDownloader>> = if config.playlist.enabled {
            match YtDlpDownloader::locate(&config.playlist) {
                Some(ytdlp) => {
                    tracing::info!("Playlist downloads enabled via {}", ytdlp.binary().display());
                    Some(Arc::new(ytdlp))
                }
                None => {
                    tracing::warn!(
                        "'{}' not found on PATH; playlist tasks are disabled",
                        config.playlist.binary
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            extractor: Arc::new(LocalExtractor::new()),
            downloader: Arc::new(downloader),
            fetcher: Arc::new(fetcher),
            playlist,
        })
    }

    /// Names of the active backends, for `/api/info`
    pub fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "extractor": self.extractor.name(),
            "downloader": self.downloader.name(),
            "fetcher": self.fetcher.name(),
            "playlist": self.playlist.as_ref().map(|p| p.name().to_string()),
        })
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("extractor", &self.extractor.name())
            .field("downloader", &self.downloader.name())
            .field("fetcher", &self.fetcher.name())
            .field("playlist", &self.playlist.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}
