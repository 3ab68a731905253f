//! Mock collaborators and fixtures shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use doc_ingest::config::{IngestConfig, RetryConfig};
use doc_ingest::ingestion::{Extractor, LocalExtractor};
use doc_ingest::processing::{MemorySink, RunContext, Task, TaskState, TaskStatus};
use doc_ingest::providers::{
    Collaborators, Downloader, FetchedPage, PageFetcher, PlaylistDownloader, ProgressFn,
};
use doc_ingest::{ChunkOptions, Error, ExtractedDocument, Result};

/// A few hundred characters of prose, enough for at least one chunk
pub fn prose(topic: &str) -> String {
    (0..6)
        .map(|i| format!("Paragraph {} explains {} in plain words for the reader.", i, topic))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

/// Config with fast retries, no throttling and no playlist tool
pub fn test_config(output_dir: &Path) -> IngestConfig {
    let mut config = IngestConfig::default();
    config.processing.max_workers = Some(2);
    config.processing.output_dir = output_dir.to_path_buf();
    config.tasks.progress_interval_ms = 0;
    config.retry = RetryConfig {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 5,
    };
    config.playlist.enabled = false;
    config
}

/// Wraps the local extractor with scripted failures, delays and a call counter
#[derive(Default)]
pub struct ScriptedExtractor {
    inner: LocalExtractor,
    /// File name -> transient failures left before it succeeds
    transient: Mutex<HashMap<String, u32>>,
    /// File names that always fail permanently
    broken: HashSet<String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_transiently(self, file_name: &str, times: u32) -> Self {
        self.transient.lock().insert(file_name.to_string(), times);
        self
    }

    pub fn broken(mut self, file_name: &str) -> Self {
        self.broken.insert(file_name.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Extractor for ScriptedExtractor {
    fn extract(&self, path: &Path, options: &ChunkOptions) -> Result<ExtractedDocument> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.broken.contains(&name) {
            return Err(Error::file_parse(&name, "corrupt file"));
        }
        {
            let mut transient = self.transient.lock();
            if let Some(left) = transient.get_mut(&name) {
                if *left > 0 {
                    *left -= 1;
                    return Err(Error::Timeout(format!("extracting {}", name)));
                }
            }
        }
        self.inner.extract(path, options)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Serves canned pages; any other URL fails with a transient 503
#[derive(Default)]
pub struct MockFetcher {
    pages: HashMap<String, FetchedPage>,
    delay: Duration,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, title: &str, text: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            FetchedPage {
                url: url.to_string(),
                title: Some(title.to_string()),
                text: text.to_string(),
                links: vec![format!("{}/next", url)],
                meta: vec![("description".to_string(), title.to_string())],
            },
        );
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        *self.calls.lock().entry(url.to_string()).or_insert(0) += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| Error::download(url, "503 Service Unavailable", true))
    }

    fn name(&self) -> &str {
        "mock-fetcher"
    }
}

/// Writes canned bodies into the destination directory
#[derive(Default)]
pub struct MockDownloader {
    /// URL -> (file name, body)
    files: HashMap<String, (String, String)>,
}

impl MockDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, url: &str, file_name: &str, body: &str) -> Self {
        self.files
            .insert(url.to_string(), (file_name.to_string(), body.to_string()));
        self
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn download(&self, url: &str, dest_dir: &Path, progress: ProgressFn) -> Result<PathBuf> {
        let (name, body) = self
            .files
            .get(url)
            .ok_or_else(|| Error::download(url, "404 Not Found", false))?;
        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(name);
        tokio::fs::write(&path, body).await?;
        progress(body.len(), body.len(), "download", Some(name.as_str()));
        Ok(path)
    }

    fn name(&self) -> &str {
        "mock-downloader"
    }
}

/// Writes `videos` subtitle files per playlist; scripted URLs always fail
pub struct MockPlaylist {
    pub videos: usize,
    /// URL -> whether its failure is transient
    failing: HashMap<String, bool>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockPlaylist {
    pub fn new(videos: usize) -> Self {
        Self {
            videos,
            failing: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Fail every attempt at `url`, transiently (retried) or permanently
    pub fn failing(mut self, url: &str, transient: bool) -> Self {
        self.failing.insert(url.to_string(), transient);
        self
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PlaylistDownloader for MockPlaylist {
    async fn download_playlist(
        &self,
        url: &str,
        dest_dir: &Path,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        *self.calls.lock().entry(url.to_string()).or_insert(0) += 1;
        if let Some(&transient) = self.failing.get(url) {
            return Err(Error::collaborator(
                "mock-playlist",
                format!("{} is unavailable", url),
                transient,
            ));
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        progress(0, self.videos, "discovery", None);
        let mut files = Vec::new();
        for i in 0..self.videos {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let path = dest_dir.join(format!("video_{}.en.vtt", i));
            let body = format!(
                "WEBVTT\n\n00:00:01.000 --> 00:00:04.000\n{}\n\n00:00:05.000 --> 00:00:09.000\n{}\n",
                prose("the first half of the talk"),
                prose("the second half of the talk")
            );
            tokio::fs::write(&path, body).await?;
            files.push(path);
            progress(i + 1, self.videos, "download", Some("subtitles"));
        }
        Ok(files)
    }

    fn name(&self) -> &str {
        "mock-playlist"
    }
}

pub fn collaborators(extractor: Arc<dyn Extractor>) -> Collaborators {
    Collaborators {
        extractor,
        downloader: Arc::new(MockDownloader::new()),
        fetcher: Arc::new(MockFetcher::new()),
        playlist: None,
    }
}

pub fn context(config: IngestConfig, collaborators: Collaborators) -> RunContext {
    RunContext::new(collaborators, Arc::new(config))
}

/// Every change between consecutive emitted states is an edge of the lifecycle table
pub fn assert_legal_transitions(sink: &MemorySink, task_id: &str) {
    let mut states: Vec<TaskState> = sink.events_for(task_id).iter().map(|e| e.state).collect();
    states.dedup();
    for pair in states.windows(2) {
        assert!(
            pair[0].can_transition_to(pair[1]),
            "{} -> {} in {:?}",
            pair[0],
            pair[1],
            states
        );
    }
}

/// Wait for a task to reach a terminal state, failing the test after 10 seconds
pub async fn run_to_end(task: &Arc<Task>) -> TaskStatus {
    tokio::time::timeout(Duration::from_secs(10), task.wait_finished())
        .await
        .expect("task did not finish in time");
    task.status()
}

/// Local HTTP server answering every request with `body` under a declared
/// `Content-Length` of `declared_len`; a larger length simulates a dropped
/// connection. Returns the base URL.
pub async fn serve_body(body: &'static [u8], declared_len: usize) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    declared_len
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}", addr)
}
