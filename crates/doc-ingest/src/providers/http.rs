//! HTTP downloader and HTML page fetcher backed by reqwest

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode, Url};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

use super::{Downloader, FetchedPage, PageFetcher, ProgressFn};
use crate::config::ScrapeConfig;
use crate::error::{Error, Result};
use crate::ingestion::extract_html;

/// Minimum gap between byte-level progress callbacks
const PROGRESS_EVERY: Duration = Duration::from_millis(100);

fn build_client(config: &ScrapeConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))
}

fn status_error(url: &str, status: StatusCode) -> Error {
    let transient = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
    Error::download(url, format!("HTTP {}", status), transient)
}

fn parse_url(url: &str) -> Result<Url> {
    let parsed =
        Url::parse(url).map_err(|e| Error::InvalidInput(format!("Invalid URL '{}': {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(Error::InvalidInput(format!(
            "Unsupported URL scheme '{}' in {}",
            other, url
        ))),
    }
}

/// Pick a file name for a download from the URL path and the response content type
pub(crate) fn download_file_name(url: &Url, content_type: Option<&str>) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("download");

    let mut name: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if Path::new(&name).extension().is_none() {
        let ext = content_type
            .and_then(|ct| ct.split(';').next())
            .and_then(|ct| mime_guess::get_mime_extensions_str(ct.trim()))
            .and_then(|exts| exts.first().copied());
        if let Some(ext) = ext {
            name.push('.');
            name.push_str(ext);
        }
    }
    name
}

/// Claim a free name in `dir` by creating an empty placeholder there
///
/// `name` is tried first, then `stem-1.ext`, `stem-2.ext` and so on. The
/// placeholder is created with `create_new`, so concurrent callers never
/// receive the same path.
pub(crate) fn claim_unique_path(dir: &Path, name: &str) -> std::io::Result<PathBuf> {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = Path::new(name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 0u32;
    loop {
        let candidate = if n == 0 {
            dir.join(name)
        } else {
            dir.join(format!("{}-{}{}", stem, n, ext))
        };
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Move a finished staging file onto a freshly claimed name
fn persist_unique(
    staging: tempfile::NamedTempFile,
    dir: &Path,
    name: &str,
) -> Result<PathBuf> {
    let dest = claim_unique_path(dir, name)?;
    if let Err(e) = staging.persist(&dest) {
        let _ = std::fs::remove_file(&dest);
        return Err(Error::Io(e.error));
    }
    Ok(dest)
}

/// Streams URLs to disk
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(config: &ScrapeConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
        })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, dest_dir: &Path, progress: ProgressFn) -> Result<PathBuf> {
        let parsed = parse_url(url)?;
        let response = self.client.get(parsed.clone()).send().await?;
        if !response.status().is_success() {
            return Err(status_error(url, response.status()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let total = response.content_length().unwrap_or(0) as usize;

        // Staged in a hidden temp file; takes its real name only once complete
        tokio::fs::create_dir_all(dest_dir).await?;
        let staging = tempfile::NamedTempFile::new_in(dest_dir)?;
        let mut file = tokio::fs::File::from_std(staging.reopen()?);

        let mut stream = response.bytes_stream();
        let mut downloaded = 0usize;
        let mut last_report = Instant::now();
        progress(0, total, "download", Some(url));

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                Error::download(
                    url,
                    format!("body interrupted after {} bytes: {}", downloaded, e),
                    true,
                )
            })?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len();

            if last_report.elapsed() >= PROGRESS_EVERY {
                progress(downloaded, total, "download", Some(url));
                last_report = Instant::now();
            }
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let dest = persist_unique(
            staging,
            dest_dir,
            &download_file_name(&parsed, content_type.as_deref()),
        )?;
        progress(downloaded, total.max(downloaded), "download", Some(url));

        tracing::debug!("[{}] downloaded {} bytes to {}", url, downloaded, dest.display());
        Ok(dest)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Fetches HTML pages and extracts readable text
pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new(config: &ScrapeConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let parsed = parse_url(url)?;
        let response = self.client.get(parsed).send().await?;
        if !response.status().is_success() {
            return Err(status_error(url, response.status()));
        }

        let final_url = response.url().clone();
        let body = response.text().await?;
        let html = extract_html(&body);

        let links = html
            .links
            .iter()
            .filter_map(|href| final_url.join(href).ok())
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .map(|u| u.to_string())
            .collect();

        Ok(FetchedPage {
            url: final_url.to_string(),
            title: html.title,
            text: html.text,
            links,
            meta: html.meta,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::no_progress;

    #[test]
    fn test_download_file_name_from_path() {
        let url = Url::parse("https://example.com/papers/attention.pdf?x=1").unwrap();
        assert_eq!(download_file_name(&url, Some("application/pdf")), "attention.pdf");
    }

    #[test]
    fn test_download_file_name_from_content_type() {
        let url = Url::parse("https://example.com/get/12345").unwrap();
        assert_eq!(
            download_file_name(&url, Some("application/pdf; charset=binary")),
            "12345.pdf"
        );

        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(download_file_name(&url, None), "download");
    }

    #[test]
    fn test_claim_unique_path_adds_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"x").unwrap();
        assert_eq!(
            claim_unique_path(dir.path(), "a.pdf").unwrap(),
            dir.path().join("a-1.pdf")
        );
        assert_eq!(
            claim_unique_path(dir.path(), "a.pdf").unwrap(),
            dir.path().join("a-2.pdf")
        );
        assert_eq!(
            claim_unique_path(dir.path(), "b.pdf").unwrap(),
            dir.path().join("b.pdf")
        );
        // The earlier file is untouched
        assert_eq!(std::fs::read(dir.path().join("a.pdf")).unwrap(), b"x");
    }

    #[test]
    fn test_concurrent_claims_get_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| claim_unique_path(dir.path(), "doc.txt").unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let distinct: std::collections::HashSet<_> = paths.iter().collect();
        assert_eq!(distinct.len(), 8);
    }

    #[test]
    fn test_status_error_transience() {
        assert!(status_error("u", StatusCode::SERVICE_UNAVAILABLE).is_transient());
        assert!(status_error("u", StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(!status_error("u", StatusCode::NOT_FOUND).is_transient());
    }

    #[test]
    fn test_parse_url_rejects_other_schemes() {
        assert!(matches!(parse_url("ftp://x/y"), Err(Error::InvalidInput(_))));
        assert!(matches!(parse_url("not a url"), Err(Error::InvalidInput(_))));
        assert!(parse_url("https://example.com").is_ok());
    }

    /// Answers every connection with `body`, declaring `declared_len` bytes
    async fn serve(body: &'static [u8], declared_len: usize) -> String {
        use tokio::io::AsyncReadExt;

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
        format!("http://{}/doc.txt", addr)
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_download_writes_complete_body() {
        let body: &'static [u8] = b"A short document body served in one piece.";
        let url = serve(body, body.len()).await;
        let dir = tempfile::tempdir().unwrap();
        let downloader = HttpDownloader::new(&ScrapeConfig::default()).unwrap();

        let path = downloader.download(&url, dir.path(), no_progress()).await.unwrap();
        assert_eq!(path, dir.path().join("doc.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), body);
        assert_eq!(entries(dir.path()), vec!["doc.txt"]);

        // A second download of the same name keeps the first
        let again = downloader.download(&url, dir.path(), no_progress()).await.unwrap();
        assert_eq!(again, dir.path().join("doc-1.txt"));
    }

    #[tokio::test]
    async fn test_truncated_download_leaves_no_file() {
        let body: &'static [u8] = &[b'x'; 100];
        let url = serve(body, 5000).await;
        let dir = tempfile::tempdir().unwrap();
        let downloader = HttpDownloader::new(&ScrapeConfig::default()).unwrap();

        let err = downloader
            .download(&url, dir.path(), no_progress())
            .await
            .unwrap_err();
        assert!(err.is_transient(), "unexpected error: {}", err);
        assert!(entries(dir.path()).is_empty());
    }
}
