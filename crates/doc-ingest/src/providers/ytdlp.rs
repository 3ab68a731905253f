//! Playlist downloads through the yt-dlp command line tool

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{PlaylistDownloader, ProgressFn};
use crate::config::PlaylistConfig;
use crate::error::{Error, Result};

/// Downloads playlist metadata and subtitles (never media) with yt-dlp
#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    binary: PathBuf,
    subtitle_langs: String,
}

impl YtDlpDownloader {
    pub fn new(binary: impl Into<PathBuf>, subtitle_langs: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            subtitle_langs: subtitle_langs.into(),
        }
    }

    /// Resolve the configured binary, searching PATH for bare names
    pub fn locate(config: &PlaylistConfig) -> Option<Self> {
        let candidate = PathBuf::from(&config.binary);
        let resolved = if candidate.components().count() > 1 {
            candidate.is_file().then_some(candidate)
        } else {
            std::env::var_os("PATH").and_then(|paths| {
                std::env::split_paths(&paths)
                    .map(|dir| dir.join(&config.binary))
                    .find(|p| p.is_file())
            })
        }?;
        Some(Self::new(resolved, config.subtitle_langs.clone()))
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run yt-dlp to completion, killing it if the task is cancelled
    async fn run(&self, args: &[&str], cancel: &CancellationToken) -> Result<Output> {
        let mut command = Command::new(&self.binary);
        command.args(args).kill_on_drop(true);

        let output = tokio::select! {
            out = command.output() => out.map_err(|e| {
                Error::collaborator("yt-dlp", format!("failed to run {}: {}", self.binary.display(), e), false)
            })?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("exited with an error")
                .to_string();
            return Err(Error::collaborator("yt-dlp", message.clone(), is_transient_message(&message)));
        }
        Ok(output)
    }

    /// List video ids without downloading anything
    async fn discover(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        let output = self
            .run(
                &["--flat-playlist", "--print", "id", "--no-warnings", url],
                cancel,
            )
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// yt-dlp reports network trouble only through its stderr text
fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["timed out", "timeout", "connection", "temporarily", "http error 5", "http error 429"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn is_text_artifact(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("vtt") | Some("srt")
    )
}

#[async_trait]
impl PlaylistDownloader for YtDlpDownloader {
    async fn download_playlist(
        &self,
        url: &str,
        dest_dir: &Path,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        progress(0, 0, "discovery", Some(url));
        let ids = self.discover(url, &cancel).await?;
        if ids.is_empty() {
            return Err(Error::collaborator("yt-dlp", format!("no entries found in {}", url), false));
        }
        tracing::info!("[{}] found {} videos", url, ids.len());

        tokio::fs::create_dir_all(dest_dir).await?;
        let template = dest_dir.join("%(id)s.%(ext)s");
        let template = template.to_string_lossy();

        let total = ids.len();
        let mut failures = 0usize;
        for (i, id) in ids.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let video_url = format!("https://www.youtube.com/watch?v={}", id);
            let args = [
                "--skip-download",
                "--write-info-json",
                "--write-subs",
                "--write-auto-subs",
                "--sub-langs",
                self.subtitle_langs.as_str(),
                "--sub-format",
                "vtt",
                "--no-warnings",
                "-o",
                &*template,
                video_url.as_str(),
            ];
            match self.run(&args, &cancel).await {
                Ok(_) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    failures += 1;
                    tracing::warn!("[{}] video {} skipped: {}", url, id, e);
                }
            }
            progress(i + 1, total, "download", Some(id.as_str()));
        }

        if failures == total {
            return Err(Error::collaborator(
                "yt-dlp",
                format!("all {} videos of {} failed", total, url),
                true,
            ));
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(dest_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_text_artifact(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn name(&self) -> &str {
        "yt-dlp"
    }
}
