//! Playlist download task: fetch transcripts and metadata, then process them in bulk

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::bulk::{process_directory, validate_output_file, DirectoryPass};
use super::progress::ProgressBand;
use super::runner::RunContext;
use super::state::ItemState;
use super::stats::StatField;
use super::task::{JobOutcome, Task};
use crate::error::{Error, Result};
use crate::providers::ProgressFn;

static PLAYLIST_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^https?://(www\.|m\.|music\.)?youtube\.com/(playlist|watch)\?([^#\s]*&)?list=[A-Za-z0-9_-]+",
    )
    .unwrap()
});

const INIT_BAND: (f64, f64) = (0.0, 2.0);
const DOWNLOAD_BAND: (f64, f64) = (2.0, 90.0);
const FINALIZE_BAND: (f64, f64) = (90.0, 99.0);

/// Whether `url` names a YouTube playlist
pub fn is_playlist_url(url: &str) -> bool {
    PLAYLIST_URL.is_match(url.trim())
}

/// Download one or more playlists into `output_dir`, then process the downloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistJob {
    pub playlists: Vec<String>,
    /// Download root; each playlist gets its own subdirectory
    pub output_dir: PathBuf,
    pub output_file: PathBuf,
}

impl PlaylistJob {
    pub fn new(
        playlists: Vec<String>,
        output_dir: impl Into<PathBuf>,
        output_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            playlists,
            output_dir: output_dir.into(),
            output_file: output_file.into(),
        }
    }

    pub fn validate(&self, ctx: &RunContext) -> Result<()> {
        if ctx.collaborators.playlist.is_none() {
            return Err(Error::Config(
                "Playlist downloads are unavailable: no playlist downloader configured".to_string(),
            ));
        }
        if self.playlists.is_empty() {
            return Err(Error::InvalidInput("No playlist URLs given".to_string()));
        }
        if let Some(bad) = self.playlists.iter().find(|u| !is_playlist_url(u)) {
            return Err(Error::InvalidInput(format!("Not a playlist URL: {}", bad)));
        }
        validate_output_file(&self.output_file)
    }

    pub(crate) async fn run(self, task: &Arc<Task>, ctx: &RunContext) -> Result<JobOutcome> {
        task.set_stage("setup");
        self.validate(ctx)?;
        let downloader = ctx
            .collaborators
            .playlist
            .clone()
            .ok_or_else(|| Error::Config("No playlist downloader configured".to_string()))?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        task.init_items(self.playlists.iter().cloned());
        let init = ProgressBand::new(INIT_BAND.0, INIT_BAND.1);
        task.report_progress(
            init.end(),
            format!("Validated {} playlists", self.playlists.len()),
            None,
        );

        let download_band = ProgressBand::new(DOWNLOAD_BAND.0, DOWNLOAD_BAND.1);
        let policy = ctx.retry_policy();
        let cancel = task.cancellation_token();
        let count = self.playlists.len();
        let mut failed = 0usize;
        let mut downloaded_files = 0usize;

        for (index, url) in self.playlists.iter().enumerate() {
            task.checkpoint()?;
            task.set_stage("download");
            task.update_item(index, |item| item.status = ItemState::Downloading);

            let band = download_band.split(count, index);
            let dest = self.output_dir.join(format!("playlist_{:02}", index + 1));
            let progress = playlist_progress(task.clone(), index, count, band);

            let retried = policy
                .run(url, &cancel, |_| {
                    downloader.download_playlist(url, &dest, progress.clone(), cancel.clone())
                })
                .await;
            let retries = retried.retries;
            if retries > 0 {
                task.stats().increment(StatField::RetriedItems, 1);
            }

            match retried.result {
                Ok(files) => {
                    downloaded_files += files.len();
                    let output = dest.to_string_lossy().into_owned();
                    task.update_item(index, |item| {
                        item.retries = retries;
                        item.succeed(Some(output));
                    });
                    tracing::info!("[{}] downloaded {} files", url, files.len());
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    failed += 1;
                    tracing::warn!("[{}] playlist failed: {}", url, e);
                    task.update_item(index, |item| {
                        item.retries = retries;
                        item.fail(e.to_string());
                    });
                }
            }

            task.report_progress(
                band.end(),
                format!("Finished playlist {}/{}", index + 1, count),
                None,
            );
        }

        let summary = json!({
            "playlists_total": count,
            "playlists_failed": failed,
            "files_downloaded": downloaded_files,
        });
        task.set_details(summary.clone());

        if failed == count {
            return Err(Error::collaborator(
                downloader.name(),
                format!("All {} playlists failed to download", count),
                false,
            ));
        }

        task.checkpoint()?;
        let mut metadata = Map::new();
        metadata.insert("playlists".into(), json!(self.playlists));
        metadata.insert("download_dir".into(), json!(self.output_dir.to_string_lossy()));

        let bulk = process_directory(
            task,
            ctx,
            DirectoryPass {
                input_dir: self.output_dir.clone(),
                output_file: self.output_file.clone(),
                band: ProgressBand::new(FINALIZE_BAND.0, FINALIZE_BAND.1),
                chunk_options: ctx.config.chunking.clone().into(),
                prefetched: HashMap::new(),
                metadata,
            },
        )
        .await?;

        let mut details = summary;
        details["bulk"] = bulk.details();
        Ok(JobOutcome {
            output_file: Some(bulk.output_file.clone()),
            message: format!(
                "Downloaded {}/{} playlists, processed {} files",
                count - failed,
                count,
                bulk.documents
            ),
            details: Some(details),
        })
    }
}

/// Map collaborator callbacks onto the playlist's slice of the download band
fn playlist_progress(task: Arc<Task>, index: usize, count: usize, band: ProgressBand) -> ProgressFn {
    Arc::new(move |done: usize, total: usize, stage: &str, detail: Option<&str>| {
        task.set_stage(stage);
        let overall = band.map_counts(done, total);
        let item_progress = ProgressBand::full().map_counts(done, total).min(99);
        task.update_item(index, |item| item.progress = item.progress.max(item_progress));
        let message = match detail {
            Some(detail) => format!(
                "Playlist {}/{}: {} {}/{} ({})",
                index + 1,
                count,
                stage,
                done,
                total,
                detail
            ),
            None => format!("Playlist {}/{}: {} {}/{}", index + 1, count, stage, done, total),
        };
        task.report_progress(overall, message, None);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playlist_url_pattern() {
        assert!(is_playlist_url(
            "https://www.youtube.com/playlist?list=PLx0sYbCqOb8TBPRdmBHs5Iftvv9TPboYG"
        ));
        assert!(is_playlist_url(
            "https://youtube.com/watch?v=abc123&list=PL123_-x"
        ));
        assert!(!is_playlist_url("https://www.youtube.com/watch?v=abc123"));
        assert!(!is_playlist_url("https://vimeo.com/playlist?list=PL1"));
        assert!(!is_playlist_url("not a url"));
    }
}
