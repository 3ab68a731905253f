//! Web and PDF scrape task: fetch each URL under bounded concurrency, then process the results

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::bulk::{prefetch_key, process_directory, validate_output_file, DirectoryPass};
use super::progress::ProgressBand;
use super::retry::RetryPolicy;
use super::runner::RunContext;
use super::state::ItemState;
use super::stats::StatField;
use super::task::{JobOutcome, Task};
use crate::error::{Error, Result};
use crate::ingestion::Extractor;
use crate::providers::http::claim_unique_path;
use crate::providers::{Downloader, PageFetcher, ProgressFn};
use crate::types::{ChunkOptions, ExtractedDocument};

const URL_BAND: (f64, f64) = (0.0, 80.0);
const BULK_BAND: (f64, f64) = (80.0, 99.0);

/// What to keep from a URL
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeMode {
    /// Readable page text, saved as `.txt`
    #[default]
    FullText,
    /// Title, meta tags and links, saved as `.json`
    Metadata,
    /// Just the page title, saved as `.json`
    Title,
    /// Download the target as a PDF and extract it
    Pdf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeTarget {
    pub url: String,
    #[serde(default)]
    pub mode: ScrapeMode,
}

impl ScrapeTarget {
    pub fn new(url: impl Into<String>, mode: ScrapeMode) -> Self {
        Self {
            url: url.into(),
            mode,
        }
    }
}

/// Scrape a list of URLs into `output_dir`, then process everything there
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub targets: Vec<ScrapeTarget>,
    pub output_dir: PathBuf,
    pub output_file: PathBuf,
}

impl ScrapeJob {
    pub fn new(
        targets: Vec<ScrapeTarget>,
        output_dir: impl Into<PathBuf>,
        output_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            targets,
            output_dir: output_dir.into(),
            output_file: output_file.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(Error::InvalidInput("No URLs given".to_string()));
        }
        for target in &self.targets {
            let url = Url::parse(target.url.trim())
                .map_err(|e| Error::InvalidInput(format!("Invalid URL '{}': {}", target.url, e)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::InvalidInput(format!(
                    "Only http(s) URLs can be scraped: {}",
                    target.url
                )));
            }
        }
        validate_output_file(&self.output_file)
    }

    pub(crate) async fn run(self, task: &Arc<Task>, ctx: &RunContext) -> Result<JobOutcome> {
        task.set_stage("setup");
        self.validate()?;

        let pdf_dir = self.output_dir.join("pdfs");
        tokio::fs::create_dir_all(&pdf_dir).await?;
        task.init_items(self.targets.iter().map(|t| t.url.clone()));

        let deps = ScrapeDeps {
            fetcher: ctx.collaborators.fetcher.clone(),
            downloader: ctx.collaborators.downloader.clone(),
            extractor: ctx.collaborators.extractor.clone(),
            policy: ctx.retry_policy(),
            cancel: task.cancellation_token(),
            output_dir: self.output_dir.clone(),
            pdf_dir,
            allowed_extensions: ctx
                .config
                .processing
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            chunk_options: ctx.config.chunking.clone().into(),
        };

        task.set_stage("scrape");
        let total = self.targets.len();
        let band = ProgressBand::new(URL_BAND.0, URL_BAND.1);
        task.report_progress(band.start(), format!("Scraping {} URLs", total), None);

        let semaphore = Arc::new(Semaphore::new(ctx.config.scrape.max_concurrent_downloads.max(1)));
        let mut set: JoinSet<(usize, u32, Result<Scraped>)> = JoinSet::new();
        let mut tally = UrlTally {
            task: task.as_ref(),
            band,
            total,
            completed: 0,
            succeeded: 0,
            failed: 0,
            prefetched: HashMap::new(),
        };

        let mut pending = self.targets.into_iter().enumerate();
        let mut next = pending.next();
        loop {
            tokio::select! {
                biased;
                _ = deps.cancel.cancelled(), if next.is_some() => break,
                Some(joined) = set.join_next(), if !set.is_empty() => tally.absorb(joined),
                permit = semaphore.clone().acquire_owned(), if next.is_some() => {
                    let Ok(permit) = permit else { break };
                    let Some((index, target)) = next.take() else { continue };
                    next = pending.next();

                    let task = task.clone();
                    let deps = deps.clone();
                    set.spawn(async move {
                        let _permit = permit;
                        let (retries, result) = scrape_one(&task, index, &target, &deps).await;
                        (index, retries, result)
                    });
                }
                else => break,
            }
        }
        while let Some(joined) = set.join_next().await {
            tally.absorb(joined);
        }
        task.checkpoint()?;

        let UrlTally {
            succeeded,
            failed,
            prefetched,
            ..
        } = tally;
        let summary = json!({
            "successful_urls_count": succeeded,
            "failed_urls_count": failed,
        });
        task.set_details(summary.clone());

        if succeeded == 0 {
            return Err(Error::collaborator(
                "scrape",
                format!("All {} URLs failed", total),
                false,
            ));
        }

        let mut metadata = Map::new();
        metadata.insert("scrape_dir".into(), json!(self.output_dir.to_string_lossy()));
        metadata.insert("successful_urls_count".into(), json!(succeeded));
        metadata.insert("failed_urls_count".into(), json!(failed));

        let bulk = process_directory(
            task,
            ctx,
            DirectoryPass {
                input_dir: self.output_dir.clone(),
                output_file: self.output_file.clone(),
                band: ProgressBand::new(BULK_BAND.0, BULK_BAND.1),
                chunk_options: deps.chunk_options,
                prefetched,
                metadata,
            },
        )
        .await?;

        let mut details = summary;
        details["bulk"] = bulk.details();
        Ok(JobOutcome {
            output_file: Some(bulk.output_file.clone()),
            message: format!(
                "Scraped {}/{} URLs, processed {} files",
                succeeded, total, bulk.documents
            ),
            details: Some(details),
        })
    }
}

#[derive(Clone)]
struct ScrapeDeps {
    fetcher: Arc<dyn PageFetcher>,
    downloader: Arc<dyn Downloader>,
    extractor: Arc<dyn Extractor>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    output_dir: PathBuf,
    pdf_dir: PathBuf,
    /// Lowercase, without the leading dot
    allowed_extensions: Vec<String>,
    chunk_options: ChunkOptions,
}

/// Output of one successfully scraped URL
struct Scraped {
    output: PathBuf,
    /// PDF extraction to reuse in the bulk step
    prefetched: Option<ExtractedDocument>,
}

struct UrlTally<'a> {
    task: &'a Task,
    band: ProgressBand,
    total: usize,
    completed: usize,
    succeeded: usize,
    failed: usize,
    prefetched: HashMap<PathBuf, ExtractedDocument>,
}

impl UrlTally<'_> {
    fn absorb(
        &mut self,
        joined: std::result::Result<(usize, u32, Result<Scraped>), tokio::task::JoinError>,
    ) {
        self.completed += 1;
        let (index, retries, result) = match joined {
            Ok(item) => item,
            Err(e) => {
                tracing::error!("[{}] scrape worker crashed: {}", self.task.id(), e);
                self.failed += 1;
                return;
            }
        };
        if retries > 0 {
            self.task.stats().increment(StatField::RetriedItems, 1);
        }

        match result {
            Ok(scraped) => {
                self.succeeded += 1;
                let output = scraped.output.to_string_lossy().into_owned();
                if let Some(doc) = scraped.prefetched {
                    self.prefetched.insert(prefetch_key(&scraped.output), doc);
                }
                self.task.update_item(index, |item| {
                    item.retries = retries;
                    item.succeed(Some(output));
                });
            }
            Err(e) => {
                self.failed += 1;
                self.task.update_item(index, |item| {
                    item.retries = retries;
                    item.fail(e.to_string());
                });
            }
        }

        self.task.report_progress(
            self.band.map_counts(self.completed, self.total),
            format!("Scraped {}/{} URLs", self.completed, self.total),
            None,
        );
    }
}

/// Fetch and save one target; never panics on collaborator errors
async fn scrape_one(
    task: &Arc<Task>,
    index: usize,
    target: &ScrapeTarget,
    deps: &ScrapeDeps,
) -> (u32, Result<Scraped>) {
    let url = target.url.trim();
    task.update_item(index, |item| item.status = ItemState::Downloading);

    let (retries, result) = match target.mode {
        ScrapeMode::Pdf => scrape_pdf(task, index, url, deps).await,
        mode => scrape_page(task, index, url, mode, deps).await,
    };
    if let Err(e) = &result {
        tracing::warn!("[{}] failed: {}", url, e);
    } else {
        tracing::info!("[{}] scraped", url);
    }
    (retries, result)
}

async fn scrape_pdf(
    task: &Arc<Task>,
    index: usize,
    url: &str,
    deps: &ScrapeDeps,
) -> (u32, Result<Scraped>) {
    let progress = item_progress(task.clone(), index);
    let download = deps
        .policy
        .run(url, &deps.cancel, |_| {
            deps.downloader.download(url, &deps.pdf_dir, progress.clone())
        })
        .await;
    let mut retries = download.retries;
    let path = match download.result {
        Ok(path) => path,
        Err(e) => return (retries, Err(e)),
    };
    let path = match ensure_pdf_name(&path, &deps.allowed_extensions).await {
        Ok(path) => path,
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                tracing::debug!("[{}] could not remove {}: {}", url, path.display(), rm);
            }
            return (retries, Err(e));
        }
    };

    task.update_item(index, |item| item.status = ItemState::Processing);
    let options = deps.chunk_options;
    let extraction = deps
        .policy
        .run(url, &deps.cancel, |_| {
            let extractor = deps.extractor.clone();
            let path = path.clone();
            async move {
                let name = path.display().to_string();
                tokio::task::spawn_blocking(move || extractor.extract(&path, &options))
                    .await
                    .map_err(|e| Error::file_parse(name, format!("extractor crashed: {}", e)))?
            }
        })
        .await;
    retries += extraction.retries;

    match extraction.result {
        Ok(doc) => (
            retries,
            Ok(Scraped {
                output: path,
                prefetched: Some(doc),
            }),
        ),
        Err(e) => {
            // Keep the bulk step from extracting the same broken file again
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                tracing::debug!("[{}] could not remove {}: {}", url, path.display(), rm);
            }
            (retries, Err(e))
        }
    }
}

async fn scrape_page(
    task: &Arc<Task>,
    index: usize,
    url: &str,
    mode: ScrapeMode,
    deps: &ScrapeDeps,
) -> (u32, Result<Scraped>) {
    let fetched = deps
        .policy
        .run(url, &deps.cancel, |_| deps.fetcher.fetch(url))
        .await;
    let retries = fetched.retries;
    let page = match fetched.result {
        Ok(page) => page,
        Err(e) => return (retries, Err(e)),
    };

    task.update_item(index, |item| item.status = ItemState::Processing);
    let stem = output_stem(index, url);
    let (path, body) = match mode {
        ScrapeMode::FullText => {
            if page.text.trim().is_empty() {
                return (retries, Err(Error::file_parse(url, "Page has no readable text")));
            }
            let mut body = String::new();
            if let Some(title) = &page.title {
                body.push_str(title);
                body.push_str("\n\n");
            }
            body.push_str(&format!("Source: {}\n\n", page.url));
            body.push_str(&page.text);
            (deps.output_dir.join(format!("{}.txt", stem)), body)
        }
        ScrapeMode::Metadata => {
            let meta: Map<String, Value> = page
                .meta
                .iter()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect();
            let value = json!({
                "url": page.url,
                "title": page.title,
                "meta": meta,
                "links": page.links,
                "fetched_at": chrono::Utc::now(),
            });
            match serde_json::to_string_pretty(&value) {
                Ok(body) => (deps.output_dir.join(format!("{}.json", stem)), body),
                Err(e) => return (retries, Err(e.into())),
            }
        }
        ScrapeMode::Title | ScrapeMode::Pdf => {
            let value = json!({
                "url": page.url,
                "title": page.title.clone().unwrap_or_default(),
            });
            match serde_json::to_string_pretty(&value) {
                Ok(body) => (deps.output_dir.join(format!("{}.json", stem)), body),
                Err(e) => return (retries, Err(e.into())),
            }
        }
    };

    match tokio::fs::write(&path, body).await {
        Ok(()) => (
            retries,
            Ok(Scraped {
                output: path,
                prefetched: None,
            }),
        ),
        Err(e) => (retries, Err(e.into())),
    }
}

/// A downloaded PDF whose extension is missing or not processable gets `.pdf` appended
fn pdf_file_name(path: &Path, allowed_extensions: &[String]) -> Option<String> {
    let processable = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let ext = e.to_lowercase();
            allowed_extensions.iter().any(|a| *a == ext)
        })
        .unwrap_or(false);
    if processable {
        return None;
    }
    path.file_name()
        .map(|n| format!("{}.pdf", n.to_string_lossy()))
}

async fn ensure_pdf_name(path: &Path, allowed_extensions: &[String]) -> Result<PathBuf> {
    let (Some(name), Some(dir)) = (pdf_file_name(path, allowed_extensions), path.parent()) else {
        return Ok(path.to_path_buf());
    };
    let dest = claim_unique_path(dir, &name)?;
    tokio::fs::rename(path, &dest).await?;
    Ok(dest)
}

/// Byte-level download progress drives the item's own progress only
fn item_progress(task: Arc<Task>, index: usize) -> ProgressFn {
    Arc::new(move |done: usize, total: usize, _stage: &str, _detail: Option<&str>| {
        let progress = ProgressBand::new(0.0, 90.0).map_counts(done, total);
        task.update_item(index, |item| item.progress = item.progress.max(progress));
    })
}

/// File stem for a scraped page: position plus a sanitized host and path
fn output_stem(index: usize, url: &str) -> String {
    let raw = Url::parse(url)
        .map(|u| format!("{}{}", u.host_str().unwrap_or(""), u.path()))
        .unwrap_or_else(|_| url.to_string());
    let mut slug: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    slug = slug.trim_matches('_').to_string();
    slug.truncate(80);
    if slug.is_empty() {
        slug.push_str("page");
    }
    format!("{:03}_{}", index + 1, slug)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_stem() {
        assert_eq!(
            output_stem(0, "https://example.com/blog/post-1?x=2"),
            "001_example_com_blog_post_1"
        );
        assert_eq!(output_stem(11, "https://example.com/"), "012_example_com");
    }

    #[test]
    fn test_pdf_file_name() {
        let allowed = vec!["pdf".to_string(), "txt".to_string()];
        assert_eq!(pdf_file_name(Path::new("/d/download"), &allowed).as_deref(), Some("download.pdf"));
        assert_eq!(pdf_file_name(Path::new("/d/get.php"), &allowed).as_deref(), Some("get.php.pdf"));
        assert_eq!(pdf_file_name(Path::new("/d/paper.PDF"), &allowed), None);
        assert_eq!(pdf_file_name(Path::new("/d/notes.txt"), &allowed), None);
    }

    #[tokio::test]
    async fn test_ensure_pdf_name_renames_without_clobbering() {
        let dir = tempfile::tempdir().unwrap();
        let allowed = vec!["pdf".to_string()];
        std::fs::write(dir.path().join("download.pdf"), b"first").unwrap();
        std::fs::write(dir.path().join("download"), b"second").unwrap();

        let path = ensure_pdf_name(&dir.path().join("download"), &allowed).await.unwrap();
        assert_eq!(path, dir.path().join("download-1.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert_eq!(std::fs::read(dir.path().join("download.pdf")).unwrap(), b"first");
        assert!(!dir.path().join("download").exists());
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        let job = ScrapeJob::new(vec![], "/tmp/out", "/tmp/out.json");
        assert!(matches!(job.validate(), Err(Error::InvalidInput(_))));

        let job = ScrapeJob::new(
            vec![ScrapeTarget::new("ftp://example.com/a", ScrapeMode::FullText)],
            "/tmp/out",
            "/tmp/out.json",
        );
        assert!(matches!(job.validate(), Err(Error::InvalidInput(_))));

        let job = ScrapeJob::new(
            vec![ScrapeTarget::new("https://example.com/a.pdf", ScrapeMode::Pdf)],
            "/tmp/out",
            "/tmp/out.json",
        );
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_mode_serde() {
        let target: ScrapeTarget = serde_json::from_str(r#"{"url":"https://a.b"}"#).unwrap();
        assert_eq!(target.mode, ScrapeMode::FullText);
        let target: ScrapeTarget =
            serde_json::from_str(r#"{"url":"https://a.b","mode":"pdf"}"#).unwrap();
        assert_eq!(target.mode, ScrapeMode::Pdf);
    }
}
