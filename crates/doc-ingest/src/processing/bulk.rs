//! Bulk file processing: discover, extract on a bounded worker pool, write one artifact

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::output::{write_documents, WriteMode};
use super::progress::ProgressBand;
use super::retry::{Retried, RetryPolicy};
use super::runner::RunContext;
use super::stats::{DomainMetric, StatField, StatisticsAggregate};
use super::task::{JobOutcome, Task};
use crate::error::{Error, Result};
use crate::ingestion::{discover_files, DiscoveredFile, DiscoveryOptions, Extractor};
use crate::types::{ChunkOptions, DocumentEntry, ExtractedDocument, FileType};

/// Process every eligible file under a directory into one JSON artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkJob {
    pub input_dir: PathBuf,
    pub output_file: PathBuf,
    /// Overrides the configured chunking
    #[serde(default)]
    pub chunk_options: Option<ChunkOptions>,
}

impl BulkJob {
    pub fn new(input_dir: impl Into<PathBuf>, output_file: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_file: output_file.into(),
            chunk_options: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.input_dir.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Input directory does not exist: {}",
                self.input_dir.display()
            )));
        }
        validate_output_file(&self.output_file)
    }

    pub(crate) async fn run(self, task: &Arc<Task>, ctx: &RunContext) -> Result<JobOutcome> {
        self.validate()?;
        let chunk_options = self
            .chunk_options
            .unwrap_or_else(|| ctx.config.chunking.clone().into());

        let mut metadata = Map::new();
        metadata.insert("input_dir".into(), json!(self.input_dir.to_string_lossy()));

        let summary = process_directory(
            task,
            ctx,
            DirectoryPass {
                input_dir: self.input_dir,
                output_file: self.output_file,
                band: ProgressBand::new(0.0, 99.0),
                chunk_options,
                prefetched: HashMap::new(),
                metadata,
            },
        )
        .await?;

        Ok(JobOutcome {
            output_file: Some(summary.output_file.clone()),
            message: format!(
                "Processed {} files ({} errors)",
                summary.documents,
                summary.file_errors.len()
            ),
            details: Some(summary.details()),
        })
    }
}

pub(crate) fn validate_output_file(output_file: &Path) -> Result<()> {
    if output_file.file_name().is_none() || output_file.is_dir() {
        return Err(Error::InvalidInput(format!(
            "Output path must name a file: {}",
            output_file.display()
        )));
    }
    Ok(())
}

/// One per-file failure, kept for the artifact and the task details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileError {
    pub file: String,
    pub error: String,
}

/// One directory pass, shared by all task kinds as their final step
pub(crate) struct DirectoryPass {
    pub input_dir: PathBuf,
    pub output_file: PathBuf,
    /// Progress range this pass reports into
    pub band: ProgressBand,
    pub chunk_options: ChunkOptions,
    /// Extractions done earlier in the task, keyed by canonical path
    pub prefetched: HashMap<PathBuf, ExtractedDocument>,
    /// Extra run metadata merged into the artifact
    pub metadata: Map<String, Value>,
}

#[derive(Debug)]
pub(crate) struct BulkSummary {
    pub documents: usize,
    pub file_errors: Vec<FileError>,
    pub output_file: PathBuf,
    pub write_mode: WriteMode,
    pub ignored_files: usize,
    pub oversized_files: usize,
}

impl BulkSummary {
    pub fn details(&self) -> Value {
        json!({
            "documents": self.documents,
            "output_file": self.output_file.to_string_lossy(),
            "write_mode": self.write_mode,
            "ignored_files": self.ignored_files,
            "oversized_files": self.oversized_files,
            "file_errors": self.file_errors,
        })
    }
}

/// Canonical key for the prefetched map
pub(crate) fn prefetch_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Folds per-file results into statistics and the document list
struct Collector<'a> {
    task: &'a Task,
    stats: Arc<StatisticsAggregate>,
    band: ProgressBand,
    total: usize,
    completed: usize,
    documents: Vec<(usize, DocumentEntry)>,
    file_errors: Vec<FileError>,
}

type ItemResult = (usize, DiscoveredFile, Retried<ExtractedDocument>);

impl Collector<'_> {
    fn absorb(&mut self, joined: std::result::Result<ItemResult, tokio::task::JoinError>) {
        self.completed += 1;
        let (index, file, retried) = match joined {
            Ok(item) => item,
            Err(e) => {
                tracing::error!("File worker crashed: {}", e);
                self.stats.increment(StatField::ErrorFiles, 1);
                self.file_errors.push(FileError {
                    file: "<unknown>".to_string(),
                    error: format!("worker crashed: {}", e),
                });
                return;
            }
        };

        let name = file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if retried.retries > 0 {
            self.stats.increment(StatField::RetriedItems, 1);
        }

        match retried.result {
            Ok(doc) => {
                self.stats.increment(StatField::ProcessedFiles, 1);
                self.stats.increment(StatField::TotalBytes, file.size);
                self.stats.increment(StatField::TotalChunks, doc.chunks.len() as u64);
                self.stats
                    .record_largest_file(&file.path.to_string_lossy(), file.size);
                if doc.file_type == FileType::Pdf {
                    self.stats.record_domain_metric(DomainMetric::PdfsProcessed, 1);
                }
                if doc.tables > 0 {
                    self.stats
                        .record_domain_metric(DomainMetric::TablesExtracted, doc.tables);
                }
                if doc.references > 0 {
                    self.stats
                        .record_domain_metric(DomainMetric::ReferencesExtracted, doc.references);
                }
                if doc.scanned_pages > 0 {
                    self.stats
                        .record_domain_metric(DomainMetric::ScannedPages, doc.scanned_pages);
                }
                tracing::debug!("[{}] {} chunks", name, doc.chunks.len());
                self.documents
                    .push((index, DocumentEntry::from_extracted(&file.path, file.size, doc)));
            }
            Err(Error::Cancelled) => {
                self.stats.increment(StatField::SkippedFiles, 1);
            }
            Err(e) => {
                tracing::warn!("[{}] failed: {}", name, e);
                self.stats.increment(StatField::ErrorFiles, 1);
                self.file_errors.push(FileError {
                    file: file.path.to_string_lossy().into_owned(),
                    error: e.to_string(),
                });
            }
        }

        self.task.report_progress(
            self.band.map_counts(self.completed, self.total),
            format!("Processed {}/{}: {}", self.completed, self.total, name),
            None,
        );
    }
}

async fn extract_file(
    path: PathBuf,
    extractor: Arc<dyn Extractor>,
    options: ChunkOptions,
    policy: RetryPolicy,
    cancel: CancellationToken,
) -> Retried<ExtractedDocument> {
    let label = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    policy
        .run(&label, &cancel, |_| {
            let extractor = extractor.clone();
            let path = path.clone();
            let label = label.clone();
            async move {
                tokio::task::spawn_blocking(move || extractor.extract(&path, &options))
                    .await
                    .map_err(|e| Error::file_parse(label, format!("extractor crashed: {}", e)))?
            }
        })
        .await
}

/// Discover, extract and write one artifact; the final step of every task kind
pub(crate) async fn process_directory(
    task: &Arc<Task>,
    ctx: &RunContext,
    mut pass: DirectoryPass,
) -> Result<BulkSummary> {
    task.set_stage("discovery");
    task.report_progress(pass.band.start(), "Discovering files", None);

    let options =
        DiscoveryOptions::from_config(&ctx.config.processing, Some(pass.output_file.clone()))
            .with_pinned(pass.prefetched.keys().cloned());
    let input_dir = pass.input_dir.clone();
    let discovery = tokio::task::spawn_blocking(move || discover_files(&input_dir, &options))
        .await
        .map_err(|e| Error::internal(format!("File discovery crashed: {}", e)))??;

    let stats = task.stats().clone();
    let total = discovery.eligible.len();
    stats.increment(StatField::TotalFiles, (total + discovery.oversized.len()) as u64);
    stats.increment(StatField::SkippedFiles, discovery.oversized.len() as u64);
    tracing::info!(
        "[{}] {} eligible files under {} ({} ignored, {} oversized)",
        task.id(),
        total,
        pass.input_dir.display(),
        discovery.ignored,
        discovery.oversized.len()
    );

    task.set_stage("extract");
    task.report_progress(
        pass.band.start(),
        format!("Found {} files to process", total),
        None,
    );

    let cancel = task.cancellation_token();
    let semaphore = Arc::new(Semaphore::new(ctx.config.processing.workers()));
    let policy = ctx.retry_policy();
    let extractor = ctx.collaborators.extractor.clone();
    let mut set: JoinSet<ItemResult> = JoinSet::new();
    let mut collector = Collector {
        task: task.as_ref(),
        stats: stats.clone(),
        band: pass.band,
        total,
        completed: 0,
        documents: Vec::with_capacity(total),
        file_errors: Vec::new(),
    };

    let mut pending = discovery.eligible.into_iter().enumerate();
    let mut next = pending.next();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled(), if next.is_some() => break,
            Some(joined) = set.join_next(), if !set.is_empty() => collector.absorb(joined),
            permit = semaphore.clone().acquire_owned(), if next.is_some() => {
                let Ok(permit) = permit else { break };
                let Some((index, file)) = next.take() else { continue };
                next = pending.next();

                let prefetched = pass.prefetched.remove(&prefetch_key(&file.path));
                let extractor = extractor.clone();
                let cancel = cancel.clone();
                let options = pass.chunk_options;
                set.spawn(async move {
                    let _permit = permit;
                    let retried = match prefetched {
                        Some(doc) => Retried { result: Ok(doc), retries: 0 },
                        None => extract_file(file.path.clone(), extractor, options, policy, cancel).await,
                    };
                    (index, file, retried)
                });
            }
            else => break,
        }
    }

    // Nothing new starts after cancellation; unstarted files count as skipped
    let unstarted = next.into_iter().chain(pending).count();
    if unstarted > 0 {
        stats.increment(StatField::SkippedFiles, unstarted as u64);
        tracing::info!("[{}] {} files skipped after cancellation", task.id(), unstarted);
    }
    while let Some(joined) = set.join_next().await {
        collector.absorb(joined);
    }

    task.checkpoint()?;

    let Collector {
        mut documents,
        file_errors,
        ..
    } = collector;
    documents.sort_by_key(|(index, _)| *index);
    let documents: Vec<DocumentEntry> = documents.into_iter().map(|(_, d)| d).collect();

    task.set_stage("write");
    task.report_progress(
        pass.band.end().saturating_sub(1).max(pass.band.start()),
        format!("Writing {} documents", documents.len()),
        None,
    );

    let mut metadata = std::mem::take(&mut pass.metadata);
    metadata.insert("task_id".into(), json!(task.id()));
    metadata.insert("kind".into(), json!(task.kind()));
    metadata.insert("created_at".into(), json!(chrono::Utc::now()));
    metadata.insert("document_count".into(), json!(documents.len()));
    metadata.insert("file_errors".into(), json!(file_errors));
    metadata.insert("stats".into(), json!(stats.to_snapshot()));

    let output_file = pass.output_file.clone();
    let document_count = documents.len();
    let write_mode = tokio::task::spawn_blocking(move || {
        write_documents(&output_file, &documents, Value::Object(metadata))
    })
    .await
    .map_err(|e| Error::internal(format!("Artifact writer crashed: {}", e)))??;

    task.report_progress(
        pass.band.end(),
        format!(
            "Wrote {} documents to {}",
            document_count,
            pass.output_file.display()
        ),
        None,
    );

    Ok(BulkSummary {
        documents: document_count,
        file_errors,
        output_file: pass.output_file,
        write_mode,
        ignored_files: discovery.ignored,
        oversized_files: discovery.oversized.len(),
    })
}
