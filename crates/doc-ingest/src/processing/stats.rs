//! Thread-safe statistics aggregate for a task

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Longest duration a snapshot will report
const MAX_DURATION_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// Plain counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatField {
    TotalFiles,
    ProcessedFiles,
    SkippedFiles,
    ErrorFiles,
    TotalBytes,
    TotalChunks,
    RetriedItems,
}

/// Domain-specific counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainMetric {
    PdfsProcessed,
    TablesExtracted,
    ReferencesExtracted,
    ScannedPages,
    Custom(String),
}

/// Largest file seen so far
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargestFile {
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total_files: u64,
    processed_files: u64,
    skipped_files: u64,
    error_files: u64,
    total_bytes: u64,
    total_chunks: u64,
    retried_items: u64,
    largest_file: Option<LargestFile>,
    pdfs_processed: u64,
    tables_extracted: u64,
    references_extracted: u64,
    scanned_pages: u64,
    custom: BTreeMap<String, u64>,
    end_time: Option<DateTime<Utc>>,
}

/// Counters describing a task's work, safe to update from many workers
#[derive(Debug)]
pub struct StatisticsAggregate {
    start_time: DateTime<Utc>,
    counters: Mutex<Counters>,
}

impl Default for StatisticsAggregate {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsAggregate {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Aggregate with an explicit start timestamp
    pub fn starting_at(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn increment(&self, field: StatField, n: u64) {
        let mut c = self.counters.lock();
        let slot = match field {
            StatField::TotalFiles => &mut c.total_files,
            StatField::ProcessedFiles => &mut c.processed_files,
            StatField::SkippedFiles => &mut c.skipped_files,
            StatField::ErrorFiles => &mut c.error_files,
            StatField::TotalBytes => &mut c.total_bytes,
            StatField::TotalChunks => &mut c.total_chunks,
            StatField::RetriedItems => &mut c.retried_items,
        };
        *slot = slot.saturating_add(n);
    }

    /// Keep the largest file; ties keep the first one seen
    pub fn record_largest_file(&self, path: &str, size: u64) {
        let mut c = self.counters.lock();
        let replace = c.largest_file.as_ref().map(|l| size > l.size).unwrap_or(true);
        if replace {
            c.largest_file = Some(LargestFile {
                path: path.to_string(),
                size,
            });
        }
    }

    pub fn record_domain_metric(&self, metric: DomainMetric, n: u64) {
        let mut c = self.counters.lock();
        match metric {
            DomainMetric::PdfsProcessed => c.pdfs_processed = c.pdfs_processed.saturating_add(n),
            DomainMetric::TablesExtracted => {
                c.tables_extracted = c.tables_extracted.saturating_add(n)
            }
            DomainMetric::ReferencesExtracted => {
                c.references_extracted = c.references_extracted.saturating_add(n)
            }
            DomainMetric::ScannedPages => c.scanned_pages = c.scanned_pages.saturating_add(n),
            DomainMetric::Custom(name) => {
                let slot = c.custom.entry(name).or_insert(0);
                *slot = slot.saturating_add(n);
            }
        }
    }

    /// Freeze the duration; later calls keep the first end time
    pub fn mark_finished(&self) {
        let mut c = self.counters.lock();
        if c.end_time.is_none() {
            c.end_time = Some(Utc::now());
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Serializable view with derived rates, computed now
    pub fn to_snapshot(&self) -> StatsSnapshot {
        let c = self.counters.lock();
        let end = c.end_time.unwrap_or_else(Utc::now);
        let duration_secs = clamp_duration(
            (end - self.start_time).num_milliseconds() as f64 / 1000.0,
        );

        let attempted = c.processed_files + c.error_files;
        let success_rate = ratio(c.processed_files as f64 * 100.0, attempted as f64);

        StatsSnapshot {
            total_files: c.total_files,
            processed_files: c.processed_files,
            skipped_files: c.skipped_files,
            error_files: c.error_files,
            total_bytes: c.total_bytes,
            total_chunks: c.total_chunks,
            retried_items: c.retried_items,
            largest_file: c.largest_file.clone(),
            pdfs_processed: c.pdfs_processed,
            tables_extracted: c.tables_extracted,
            references_extracted: c.references_extracted,
            scanned_pages: c.scanned_pages,
            custom: c.custom.clone(),
            start_time: self.start_time,
            end_time: c.end_time,
            duration_secs,
            success_rate,
            files_per_second: ratio(c.processed_files as f64, duration_secs),
            bytes_per_second: ratio(c.total_bytes as f64, duration_secs),
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator <= 0.0 || !denominator.is_finite() {
        0.0
    } else {
        numerator / denominator
    }
}

fn clamp_duration(secs: f64) -> f64 {
    if secs < 0.0 {
        tracing::warn!("Negative task duration ({:.3}s), clock moved backwards; clamping to 0", secs);
        0.0
    } else if secs > MAX_DURATION_SECS {
        tracing::warn!("Implausible task duration ({:.0}s); clamping to 7 days", secs);
        MAX_DURATION_SECS
    } else {
        secs
    }
}

/// Point-in-time statistics, as carried by progress events and status polls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_files: u64,
    pub processed_files: u64,
    pub skipped_files: u64,
    pub error_files: u64,
    pub total_bytes: u64,
    pub total_chunks: u64,
    pub retried_items: u64,
    pub largest_file: Option<LargestFile>,
    pub pdfs_processed: u64,
    pub tables_extracted: u64,
    pub references_extracted: u64,
    pub scanned_pages: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, u64>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    /// Percent of attempted files that succeeded
    pub success_rate: f64,
    pub files_per_second: f64,
    pub bytes_per_second: f64,
}

impl StatsSnapshot {
    /// Files whose fate is decided
    pub fn accounted_files(&self) -> u64 {
        self.processed_files + self.skipped_files + self.error_files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    #[test]
    fn test_increments_and_derived_fields() {
        let stats = StatisticsAggregate::starting_at(Utc::now() - Duration::seconds(10));
        stats.increment(StatField::TotalFiles, 4);
        stats.increment(StatField::ProcessedFiles, 3);
        stats.increment(StatField::ErrorFiles, 1);
        stats.increment(StatField::TotalBytes, 3000);
        stats.mark_finished();

        let snap = stats.to_snapshot();
        assert_eq!(snap.accounted_files(), 4);
        assert!((snap.success_rate - 75.0).abs() < 1e-9);
        assert!(snap.duration_secs >= 10.0 && snap.duration_secs < 11.0);
        assert!(snap.files_per_second > 0.25 && snap.files_per_second <= 0.3);
        assert!(snap.bytes_per_second > 250.0);
    }

    #[test]
    fn test_zero_counts_give_zero_rates() {
        let stats = StatisticsAggregate::new();
        stats.mark_finished();
        let snap = stats.to_snapshot();
        assert_eq!(snap.success_rate, 0.0);
        assert_eq!(snap.files_per_second, 0.0);
        assert_eq!(snap.bytes_per_second, 0.0);
    }

    #[test]
    fn test_duration_is_clamped() {
        let future = StatisticsAggregate::starting_at(Utc::now() + Duration::hours(1));
        assert_eq!(future.to_snapshot().duration_secs, 0.0);

        let ancient = StatisticsAggregate::starting_at(Utc::now() - Duration::days(30));
        assert_eq!(ancient.to_snapshot().duration_secs, MAX_DURATION_SECS);
    }

    #[test]
    fn test_largest_file_and_domain_metrics() {
        let stats = StatisticsAggregate::new();
        stats.record_largest_file("a.txt", 10);
        stats.record_largest_file("b.pdf", 500);
        stats.record_largest_file("c.txt", 20);
        stats.record_domain_metric(DomainMetric::PdfsProcessed, 1);
        stats.record_domain_metric(DomainMetric::TablesExtracted, 3);
        stats.record_domain_metric(DomainMetric::Custom("subtitles".into()), 2);
        stats.record_domain_metric(DomainMetric::Custom("subtitles".into()), 1);

        let snap = stats.to_snapshot();
        assert_eq!(snap.largest_file.unwrap().path, "b.pdf");
        assert_eq!(snap.pdfs_processed, 1);
        assert_eq!(snap.tables_extracted, 3);
        assert_eq!(snap.custom.get("subtitles"), Some(&3));
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let stats = StatisticsAggregate::new();
        stats.increment(StatField::TotalFiles, 1);
        let a = stats.to_snapshot();
        let b = stats.to_snapshot();
        assert_eq!(a.total_files, b.total_files);
        assert!(a.end_time.is_none() && b.end_time.is_none());
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let stats = Arc::new(StatisticsAggregate::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.increment(StatField::ProcessedFiles, 1);
                        stats.increment(StatField::TotalChunks, 2);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = stats.to_snapshot();
        assert_eq!(snap.processed_files, 8000);
        assert_eq!(snap.total_chunks, 16000);
    }
}
