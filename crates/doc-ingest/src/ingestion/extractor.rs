//! Local multi-format extractor

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

use super::chunker::{PageText, TextChunker};
use super::html::extract_html;
use crate::error::{Error, Result};
use crate::types::{ChunkOptions, ExtractedDocument, FileType};

/// Table captions ("Table 3:", "TABLE II.") at line start
static TABLE_CAPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^\s*table\s+([0-9]+|[ivxlc]+)[.:]").unwrap());
/// Markdown table separator rows (`|---|:--:|`)
static MARKDOWN_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\|?\s*:?-{3,}:?\s*(\|\s*:?-{3,}:?\s*)+\|?\s*$").unwrap());
/// Numbered bibliography entries (`[12] Author, ...`)
static REFERENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*\[\d+\]\s+\S").unwrap());
/// Subtitle cue timings and indices
static SUBTITLE_TIMING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d+|\d{1,2}:?\d{2}:\d{2}[.,]\d{3}\s*-->\s*\d{1,2}:?\d{2}:\d{2}[.,]\d{3}.*)\s*$")
        .unwrap()
});
static SUBTITLE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Turns one file on disk into chunked text.
///
/// Extraction is CPU-bound and blocking; callers run it on the blocking pool.
pub trait Extractor: Send + Sync {
    /// Extract and chunk a file
    fn extract(&self, path: &Path, options: &ChunkOptions) -> Result<ExtractedDocument>;

    /// Get extractor name
    fn name(&self) -> &str;
}

/// Extractor for the formats the service reads natively
#[derive(Debug, Clone, Default)]
pub struct LocalExtractor;

impl LocalExtractor {
    pub fn new() -> Self {
        Self
    }

    fn parse_pdf(filename: &str, data: &[u8]) -> Result<Parsed> {
        // pdf-extract panics on some malformed fonts
        let raw = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(data))
            .map_err(|_| Error::file_parse(filename, "PDF extractor panicked"))?
            .map_err(|e| Error::file_parse(filename, e.to_string()))?;

        let mut pages = Vec::new();
        let mut scanned = 0u64;
        let mut offset = 0usize;
        let raw_pages: Vec<&str> = raw.split('\x0c').collect();
        let page_count = raw_pages.len() as u32;

        for (i, page) in raw_pages.into_iter().enumerate() {
            let content = page
                .replace('\0', "")
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            if content.is_empty() {
                scanned += 1;
                continue;
            }
            let len = content.len();
            pages.push(PageText {
                page_number: Some(i as u32 + 1),
                content,
                char_offset: offset,
            });
            offset += len + 1;
        }

        if pages.is_empty() {
            return Err(Error::file_parse(
                filename,
                "No text content could be extracted from PDF",
            ));
        }

        Ok(Parsed {
            title: None,
            pages,
            page_count: Some(page_count),
            scanned_pages: scanned,
            metadata: BTreeMap::new(),
        })
    }

    fn parse_html(data: &[u8]) -> Parsed {
        let html = String::from_utf8_lossy(data);
        let out = extract_html(&html);
        let metadata = out
            .meta
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        Parsed {
            title: out.title,
            pages: vec![PageText::whole(out.text)],
            page_count: None,
            scanned_pages: 0,
            metadata,
        }
    }

    fn parse_json(filename: &str, data: &[u8]) -> Result<Parsed> {
        let value: serde_json::Value = serde_json::from_slice(data)
            .map_err(|e| Error::file_parse(filename, e.to_string()))?;

        let mut lines = Vec::new();
        flatten_strings(&value, "", &mut lines);

        let title = value
            .get("title")
            .and_then(|t| t.as_str())
            .map(str::to_string);

        Ok(Parsed {
            title,
            pages: vec![PageText::whole(lines.join("\n"))],
            page_count: None,
            scanned_pages: 0,
            metadata: BTreeMap::new(),
        })
    }

    fn parse_subtitle(data: &[u8]) -> Parsed {
        let raw = String::from_utf8_lossy(data);
        let mut lines: Vec<String> = Vec::new();
        for line in raw.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty()
                || trimmed == "WEBVTT"
                || trimmed.starts_with("NOTE")
                || trimmed.starts_with("Kind:")
                || trimmed.starts_with("Language:")
                || SUBTITLE_TIMING.is_match(trimmed)
            {
                continue;
            }
            let text = SUBTITLE_TAG.replace_all(trimmed, "").trim().to_string();
            // Auto-generated tracks repeat the previous cue
            if !text.is_empty() && lines.last() != Some(&text) {
                lines.push(text);
            }
        }
        Parsed {
            title: None,
            pages: vec![PageText::whole(lines.join(" "))],
            page_count: None,
            scanned_pages: 0,
            metadata: BTreeMap::new(),
        }
    }

    fn parse_text(data: &[u8], file_type: &FileType) -> Parsed {
        let content = String::from_utf8_lossy(data).replace('\0', "");
        let title = match file_type {
            FileType::Markdown => content
                .lines()
                .find(|l| l.starts_with("# "))
                .map(|l| l.trim_start_matches("# ").trim().to_string()),
            _ => None,
        };
        let mut metadata = BTreeMap::new();
        if let FileType::Code(lang) = file_type {
            metadata.insert("language".to_string(), serde_json::Value::String(lang.clone()));
        }
        Parsed {
            title,
            pages: vec![PageText::whole(content)],
            page_count: None,
            scanned_pages: 0,
            metadata,
        }
    }
}

impl Extractor for LocalExtractor {
    fn extract(&self, path: &Path, options: &ChunkOptions) -> Result<ExtractedDocument> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let file_type = FileType::from_path(path);
        if !file_type.is_supported() {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Err(Error::UnsupportedFileType(format!("{} ({})", filename, ext)));
        }

        let data = std::fs::read(path)?;
        let parsed = match &file_type {
            FileType::Pdf => Self::parse_pdf(&filename, &data)?,
            FileType::Html => Self::parse_html(&data),
            FileType::Json => Self::parse_json(&filename, &data)?,
            FileType::Subtitle => Self::parse_subtitle(&data),
            other => Self::parse_text(&data, other),
        };

        let full_text = parsed
            .pages
            .iter()
            .map(|p| p.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if full_text.trim().is_empty() {
            return Err(Error::file_parse(&filename, "File contains no text"));
        }

        let tables = (TABLE_CAPTION.find_iter(&full_text).count()
            + MARKDOWN_TABLE.find_iter(&full_text).count()) as u64;
        let references = REFERENCE.find_iter(&full_text).count() as u64;
        let content_hash = hex::encode(Sha256::digest(full_text.as_bytes()));

        let chunks = TextChunker::new(*options).chunk_pages(&parsed.pages);
        tracing::debug!("[{}] extracted {} chunks", filename, chunks.len());

        Ok(ExtractedDocument {
            file_type,
            title: parsed.title,
            content_hash,
            chunks,
            page_count: parsed.page_count,
            tables,
            references,
            scanned_pages: parsed.scanned_pages,
            metadata: parsed.metadata,
        })
    }

    fn name(&self) -> &str {
        "local"
    }
}

struct Parsed {
    title: Option<String>,
    pages: Vec<PageText>,
    page_count: Option<u32>,
    scanned_pages: u64,
    metadata: BTreeMap<String, serde_json::Value>,
}

/// Collect `key: value` lines for every string leaf
fn flatten_strings(value: &serde_json::Value, prefix: &str, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => {
            if prefix.is_empty() {
                out.push(s.clone());
            } else {
                out.push(format!("{}: {}", prefix, s));
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                flatten_strings(item, prefix, out);
            }
        }
        serde_json::Value::Object(map) => {
            for (key, item) in map {
                let next = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_strings(item, &next, out);
            }
        }
        _ => {}
    }
}
