//! Document and chunk types written into ingestion artifacts

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

use crate::config::ChunkingConfig;

/// Supported file types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// PDF document
    Pdf,
    /// Plain text file
    Txt,
    /// Markdown file
    Markdown,
    /// HTML document
    Html,
    /// CSV file
    Csv,
    /// JSON document (scraped metadata, playlist info files)
    Json,
    /// Subtitle track (.vtt, .srt)
    Subtitle,
    /// Source code file with language
    Code(String),
    /// Unknown file type
    Unknown,
}

impl FileType {
    /// Detect file type from extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "txt" | "text" => Self::Txt,
            "md" | "markdown" => Self::Markdown,
            "html" | "htm" => Self::Html,
            "csv" => Self::Csv,
            "json" => Self::Json,
            "vtt" | "srt" => Self::Subtitle,
            "rs" => Self::Code("rust".to_string()),
            "py" => Self::Code("python".to_string()),
            "js" => Self::Code("javascript".to_string()),
            "ts" => Self::Code("typescript".to_string()),
            "go" => Self::Code("go".to_string()),
            "java" => Self::Code("java".to_string()),
            "cpp" | "cc" | "cxx" => Self::Code("cpp".to_string()),
            "c" | "h" => Self::Code("c".to_string()),
            "sh" | "bash" => Self::Code("bash".to_string()),
            "sql" => Self::Code("sql".to_string()),
            "yaml" | "yml" => Self::Code("yaml".to_string()),
            "xml" => Self::Code("xml".to_string()),
            "toml" => Self::Code("toml".to_string()),
            _ => Self::Unknown,
        }
    }

    /// Detect file type from a path's extension
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown)
    }

    /// Check if this is a supported file type
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Get display name
    pub fn display_name(&self) -> &str {
        match self {
            Self::Pdf => "PDF",
            Self::Txt => "Text File",
            Self::Markdown => "Markdown",
            Self::Html => "HTML",
            Self::Csv => "CSV",
            Self::Json => "JSON",
            Self::Subtitle => "Subtitles",
            Self::Code(lang) => lang.as_str(),
            Self::Unknown => "Unknown",
        }
    }
}

/// Chunking options passed to extractors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOptions {
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Overlap between chunks
    pub chunk_overlap: usize,
    /// Minimum chunk size
    pub min_chunk_size: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        ChunkingConfig::default().into()
    }
}

impl From<ChunkingConfig> for ChunkOptions {
    fn from(config: ChunkingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            min_chunk_size: config.min_chunk_size,
        }
    }
}

/// A chunk of text from a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Chunk index within document
    pub index: u32,
    /// Text content
    pub content: String,
    /// Character position in original document
    pub char_start: usize,
    pub char_end: usize,
    /// Page number (1-indexed, for PDF)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

/// Output of an extractor for one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub file_type: FileType,
    /// Document title when the format carries one
    pub title: Option<String>,
    /// SHA-256 of the extracted text
    pub content_hash: String,
    pub chunks: Vec<ChunkRecord>,
    pub page_count: Option<u32>,
    /// Heuristic count of tables found
    pub tables: u64,
    /// Heuristic count of bibliography references found
    pub references: u64,
    /// Pages with no extractable text (image-only)
    pub scanned_pages: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ExtractedDocument {
    pub fn total_chars(&self) -> usize {
        self.chunks.iter().map(|c| c.content.len()).sum()
    }
}

/// One `docs_data` entry in the output artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub id: Uuid,
    pub file_path: String,
    pub file_name: String,
    pub file_type: FileType,
    pub file_size: u64,
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    pub chunk_count: usize,
    pub chunks: Vec<ChunkRecord>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub processed_at: chrono::DateTime<chrono::Utc>,
}

impl DocumentEntry {
    /// Build an entry from an extraction result
    pub fn from_extracted(path: &Path, file_size: u64, extracted: ExtractedDocument) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            id: Uuid::new_v4(),
            file_path: path.to_string_lossy().into_owned(),
            file_name,
            file_type: extracted.file_type,
            file_size,
            content_hash: extracted.content_hash,
            title: extracted.title,
            page_count: extracted.page_count,
            chunk_count: extracted.chunks.len(),
            chunks: extracted.chunks,
            metadata: extracted.metadata,
            processed_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_file_type_detection() {
        assert_eq!(FileType::from_extension("PDF"), FileType::Pdf);
        assert_eq!(FileType::from_extension("vtt"), FileType::Subtitle);
        assert_eq!(FileType::from_extension("rs"), FileType::Code("rust".to_string()));
        assert_eq!(FileType::from_path(Path::new("a/b/notes.md")), FileType::Markdown);
        assert_eq!(FileType::from_path(Path::new("Makefile")), FileType::Unknown);
        assert!(!FileType::Unknown.is_supported());
    }

    #[test]
    fn test_entry_from_extracted() {
        let extracted = ExtractedDocument {
            file_type: FileType::Txt,
            title: None,
            content_hash: "abc".to_string(),
            chunks: vec![ChunkRecord {
                index: 0,
                content: "hello world".to_string(),
                char_start: 0,
                char_end: 11,
                page_number: None,
            }],
            page_count: None,
            tables: 0,
            references: 0,
            scanned_pages: 0,
            metadata: BTreeMap::new(),
        };
        let entry = DocumentEntry::from_extracted(&PathBuf::from("/tmp/in/a.txt"), 11, extracted);
        assert_eq!(entry.file_name, "a.txt");
        assert_eq!(entry.chunk_count, 1);

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["file_type"], "txt");
        assert!(json.get("page_count").is_none());
    }
}
