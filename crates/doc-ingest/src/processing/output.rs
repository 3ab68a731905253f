//! JSON artifact writing with a simplified fallback schema

use serde::Serialize;
use serde_json::{json, Value};
use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::DocumentEntry;

/// Which schema ended up on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    Full,
    Fallback,
}

/// Collection name used as the artifact's top-level key
pub fn collection_name(output_file: &Path) -> String {
    output_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "documents".to_string())
}

/// Serialize `value` and atomically replace `path` with it
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&parent)?;

    let bytes = serde_json::to_vec_pretty(value)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Write `full`; if that fails, write whatever `fallback` builds instead
pub fn write_with_fallback<T, F>(path: &Path, full: &T, fallback: F) -> Result<WriteMode>
where
    T: Serialize + ?Sized,
    F: FnOnce(&Error) -> Value,
{
    let err = match write_json_atomic(path, full) {
        Ok(()) => return Ok(WriteMode::Full),
        Err(e) => e,
    };
    tracing::warn!(
        "Full write of {} failed ({}); retrying with simplified schema",
        path.display(),
        err
    );

    let simplified = fallback(&err);
    write_json_atomic(path, &simplified)
        .map(|_| WriteMode::Fallback)
        .map_err(|e| Error::OutputWrite {
            path: path.display().to_string(),
            message: format!("{} (fallback after: {})", e, err),
        })
}

/// Write the ingestion artifact: `{"<collection>": {"docs_data": [...], "metadata": {...}}}`
pub fn write_documents(
    path: &Path,
    documents: &[DocumentEntry],
    metadata: Value,
) -> Result<WriteMode> {
    let collection = collection_name(path);
    let full = json!({
        collection.clone(): {
            "docs_data": documents,
            "metadata": metadata,
        }
    });

    write_with_fallback(path, &full, |err| {
        let docs: Vec<Value> = documents
            .iter()
            .map(|d| {
                json!({
                    "file_path": d.file_path,
                    "file_name": d.file_name,
                    "content": d
                        .chunks
                        .iter()
                        .map(|c| c.content.as_str())
                        .collect::<Vec<_>>()
                        .join("\n\n"),
                })
            })
            .collect();
        json!({
            collection: {
                "docs_data": docs,
                "metadata": {
                    "fallback": true,
                    "error": err.to_string(),
                    "document_count": documents.len(),
                },
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkRecord, ExtractedDocument, FileType};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn entry(name: &str) -> DocumentEntry {
        DocumentEntry::from_extracted(
            &PathBuf::from(format!("/in/{}", name)),
            5,
            ExtractedDocument {
                file_type: FileType::Txt,
                title: None,
                content_hash: "h".into(),
                chunks: vec![ChunkRecord {
                    index: 0,
                    content: "hello".into(),
                    char_start: 0,
                    char_end: 5,
                    page_number: None,
                }],
                page_count: None,
                tables: 0,
                references: 0,
                scanned_pages: 0,
                metadata: BTreeMap::new(),
            },
        )
    }

    #[test]
    fn test_collection_name_from_stem() {
        assert_eq!(collection_name(Path::new("/out/papers.json")), "papers");
        assert_eq!(collection_name(Path::new("/")), "documents");
    }

    #[test]
    fn test_write_documents_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/run.json");
        let mode = write_documents(&path, &[entry("a.txt"), entry("b.txt")], json!({"k": 1})).unwrap();
        assert_eq!(mode, WriteMode::Full);

        let written: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["run"]["docs_data"].as_array().unwrap().len(), 2);
        assert_eq!(written["run"]["metadata"]["k"], 1);
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("cannot serialize"))
        }
    }

    #[test]
    fn test_fallback_used_when_full_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let mode = write_with_fallback(&path, &Unserializable, |err| {
            json!({"fallback": true, "error": err.to_string()})
        })
        .unwrap();
        assert_eq!(mode, WriteMode::Fallback);
        let written: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["fallback"], true);
    }

    #[test]
    fn test_both_writes_failing_is_output_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in the way of the target file
        let path = dir.path().join("taken");
        std::fs::create_dir(&path).unwrap();
        let err = write_with_fallback(&path, &json!({}), |_| json!({})).unwrap_err();
        assert!(matches!(err, Error::OutputWrite { .. }));
    }
}
