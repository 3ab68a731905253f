//! Core types for ingestion artifacts

pub mod document;

pub use document::{ChunkOptions, ChunkRecord, DocumentEntry, ExtractedDocument, FileType};
