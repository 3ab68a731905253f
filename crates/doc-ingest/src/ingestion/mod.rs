//! File discovery, text extraction and chunking

mod chunker;
pub mod discovery;
mod extractor;
pub mod html;

pub use chunker::{PageText, TextChunker};
pub use discovery::{discover_files, DiscoveredFile, Discovery, DiscoveryOptions};
pub use extractor::{Extractor, LocalExtractor};
pub use html::{extract_html, HtmlText};
