//! Text chunking with page and position tracking

use unicode_segmentation::UnicodeSegmentation;

use crate::types::{ChunkOptions, ChunkRecord};

/// Text of one page (or the whole document when unpaginated)
#[derive(Debug, Clone)]
pub struct PageText {
    /// Page number (1-indexed), None for unpaginated text
    pub page_number: Option<u32>,
    pub content: String,
    /// Character offset in full document
    pub char_offset: usize,
}

impl PageText {
    pub fn whole(content: impl Into<String>) -> Self {
        Self {
            page_number: None,
            content: content.into(),
            char_offset: 0,
        }
    }
}

/// Text chunker with configurable size and overlap
pub struct TextChunker {
    /// Target chunk size in characters
    chunk_size: usize,
    /// Overlap between chunks
    overlap: usize,
    /// Minimum chunk size
    min_size: usize,
}

impl TextChunker {
    /// Create a new chunker
    pub fn new(options: ChunkOptions) -> Self {
        let chunk_size = options.chunk_size.max(1);
        Self {
            chunk_size,
            overlap: options.chunk_overlap.min(chunk_size.saturating_sub(1)),
            min_size: options.min_chunk_size,
        }
    }

    /// Chunk a sequence of pages; indices run across the whole document
    pub fn chunk_pages(&self, pages: &[PageText]) -> Vec<ChunkRecord> {
        let mut chunks = Vec::new();
        for page in pages {
            let start_index = chunks.len() as u32;
            let page_chunks = self.chunk_text(
                &page.content,
                page.page_number,
                page.char_offset,
                start_index,
            );
            chunks.extend(page_chunks);
        }

        // A short document still yields one chunk
        if chunks.is_empty() {
            if let Some(page) = pages.iter().find(|p| !p.content.trim().is_empty()) {
                chunks.push(ChunkRecord {
                    index: 0,
                    content: page.content.trim().to_string(),
                    char_start: page.char_offset,
                    char_end: page.char_offset + page.content.len(),
                    page_number: page.page_number,
                });
            }
        }

        chunks
    }

    /// Chunk text with source information
    fn chunk_text(
        &self,
        text: &str,
        page_number: Option<u32>,
        base_offset: usize,
        start_index: u32,
    ) -> Vec<ChunkRecord> {
        let mut chunks = Vec::new();
        let pieces = self.split_into_pieces(text);

        let mut current_chunk = String::new();
        let mut current_start = 0usize;
        let mut chunk_index = start_index;
        let mut char_pos = 0usize;

        for piece in pieces {
            let piece_len = piece.len();

            // If adding this piece exceeds chunk size, save current chunk
            if !current_chunk.is_empty() && current_chunk.len() + piece_len > self.chunk_size {
                if current_chunk.trim().len() >= self.min_size {
                    chunks.push(ChunkRecord {
                        index: chunk_index,
                        content: current_chunk.trim().to_string(),
                        char_start: base_offset + current_start,
                        char_end: base_offset + char_pos,
                        page_number,
                    });
                    chunk_index += 1;
                }

                // Start new chunk with overlap
                let overlap_text = self.get_overlap_text(&current_chunk);
                current_start = char_pos.saturating_sub(overlap_text.len());
                current_chunk = overlap_text;
            }

            current_chunk.push_str(piece);
            char_pos += piece_len;
        }

        if current_chunk.trim().len() >= self.min_size {
            chunks.push(ChunkRecord {
                index: chunk_index,
                content: current_chunk.trim().to_string(),
                char_start: base_offset + current_start,
                char_end: base_offset + char_pos,
                page_number,
            });
        }

        chunks
    }

    /// Split text into sentences, breaking sentences longer than a chunk at word bounds
    fn split_into_pieces<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut pieces = Vec::new();
        for sentence in text.split_sentence_bounds() {
            if sentence.len() <= self.chunk_size {
                pieces.push(sentence);
                continue;
            }
            let mut start = 0usize;
            let mut last_break = 0usize;
            for (idx, word) in sentence.split_word_bound_indices() {
                let end = idx + word.len();
                if end - start > self.chunk_size && last_break > start {
                    pieces.push(&sentence[start..last_break]);
                    start = last_break;
                }
                last_break = end;
            }
            if start < sentence.len() {
                pieces.push(&sentence[start..]);
            }
        }
        pieces
    }

    /// Get overlap text from the end of a chunk
    fn get_overlap_text(&self, text: &str) -> String {
        if self.overlap == 0 {
            return String::new();
        }
        if text.len() <= self.overlap {
            return text.to_string();
        }

        let mut start = text.len().saturating_sub(self.overlap);

        // Ensure we're at a valid UTF-8 character boundary
        while start > 0 && !text.is_char_boundary(start) {
            start -= 1;
        }

        let overlap_text = &text[start..];

        // Try to start at a sentence boundary
        if let Some(pos) = overlap_text.find(". ") {
            return overlap_text[pos + 2..].to_string();
        }

        // Fall back to word boundary
        if let Some(pos) = overlap_text.find(' ') {
            return overlap_text[pos + 1..].to_string();
        }

        overlap_text.to_string()
    }
}
