//! Recursive, separator-aware text splitting with overlap.
//!
//! Text is split on the coarsest separator present; pieces that are still too long are
//! split again with the next separator, down to single characters. Adjacent small pieces
//! are then merged greedily into chunks, carrying up to `overlap` characters of the
//! previous chunk into the next. Separators stay attached to the start of the piece that
//! follows them. All lengths are counted in characters.

use tracing::{debug, warn};

use crate::records::{Chunk, ChunkMetadata, CleanedDocument};

/// Default maximum chunk length.
pub const DEFAULT_CHUNK_SIZE: usize = 700;
/// Default overlap between consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 120;

const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

/// Splits text into bounded, overlapping chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl TextSplitter {
    /// Creates a splitter; the overlap is clamped below the chunk size.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let clamped = chunk_overlap.min(chunk_size - 1);
        if clamped != chunk_overlap {
            warn!(chunk_size, chunk_overlap, "overlap clamped below chunk size");
        }
        Self {
            chunk_size,
            chunk_overlap: clamped,
        }
    }

    /// Maximum characters per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Splits `text` into trimmed, non-empty chunks of at most `chunk_size` characters.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = "";
        let mut finer: &[&str] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() || text.contains(candidate) {
                separator = candidate;
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge(&pending));
                pending.clear();
            }
            if finer.is_empty() {
                chunks.push(piece.trim().to_string());
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }
        if !pending.is_empty() {
            chunks.extend(self.merge(&pending));
        }
        chunks.retain(|chunk| !chunk.is_empty());
        chunks
    }

    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: Vec<(&str, usize)> = Vec::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_trimmed(&mut chunks, &window);
                while total > self.chunk_overlap
                    || (total + len > self.chunk_size && total > 0)
                {
                    let (_, dropped) = window.remove(0);
                    total -= dropped;
                }
            }
            window.push((piece, len));
            total += len;
        }
        push_trimmed(&mut chunks, &window);
        chunks
    }
}

fn push_trimmed(chunks: &mut Vec<String>, window: &[(&str, usize)]) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Splits on `separator`, attaching each separator to the start of the following piece.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, ch)| &text[i..i + ch.len_utf8()])
            .collect();
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        pieces.push(&text[start..idx]);
        start = idx;
    }
    pieces.push(&text[start..]);
    pieces.retain(|piece| !piece.is_empty());
    pieces
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits every document and attaches per-document chunk metadata.
pub fn chunk_documents(
    documents: &[CleanedDocument],
    run_id: &str,
    splitter: &TextSplitter,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for document in documents {
        let pieces = splitter.split(&document.content);
        let total = pieces.len();
        debug!(url = %document.url, chunks = total, "split document");
        chunks.extend(pieces.into_iter().enumerate().map(|(index, page_content)| Chunk {
            page_content,
            metadata: ChunkMetadata {
                source: document.url.clone(),
                title: document.title.clone(),
                run_id: run_id.to_string(),
                chunk_index: index,
                chunks_total: total,
                crawled_at: document.crawled_at.clone(),
            },
        }));
    }
    chunks
}
