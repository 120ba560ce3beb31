//! Record types that flow between pipeline stages and land in JSONL files.

use serde::{Deserialize, Serialize};

/// Source tag carried by the synthetic fact record.
pub const MANUAL_SOURCE: &str = "manual_entry";

/// One fetched page, exactly as harvested by the crawler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Page URL; identity key of the record.
    pub url: String,
    /// Document title (`"Unknown"` when the page had none).
    pub title: String,
    /// Raw HTML body.
    pub html: String,
    /// Markdown rendering of the body, extended by PDF augmentation.
    pub markdown: String,
    /// RFC 3339 timestamp of the fetch.
    pub crawled_at: String,
    /// Outbound links in document order.
    pub links: Vec<String>,
    #[serde(skip)]
    attachments: Vec<String>,
}

impl RawRecord {
    /// Builds a record with no augmented attachments.
    pub fn new(
        url: String,
        title: String,
        html: String,
        markdown: String,
        crawled_at: String,
        links: Vec<String>,
    ) -> Self {
        Self {
            url,
            title,
            html,
            markdown,
            crawled_at,
            links,
            attachments: Vec::new(),
        }
    }

    /// Appends extracted binary-document text to the markdown field.
    pub fn append_attachment(&mut self, text: &str) {
        self.markdown.push('\n');
        self.markdown.push_str(text);
        self.attachments.push(text.to_string());
    }

    /// Texts appended by [`RawRecord::append_attachment`] during this run.
    pub fn attachments(&self) -> &[String] {
        &self.attachments
    }

    /// Bytes of page content held by the record.
    pub fn content_bytes(&self) -> usize {
        self.html.len() + self.markdown.len()
    }
}

/// Normalized, deduplicated page text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanedDocument {
    /// Source URL.
    pub url: String,
    /// Document title.
    pub title: String,
    /// Whitespace-collapsed plain text.
    pub content: String,
    /// Fetch timestamp carried over from the raw record.
    pub crawled_at: String,
}

/// Retrieval metadata attached to every chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Source URL (or [`MANUAL_SOURCE`] for injected facts).
    pub source: String,
    /// Title of the owning document.
    pub title: String,
    /// Run identifier that produced the chunk.
    pub run_id: String,
    /// Zero-based position inside the owning document.
    pub chunk_index: usize,
    /// Number of chunks the owning document was split into.
    pub chunks_total: usize,
    /// Fetch timestamp of the owning document.
    pub crawled_at: String,
}

/// Retrieval-sized passage plus its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Passage text submitted to the embedding model.
    pub page_content: String,
    /// Provenance metadata.
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Builds the synthetic fact chunk injected on every rebuild.
    pub fn manual_fact(text: &str, title: &str, run_id: &str, crawled_at: &str) -> Self {
        Self {
            page_content: text.to_string(),
            metadata: ChunkMetadata {
                source: MANUAL_SOURCE.to_string(),
                title: title.to_string(),
                run_id: run_id.to_string(),
                chunk_index: 0,
                chunks_total: 1,
                crawled_at: crawled_at.to_string(),
            },
        }
    }

    /// True for injected fact records.
    pub fn is_manual(&self) -> bool {
        self.metadata.source == MANUAL_SOURCE
    }
}
