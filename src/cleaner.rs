//! Normalization plus fingerprint deduplication of raw records.

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::normalizer::normalize_record;
use crate::records::{CleanedDocument, RawRecord};

/// Characters of normalized text that make up a document's fingerprint.
pub const FINGERPRINT_CHARS: usize = 500;

/// SHA-256 hex digest of the first [`FINGERPRINT_CHARS`] characters of `text`.
pub fn fingerprint(text: &str) -> String {
    let prefix: String = text.chars().take(FINGERPRINT_CHARS).collect();
    format!("{:x}", Sha256::digest(prefix.as_bytes()))
}

/// Normalizes records, dropping empty ones and repeats of an earlier fingerprint.
///
/// Output keeps the first-seen order of the input.
pub fn clean(records: &[RawRecord]) -> Vec<CleanedDocument> {
    let mut seen = HashSet::new();
    let mut documents = Vec::with_capacity(records.len());
    let mut empty = 0usize;

    for record in records {
        let content = normalize_record(record);
        if content.is_empty() {
            empty += 1;
            continue;
        }
        if !seen.insert(fingerprint(&content)) {
            debug!(url = %record.url, "duplicate content dropped");
            continue;
        }
        documents.push(CleanedDocument {
            url: record.url.clone(),
            title: record.title.clone(),
            content,
            crawled_at: record.crawled_at.clone(),
        });
    }

    info!(
        input = records.len(),
        kept = documents.len(),
        empty,
        duplicates = records.len() - documents.len() - empty,
        "cleaned records"
    );
    documents
}
