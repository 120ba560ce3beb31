//! Run-level error type returned by the pipeline orchestrator.

use std::path::PathBuf;

use crate::index::IndexError;

/// Failures that abort an ingestion run.
///
/// Per-item failures (one page, one search query, one PDF) never surface here; their
/// stages log and drop them.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Missing file, credential, or incompatible flags; raised before network I/O.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Reading or writing a run artifact failed.
    #[error("io error on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A JSONL line could not be decoded or encoded.
    #[error("invalid record at {path}:{line}: {source}")]
    Json {
        /// File involved.
        path: PathBuf,
        /// One-based line number (0 when writing).
        line: usize,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Embedding, loading, backing up, or committing the snapshot failed.
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
