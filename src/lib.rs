#![warn(missing_docs)]
//! Topic-scoped crawler that turns a bounded web corpus into a persisted vector index.
//!
//! A run crawls (or loads) raw pages, optionally appends linked PDF text, cleans and
//! deduplicates, chunks, embeds, and commits an incremental snapshot that always
//! carries exactly one manual fact record.

pub mod chunker;
pub mod cleaner;
pub mod controls;
pub mod crawler;
pub mod embedder;
pub mod error;
pub mod frontier;
pub mod html;
pub mod index;
pub mod normalizer;
pub mod pdf;
pub mod pipeline;
pub mod records;
pub mod robots;
pub mod seeds;
pub mod storage;
pub mod vector_store;

pub use chunker::{chunk_documents, TextSplitter};
pub use cleaner::clean;
pub use controls::{Cli, CrawlControls, EmbeddingArgs, EmbeddingProvider};
pub use crawler::{CrawlOutcome, Crawler, HttpFetcher, PageFetcher, StopReason};
pub use embedder::{AnyEmbedder, EmbedError, EmbeddingBackend, EmbeddingClient};
pub use error::PipelineError;
pub use frontier::{Frontier, FrontierError};
pub use index::{IndexError, IndexManager, RebuildReport};
pub use pdf::PdfAugmenter;
pub use pipeline::{new_run_id, CorpusInput, Pipeline, RunSummary};
pub use records::{Chunk, ChunkMetadata, CleanedDocument, RawRecord};
pub use seeds::{DuckDuckGoSearch, SearchProvider, SeedSet};
pub use storage::RunLayout;
pub use vector_store::{IndexSnapshot, SnapshotStore};
