//! Batch orchestration: crawl or load, augment, clean, chunk, and rebuild the index.

use std::path::PathBuf;

use chrono::Utc;
use tracing::info;

use crate::chunker::{chunk_documents, TextSplitter};
use crate::cleaner::clean;
use crate::crawler::{Crawler, PageFetcher, StopReason};
use crate::embedder::EmbeddingBackend;
use crate::error::PipelineError;
use crate::index::{IndexManager, RebuildReport};
use crate::pdf::PdfAugmenter;
use crate::records::RawRecord;
use crate::seeds::SeedSet;
use crate::storage::{load_raw_records, write_jsonl, RunLayout};

/// Run identifier in `YYYYMMDDHHMMSS` (UTC) form.
pub fn new_run_id() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// Where a run's raw records come from.
#[derive(Debug)]
pub enum CorpusInput {
    /// Crawl live from the given seeds.
    Crawl(SeedSet),
    /// Reuse a raw JSONL file from an earlier crawl.
    Prefetched(PathBuf),
    /// Skip ingestion and only refresh the fact record in the index.
    FactOnly,
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Run identifier.
    pub run_id: String,
    /// Raw records crawled or loaded.
    pub raw_records: usize,
    /// PDFs appended to records.
    pub pdfs_attached: usize,
    /// Records kept by the cleaner.
    pub documents: usize,
    /// Chunks produced.
    pub chunks: usize,
    /// Why the crawl stopped, for live crawls.
    pub crawl_stop: Option<StopReason>,
    /// Index rebuild outcome.
    pub index: RebuildReport,
}

/// Stages wired together for one ingestion run.
pub struct Pipeline<F, B> {
    crawler: Crawler<F>,
    augmenter: Option<PdfAugmenter>,
    index: IndexManager<B>,
    layout: RunLayout,
    splitter: TextSplitter,
}

impl<F: PageFetcher, B: EmbeddingBackend> Pipeline<F, B> {
    /// Assembles a pipeline without PDF augmentation.
    pub fn new(
        crawler: Crawler<F>,
        index: IndexManager<B>,
        layout: RunLayout,
        splitter: TextSplitter,
    ) -> Self {
        Self {
            crawler,
            augmenter: None,
            index,
            layout,
            splitter,
        }
    }

    /// Enables PDF augmentation of raw records.
    pub fn with_pdf_augmenter(mut self, augmenter: PdfAugmenter) -> Self {
        self.augmenter = Some(augmenter);
        self
    }

    /// Runs every stage in order; each consumes the full output of the previous one.
    pub async fn run(&mut self, input: CorpusInput) -> Result<RunSummary, PipelineError> {
        let run_id = self.layout.run_id().to_string();

        let (mut records, crawl_stop) = match input {
            CorpusInput::FactOnly => {
                info!(run_id = %run_id, "refreshing fact record only");
                let index = self.index.rebuild(Vec::new(), &run_id).await?;
                return Ok(RunSummary {
                    run_id,
                    raw_records: 0,
                    pdfs_attached: 0,
                    documents: 0,
                    chunks: 0,
                    crawl_stop: None,
                    index,
                });
            }
            CorpusInput::Prefetched(path) => {
                self.layout.ensure_dirs()?;
                (load_raw_records(&path, &run_id)?, None)
            }
            CorpusInput::Crawl(seeds) => {
                self.layout.ensure_dirs()?;
                info!(run_id = %run_id, seeds = seeds.len(), "starting crawl");
                let outcome = self.crawler.crawl(seeds.as_slice()).await;
                if !outcome.records.is_empty() {
                    write_jsonl(&self.layout.raw_path(), &outcome.records)?;
                }
                (outcome.records, Some(outcome.stop))
            }
        };

        let pdfs_attached = match self.augmenter.as_mut() {
            Some(augmenter) => augmenter.augment(&mut records).await,
            None => 0,
        };

        let summary = self.process(&records, &run_id).await?;
        Ok(RunSummary {
            pdfs_attached,
            crawl_stop,
            ..summary
        })
    }

    async fn process(&self, records: &[RawRecord], run_id: &str) -> Result<RunSummary, PipelineError> {
        let documents = clean(records);
        write_jsonl(&self.layout.clean_path(), &documents)?;

        let chunks = chunk_documents(&documents, run_id, &self.splitter);
        write_jsonl(&self.layout.chunks_path(), &chunks)?;
        info!(documents = documents.len(), chunks = chunks.len(), "prepared chunks");

        let chunk_count = chunks.len();
        let index = self.index.rebuild(chunks, run_id).await?;
        Ok(RunSummary {
            run_id: run_id.to_string(),
            raw_records: records.len(),
            pdfs_attached: 0,
            documents: documents.len(),
            chunks: chunk_count,
            crawl_stop: None,
            index,
        })
    }
}
