use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use kbcrawl::chunker::TextSplitter;
use kbcrawl::controls::Cli;
use kbcrawl::crawler::{Crawler, HttpFetcher};
use kbcrawl::embedder::{AnyEmbedder, EmbeddingClient};
use kbcrawl::index::IndexManager;
use kbcrawl::pdf::PdfAugmenter;
use kbcrawl::pipeline::{new_run_id, CorpusInput, Pipeline, RunSummary};
use kbcrawl::seeds::{
    expand_with_search, resolve_seeds, DuckDuckGoSearch, DEFAULT_SEARCH_QUERIES, SEED_URLS,
};
use kbcrawl::storage::RunLayout;
use kbcrawl::vector_store::SnapshotStore;
use tokio::runtime::Builder;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(15);

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    cli.validate()?;

    // Seed files are resolved here so a bad path fails before any request goes out.
    let input = if cli.fact_only {
        CorpusInput::FactOnly
    } else if cli.skip_crawl {
        CorpusInput::Prefetched(
            cli.raw_path
                .clone()
                .context("--skip-crawl requires --raw-path")?,
        )
    } else {
        CorpusInput::Crawl(resolve_seeds(
            SEED_URLS,
            cli.seed_file.as_deref(),
            cli.max_queue,
        )?)
    };

    let rt = Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let summary = rt.block_on(run(&cli, input))?;

    info!(
        run_id = %summary.run_id,
        raw = summary.raw_records,
        pdfs = summary.pdfs_attached,
        documents = summary.documents,
        chunks = summary.chunks,
        stop = ?summary.crawl_stop,
        mode = ?summary.index.mode,
        embedded = summary.index.embedded,
        skipped = summary.index.skipped_existing,
        total = summary.index.total_entries,
        "ingestion finished"
    );
    Ok(())
}

async fn run(cli: &Cli, input: CorpusInput) -> Result<RunSummary> {
    let input = match input {
        CorpusInput::Crawl(mut seeds) if cli.use_search => {
            let search =
                DuckDuckGoSearch::new(SEARCH_TIMEOUT).context("failed to build search client")?;
            expand_with_search(&mut seeds, &search, DEFAULT_SEARCH_QUERIES, cli.search_results)
                .await;
            CorpusInput::Crawl(seeds)
        }
        other => other,
    };

    let run_id = new_run_id();
    let layout = RunLayout::new(&cli.data_dir, &cli.corpus, &run_id);
    let controls = cli.build_controls();
    let fetcher = HttpFetcher::new(&controls).context("failed to build page fetcher")?;
    let crawler = Crawler::new(fetcher, controls);

    let backend = AnyEmbedder::from_args(&cli.embedding).context("failed to build embedder")?;
    let client = EmbeddingClient::new(backend, cli.embedding.embedding_batch);
    let index = IndexManager::new(SnapshotStore::new(&cli.index_dir), client)
        .with_fact(cli.fact_text.clone(), cli.fact_title.clone());

    let splitter = TextSplitter::new(cli.chunk_size, cli.chunk_overlap);
    let binary_dir = layout.binary_dir();
    let mut pipeline = Pipeline::new(crawler, index, layout, splitter);
    if cli.include_pdfs {
        let augmenter = PdfAugmenter::new(binary_dir, cli.max_pdf_bytes)
            .context("failed to build pdf augmenter")?;
        pipeline = pipeline.with_pdf_augmenter(augmenter);
    }

    info!(run_id = %run_id, index_dir = %cli.index_dir.display(), "starting ingestion run");
    let summary = pipeline.run(input).await.context("ingestion run failed")?;
    Ok(summary)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
