use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use kbcrawl::controls::EmbeddingArgs;
use kbcrawl::embedder::{AnyEmbedder, EmbeddingBackend, EmbeddingClient};
use kbcrawl::vector_store::SnapshotStore;
use tokio::runtime::Builder;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "kbcrawl-search",
    about = "Query the persisted knowledge-base snapshot by similarity"
)]
struct SearchCli {
    /// Question or phrase to look up
    query: String,

    /// Directory holding the persisted index snapshot
    #[arg(long, env = "KBCRAWL_INDEX_DIR", default_value = "kb_index")]
    index_dir: PathBuf,

    /// Passages returned at most
    #[arg(long, default_value_t = 2)]
    top_k: usize,

    /// Minimum cosine similarity for a passage to be shown
    #[arg(long, default_value_t = 0.6)]
    threshold: f32,

    /// Characters of each passage to print
    #[arg(long, default_value_t = 400)]
    preview_chars: usize,

    #[command(flatten)]
    embedding: EmbeddingArgs,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = SearchCli::parse();

    let store = SnapshotStore::new(&cli.index_dir);
    let Some(snapshot) = store
        .load()
        .with_context(|| format!("failed to load snapshot from {}", cli.index_dir.display()))?
    else {
        println!(
            "No index found at {}; run kbcrawl-ingest first.",
            cli.index_dir.display()
        );
        return Ok(());
    };

    let backend = AnyEmbedder::from_args(&cli.embedding).context("failed to build embedder")?;
    if backend.model() != snapshot.embedding_model {
        warn!(
            query_model = backend.model(),
            index_model = %snapshot.embedding_model,
            "query model differs from the indexed model"
        );
    }
    let client = EmbeddingClient::new(backend, 1);

    let rt = Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let vectors = rt
        .block_on(client.embed_all(&[cli.query.as_str()]))
        .context("failed to embed query")?;
    let query = vectors.first().context("embedding backend returned no vector")?;

    let hits = snapshot.search(query, cli.top_k, cli.threshold);
    if hits.is_empty() {
        println!("No passages above similarity {:.2}.", cli.threshold);
        return Ok(());
    }
    for (rank, hit) in hits.iter().enumerate() {
        let meta = &hit.chunk.metadata;
        println!(
            "#{} score={:.3} {} ({})",
            rank + 1,
            hit.score,
            meta.title,
            meta.source
        );
        let passage: String = hit.chunk.page_content.chars().take(cli.preview_chars).collect();
        println!("{passage}\n");
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
