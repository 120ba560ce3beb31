//! Index rebuilds: load-or-create, incremental append, fact injection, backup, commit.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::embedder::{EmbedError, EmbeddingBackend, EmbeddingClient};
use crate::records::Chunk;
use crate::vector_store::{IndexSnapshot, SnapshotStore, StoreError};

/// Fact injected into every rebuilt index.
pub const DEFAULT_FACT_TEXT: &str = "The CEO of Twinings Ovaltine is Olav Silden.";
/// Title carried by the injected fact.
pub const DEFAULT_FACT_TITLE: &str = "CEO Information";

/// Rebuild failures.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Embedding failed; nothing was written.
    #[error(transparent)]
    Embedding(#[from] EmbedError),
    /// Loading or backing up the prior snapshot failed; nothing was overwritten.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Writing the new snapshot failed after the prior one was backed up.
    #[error("snapshot write failed (backup: {backup:?}): {source}")]
    Consistency {
        /// Backup of the prior snapshot, if one existed.
        backup: Option<PathBuf>,
        /// Underlying write error.
        #[source]
        source: StoreError,
    },
    /// New vectors cannot be merged into the stored snapshot.
    #[error("index inconsistent: {0}")]
    Inconsistent(String),
}

/// Whether a rebuild appended to a prior snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildMode {
    /// No prior snapshot; everything was embedded.
    Fresh,
    /// Prior snapshot extended with new chunks.
    Incremental,
}

/// What a rebuild did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    /// Fresh or incremental.
    pub mode: RebuildMode,
    /// Chunks embedded in this run, fact included.
    pub embedded: usize,
    /// New chunks skipped because their text was already indexed.
    pub skipped_existing: usize,
    /// Prior fact records removed before re-injection.
    pub removed_facts: usize,
    /// Entries in the committed snapshot.
    pub total_entries: usize,
    /// Where the prior snapshot was copied, when one existed.
    pub backup: Option<PathBuf>,
}

/// Owns the snapshot directory and the embedding client used to extend it.
pub struct IndexManager<B> {
    store: SnapshotStore,
    client: EmbeddingClient<B>,
    fact_text: String,
    fact_title: String,
}

impl<B: EmbeddingBackend> IndexManager<B> {
    /// Manager that injects the default fact.
    pub fn new(store: SnapshotStore, client: EmbeddingClient<B>) -> Self {
        Self {
            store,
            client,
            fact_text: DEFAULT_FACT_TEXT.to_string(),
            fact_title: DEFAULT_FACT_TITLE.to_string(),
        }
    }

    /// Overrides the injected fact.
    pub fn with_fact(mut self, text: impl Into<String>, title: impl Into<String>) -> Self {
        self.fact_text = text.into();
        self.fact_title = title.into();
        self
    }

    /// Snapshot store backing this manager.
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Embeds `chunks` plus the fact record and commits the resulting snapshot.
    ///
    /// With a prior snapshot, its fact record is replaced and chunks whose text is already
    /// indexed are skipped. Embedding happens before any file is touched; the prior
    /// snapshot is backed up before it is overwritten.
    pub async fn rebuild(&self, chunks: Vec<Chunk>, run_id: &str) -> Result<RebuildReport, IndexError> {
        let now = Utc::now().to_rfc3339();
        let fact = Chunk::manual_fact(&self.fact_text, &self.fact_title, run_id, &now);

        let prior = self.store.load()?;
        let mode = if prior.is_some() {
            RebuildMode::Incremental
        } else {
            RebuildMode::Fresh
        };
        let mut removed_facts = 0;
        let mut skipped_existing = 0;

        let mut to_embed: Vec<Chunk> = match &prior {
            Some(snapshot) => {
                let known: HashSet<&str> = snapshot
                    .entries()
                    .iter()
                    .filter(|entry| !entry.is_manual())
                    .map(|entry| entry.page_content.as_str())
                    .collect();
                chunks
                    .into_iter()
                    .filter(|chunk| !chunk.is_manual())
                    .filter(|chunk| {
                        let fresh = !known.contains(chunk.page_content.as_str());
                        if !fresh {
                            skipped_existing += 1;
                        }
                        fresh
                    })
                    .collect()
            }
            None => chunks.into_iter().filter(|chunk| !chunk.is_manual()).collect(),
        };
        to_embed.push(fact);

        info!(run_id, ?mode, chunks = to_embed.len(), skipped_existing, "embedding chunks");
        let texts: Vec<&str> = to_embed.iter().map(|chunk| chunk.page_content.as_str()).collect();
        let vectors = self.client.embed_all(&texts).await?;
        let dimension = vectors.first().map(Vec::len).unwrap_or_default();

        let mut snapshot = match prior {
            Some(mut snapshot) => {
                removed_facts = snapshot.retain(|entry| !entry.is_manual());
                if snapshot.dimension != dimension {
                    if !snapshot.is_empty() {
                        return Err(IndexError::Inconsistent(format!(
                            "stored vectors have dimension {}, new vectors have {dimension}",
                            snapshot.dimension
                        )));
                    }
                    snapshot.dimension = dimension;
                }
                if snapshot.embedding_model != self.client.model() {
                    warn!(
                        stored = %snapshot.embedding_model,
                        current = %self.client.model(),
                        "embedding model changed since the snapshot was built"
                    );
                }
                snapshot
            }
            None => IndexSnapshot::new(run_id, self.client.model(), dimension),
        };
        snapshot.run_id = run_id.to_string();
        snapshot.updated_at = now;
        snapshot.embedding_model = self.client.model().to_string();

        let embedded = to_embed.len();
        for (chunk, vector) in to_embed.into_iter().zip(vectors) {
            snapshot
                .push(chunk, vector)
                .map_err(|err| IndexError::Inconsistent(err.to_string()))?;
        }

        let backup = self.store.backup(run_id)?;
        if let Err(source) = self.store.save(&snapshot) {
            error!(
                backup = ?backup,
                error = %source,
                "snapshot write failed; restore from the backup directory"
            );
            return Err(IndexError::Consistency { backup, source });
        }

        let report = RebuildReport {
            mode,
            embedded,
            skipped_existing,
            removed_facts,
            total_entries: snapshot.len(),
            backup,
        };
        info!(
            run_id,
            total = report.total_entries,
            embedded = report.embedded,
            "index rebuild complete"
        );
        Ok(report)
    }
}
