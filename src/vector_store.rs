//! On-disk similarity index: a packed little-endian vector file plus a JSON sidecar that
//! carries chunk metadata, the vector count, and the CRC32 of the vector file.

use std::cmp::Ordering;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::info;

use crate::records::Chunk;

/// File holding the packed vectors.
pub const VECTOR_FILE: &str = "index.vectors";
/// Sidecar holding metadata and integrity fields.
pub const META_FILE: &str = "index.meta.json";
/// Directory, inside the index directory, that receives backups.
pub const BACKUP_DIR: &str = "backups";

const MAGIC: &[u8; 4] = b"KBVX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Errors reading or writing a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("io error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Sidecar could not be encoded or decoded.
    #[error("invalid snapshot metadata {path}: {source}")]
    Json {
        /// Sidecar path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// Files disagree with each other or with their own header.
    #[error("corrupt snapshot at {path}: {reason}")]
    Corrupt {
        /// Offending file.
        path: PathBuf,
        /// What failed to line up.
        reason: String,
    },
    /// A vector does not match the snapshot dimension.
    #[error("vector dimension {got} does not match snapshot dimension {expected}")]
    Dimension {
        /// Snapshot dimension.
        expected: usize,
        /// Offending dimension.
        got: usize,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// In-memory snapshot: chunks paired positionally with their vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSnapshot {
    /// Run that last committed the snapshot.
    pub run_id: String,
    /// RFC 3339 commit time.
    pub updated_at: String,
    /// Model that produced the vectors.
    pub embedding_model: String,
    /// Length of every vector.
    pub dimension: usize,
    entries: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

impl IndexSnapshot {
    /// Empty snapshot for `dimension`-length vectors.
    pub fn new(run_id: &str, embedding_model: &str, dimension: usize) -> Self {
        Self {
            run_id: run_id.to_string(),
            updated_at: String::new(),
            embedding_model: embedding_model.to_string(),
            dimension,
            entries: Vec::new(),
            vectors: Vec::new(),
        }
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Indexed chunks in insertion order.
    pub fn entries(&self) -> &[Chunk] {
        &self.entries
    }

    /// Vectors, positionally paired with [`IndexSnapshot::entries`].
    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    /// Appends one chunk and its vector.
    pub fn push(&mut self, chunk: Chunk, vector: Vec<f32>) -> Result<(), StoreError> {
        if vector.len() != self.dimension {
            return Err(StoreError::Dimension {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        self.entries.push(chunk);
        self.vectors.push(vector);
        Ok(())
    }

    /// Keeps only entries for which `keep` returns true; returns how many were removed.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&Chunk) -> bool,
    {
        let before = self.entries.len();
        let mut kept_entries = Vec::with_capacity(before);
        let mut kept_vectors = Vec::with_capacity(before);
        for (entry, vector) in self.entries.drain(..).zip(self.vectors.drain(..)) {
            if keep(&entry) {
                kept_entries.push(entry);
                kept_vectors.push(vector);
            }
        }
        self.entries = kept_entries;
        self.vectors = kept_vectors;
        before - self.entries.len()
    }

    /// Ranks entries by cosine similarity to `query`.
    ///
    /// Returns at most `top_k` hits scoring at least `min_score`, best first.
    pub fn search(&self, query: &[f32], top_k: usize, min_score: f32) -> Vec<SearchHit<'_>> {
        let mut hits: Vec<SearchHit<'_>> = self
            .entries
            .iter()
            .zip(&self.vectors)
            .map(|(chunk, vector)| SearchHit {
                score: cosine_similarity(query, vector),
                chunk,
            })
            .filter(|hit| hit.score >= min_score)
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(top_k);
        hits
    }

    fn encode_vectors(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.vectors.len() * self.dimension * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.vectors.len() as u64).to_le_bytes());
        for vector in &self.vectors {
            for value in vector {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        bytes
    }
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit<'a> {
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
    /// Matching chunk.
    pub chunk: &'a Chunk,
}

/// Cosine similarity; zero-length vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotMeta {
    version: u32,
    run_id: String,
    updated_at: String,
    embedding_model: String,
    dimension: usize,
    vector_count: usize,
    vectors_crc32: u32,
    entries: Vec<Chunk>,
}

/// Reads and atomically replaces the snapshot stored in one directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Index directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the packed vector file.
    pub fn vector_path(&self) -> PathBuf {
        self.dir.join(VECTOR_FILE)
    }

    /// Path of the metadata sidecar.
    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    /// Whether any snapshot file is present.
    pub fn exists(&self) -> bool {
        self.vector_path().exists() || self.meta_path().exists()
    }

    /// Loads the snapshot, or `None` when the directory holds none.
    pub fn load(&self) -> Result<Option<IndexSnapshot>, StoreError> {
        let vector_path = self.vector_path();
        let meta_path = self.meta_path();
        match (vector_path.exists(), meta_path.exists()) {
            (false, false) => return Ok(None),
            (true, false) => {
                return Err(StoreError::Corrupt {
                    path: meta_path,
                    reason: "metadata sidecar missing".into(),
                })
            }
            (false, true) => {
                return Err(StoreError::Corrupt {
                    path: vector_path,
                    reason: "vector file missing".into(),
                })
            }
            (true, true) => {}
        }

        let meta_bytes = fs::read(&meta_path).map_err(io_err(&meta_path))?;
        let meta: SnapshotMeta =
            serde_json::from_slice(&meta_bytes).map_err(|source| StoreError::Json {
                path: meta_path.clone(),
                source,
            })?;
        let bytes = fs::read(&vector_path).map_err(io_err(&vector_path))?;

        let corrupt = |reason: String| StoreError::Corrupt {
            path: vector_path.clone(),
            reason,
        };
        let crc = crc32fast::hash(&bytes);
        if crc != meta.vectors_crc32 {
            return Err(corrupt(format!(
                "crc32 {crc:08x} does not match recorded {:08x}",
                meta.vectors_crc32
            )));
        }
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(corrupt("missing vector file header".into()));
        }
        let version = u32::from_le_bytes(read_array(&bytes[4..8]));
        let dimension = u32::from_le_bytes(read_array(&bytes[8..12])) as usize;
        let count = u64::from_le_bytes(read_array(&bytes[12..20])) as usize;
        if version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {version}")));
        }
        if dimension != meta.dimension || count != meta.vector_count || count != meta.entries.len() {
            return Err(corrupt(format!(
                "header says {count} x {dimension}, metadata says {} x {} with {} entries",
                meta.vector_count,
                meta.dimension,
                meta.entries.len()
            )));
        }
        let body = &bytes[HEADER_LEN..];
        if body.len() != count * dimension * 4 {
            return Err(corrupt(format!(
                "expected {} vector bytes, found {}",
                count * dimension * 4,
                body.len()
            )));
        }

        let vectors = if dimension == 0 {
            vec![Vec::new(); count]
        } else {
            body.chunks_exact(dimension * 4)
                .map(|row| {
                    row.chunks_exact(4)
                        .map(|value| f32::from_le_bytes(read_array(value)))
                        .collect()
                })
                .collect()
        };

        Ok(Some(IndexSnapshot {
            run_id: meta.run_id,
            updated_at: meta.updated_at,
            embedding_model: meta.embedding_model,
            dimension,
            entries: meta.entries,
            vectors,
        }))
    }

    /// Writes `snapshot`, replacing each file via temp file + rename.
    ///
    /// The vector file is committed first; a reader that observes a new vector file with
    /// the old sidecar fails the CRC check instead of pairing mismatched data.
    pub fn save(&self, snapshot: &IndexSnapshot) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let vectors = snapshot.encode_vectors();
        let meta = SnapshotMeta {
            version: FORMAT_VERSION,
            run_id: snapshot.run_id.clone(),
            updated_at: snapshot.updated_at.clone(),
            embedding_model: snapshot.embedding_model.clone(),
            dimension: snapshot.dimension,
            vector_count: snapshot.vectors.len(),
            vectors_crc32: crc32fast::hash(&vectors),
            entries: snapshot.entries.clone(),
        };
        let meta_path = self.meta_path();
        let meta_bytes = serde_json::to_vec_pretty(&meta).map_err(|source| StoreError::Json {
            path: meta_path.clone(),
            source,
        })?;

        self.replace(&self.vector_path(), &vectors)?;
        self.replace(&meta_path, &meta_bytes)?;
        info!(
            dir = %self.dir.display(),
            vectors = meta.vector_count,
            dimension = meta.dimension,
            "snapshot committed"
        );
        Ok(())
    }

    fn replace(&self, target: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(io_err(&self.dir))?;
        tmp.write_all(bytes).map_err(io_err(tmp.path()))?;
        tmp.as_file().sync_all().map_err(io_err(tmp.path()))?;
        tmp.persist(target).map_err(|err| StoreError::Io {
            path: target.to_path_buf(),
            source: err.error,
        })?;
        Ok(())
    }

    /// Copies the current snapshot files into `backups/index_<run_id>/`.
    ///
    /// Returns the backup directory, or `None` when there was nothing to back up.
    pub fn backup(&self, run_id: &str) -> Result<Option<PathBuf>, StoreError> {
        if !self.exists() {
            return Ok(None);
        }
        let dest = self.dir.join(BACKUP_DIR).join(format!("index_{run_id}"));
        fs::create_dir_all(&dest).map_err(io_err(&dest))?;
        for name in [VECTOR_FILE, META_FILE] {
            let source = self.dir.join(name);
            if source.exists() {
                let target = dest.join(name);
                fs::copy(&source, &target).map_err(io_err(&target))?;
            }
        }
        info!(backup = %dest.display(), "snapshot backed up");
        Ok(Some(dest))
    }
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
