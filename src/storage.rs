//! Run artifact layout and JSONL persistence.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PipelineError;
use crate::records::RawRecord;

/// Where one run writes its raw, cleaned, chunked, and binary artifacts.
#[derive(Debug, Clone)]
pub struct RunLayout {
    data_dir: PathBuf,
    corpus: String,
    run_id: String,
}

impl RunLayout {
    /// Layout under `data_dir` for `corpus` and `run_id`.
    pub fn new(data_dir: impl Into<PathBuf>, corpus: &str, run_id: &str) -> Self {
        Self {
            data_dir: data_dir.into(),
            corpus: corpus.to_string(),
            run_id: run_id.to_string(),
        }
    }

    /// Run identifier.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// `raw/` directory.
    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    /// `processed/` directory.
    pub fn processed_dir(&self) -> PathBuf {
        self.data_dir.join("processed")
    }

    /// Content-addressed PDF directory.
    pub fn binary_dir(&self) -> PathBuf {
        self.raw_dir().join("binary")
    }

    /// `raw/<corpus>_raw_<run>.jsonl`
    pub fn raw_path(&self) -> PathBuf {
        self.raw_dir()
            .join(format!("{}_raw_{}.jsonl", self.corpus, self.run_id))
    }

    /// `processed/<corpus>_clean_<run>.jsonl`
    pub fn clean_path(&self) -> PathBuf {
        self.processed_dir()
            .join(format!("{}_clean_{}.jsonl", self.corpus, self.run_id))
    }

    /// `processed/<corpus>_chunks_<run>.jsonl`
    pub fn chunks_path(&self) -> PathBuf {
        self.processed_dir()
            .join(format!("{}_chunks_{}.jsonl", self.corpus, self.run_id))
    }

    /// Creates the raw, processed, and binary directories.
    pub fn ensure_dirs(&self) -> Result<(), PipelineError> {
        for dir in [self.raw_dir(), self.processed_dir(), self.binary_dir()] {
            fs::create_dir_all(&dir).map_err(|err| PipelineError::io(&dir, err))?;
        }
        Ok(())
    }
}

/// Writes one JSON document per line, returning the number of rows written.
pub fn write_jsonl<'a, T, I>(path: &Path, rows: I) -> Result<usize, PipelineError>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
    }
    let file = File::create(path).map_err(|err| PipelineError::io(path, err))?;
    let mut writer = BufWriter::new(file);
    let mut count = 0;
    for row in rows {
        serde_json::to_writer(&mut writer, row).map_err(|source| PipelineError::Json {
            path: path.to_path_buf(),
            line: 0,
            source,
        })?;
        writer
            .write_all(b"\n")
            .map_err(|err| PipelineError::io(path, err))?;
        count += 1;
    }
    writer.flush().map_err(|err| PipelineError::io(path, err))?;
    info!(path = %path.display(), rows = count, "wrote jsonl");
    Ok(count)
}

/// Reads every non-blank line of a JSONL file.
pub fn read_jsonl<T>(path: &Path) -> Result<Vec<T>, PipelineError>
where
    T: for<'de> Deserialize<'de>,
{
    let file = File::open(path).map_err(|err| PipelineError::io(path, err))?;
    let mut rows = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|err| PipelineError::io(path, err))?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line).map_err(|source| PipelineError::Json {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        rows.push(row);
    }
    Ok(rows)
}

#[derive(Debug, Deserialize)]
struct StoredRawRecord {
    url: String,
    title: Option<String>,
    html: Option<String>,
    markdown: Option<String>,
    crawled_at: Option<String>,
    links: Option<Vec<String>>,
}

/// Loads previously crawled raw records, filling gaps with defaults.
///
/// Missing titles become `"Unknown"`, missing timestamps become `run_id`, and missing
/// bodies or links become empty.
pub fn load_raw_records(path: &Path, run_id: &str) -> Result<Vec<RawRecord>, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::Configuration(format!(
            "raw records file not found: {}",
            path.display()
        )));
    }
    let stored: Vec<StoredRawRecord> = read_jsonl(path)?;
    let records: Vec<RawRecord> = stored
        .into_iter()
        .map(|item| {
            RawRecord::new(
                item.url,
                item.title.unwrap_or_else(|| "Unknown".to_string()),
                item.html.unwrap_or_default(),
                item.markdown.unwrap_or_default(),
                item.crawled_at.unwrap_or_else(|| run_id.to_string()),
                item.links.unwrap_or_default(),
            )
        })
        .collect();
    info!(path = %path.display(), records = records.len(), "loaded raw records");
    Ok(records)
}
