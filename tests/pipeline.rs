use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use kbcrawl::chunker::TextSplitter;
use kbcrawl::controls::CrawlControls;
use kbcrawl::crawler::{Crawler, FetchError, FetchedPage, LinkPreview, PageFetcher, StopReason};
use kbcrawl::embedder::{EmbedError, EmbeddingBackend, EmbeddingClient};
use kbcrawl::error::PipelineError;
use kbcrawl::index::{IndexError, IndexManager, RebuildMode};
use kbcrawl::pipeline::{CorpusInput, Pipeline, RunSummary};
use kbcrawl::seeds::SeedSet;
use kbcrawl::storage::RunLayout;
use kbcrawl::vector_store::SnapshotStore;
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use url::Url;

const HOME: &str = "https://www.twinings.co.uk/";
const HISTORY: &str = "https://www.twinings.co.uk/history";

#[derive(Default)]
struct FakeWeb {
    pages: HashMap<String, FetchedPage>,
    delay: Duration,
}

impl FakeWeb {
    fn page(mut self, url: &str, title: &str, body: &str, links: &[&str]) -> Self {
        self.pages.insert(
            url.to_string(),
            FetchedPage {
                url: url.to_string(),
                title: Some(title.to_string()),
                html: format!("<html><body><h1>{title}</h1><p>{body}</p></body></html>"),
                markdown: format!("# {title}\n\n{body}"),
                links: links.iter().map(|l| l.to_string()).collect(),
            },
        );
        self
    }
}

impl PageFetcher for FakeWeb {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.pages
            .get(url.as_str())
            .cloned()
            .ok_or(FetchError::Status(StatusCode::NOT_FOUND))
    }

    async fn preview(&self, url: &Url) -> Result<LinkPreview, FetchError> {
        let page = self
            .pages
            .get(url.as_str())
            .ok_or(FetchError::Status(StatusCode::NOT_FOUND))?;
        Ok(LinkPreview {
            url: url.to_string(),
            title: page.title.clone(),
        })
    }
}

/// Three-dimensional vectors derived from the text itself.
struct LengthEmbedder;

impl EmbeddingBackend for LengthEmbedder {
    fn model(&self) -> &str {
        "length-v1"
    }

    async fn embed(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(inputs
            .iter()
            .map(|text| {
                let spaces = text.matches(' ').count() as f32;
                vec![text.len() as f32, spaces, 1.0]
            })
            .collect())
    }
}

/// Rejects every request the way a revoked key would.
struct RevokedKeyEmbedder;

impl EmbeddingBackend for RevokedKeyEmbedder {
    fn model(&self) -> &str {
        "length-v1"
    }

    async fn embed(&self, _inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Status {
            status: StatusCode::UNAUTHORIZED,
            body: "invalid api key".into(),
        })
    }
}

fn tea_web() -> FakeWeb {
    FakeWeb::default()
        .page(
            HOME,
            "Twinings",
            "Twinings has blended and sold tea from the same London shop on the Strand since 1706.",
            &[HISTORY, "https://a.com/unrelated"],
        )
        .page(
            HISTORY,
            "History",
            "Thomas Twining opened Tom's Coffee House and soon became known for fine teas.",
            &[HOME],
        )
}

fn pipeline(
    index_dir: &Path,
    layout: RunLayout,
) -> Pipeline<FakeWeb, LengthEmbedder> {
    pipeline_over(tea_web(), CrawlControls::default(), index_dir, layout)
}

fn pipeline_over(
    web: FakeWeb,
    controls: CrawlControls,
    index_dir: &Path,
    layout: RunLayout,
) -> Pipeline<FakeWeb, LengthEmbedder> {
    let crawler = Crawler::new(web, controls);
    let index = IndexManager::new(
        SnapshotStore::new(index_dir),
        EmbeddingClient::new(LengthEmbedder, 90),
    );
    Pipeline::new(crawler, index, layout, TextSplitter::new(60, 10))
}

fn seeds() -> SeedSet {
    let mut seeds = SeedSet::with_cap(10);
    seeds.push(HOME);
    seeds
}

async fn crawl_once(root: &Path, run_id: &str) -> (RunLayout, RunSummary) {
    let layout = RunLayout::new(root.join("data"), "twinings", run_id);
    let summary = pipeline(&root.join("kb_index"), layout.clone())
        .run(CorpusInput::Crawl(seeds()))
        .await
        .unwrap();
    (layout, summary)
}

fn manual_entries(index_dir: &Path) -> usize {
    SnapshotStore::new(index_dir)
        .load()
        .unwrap()
        .expect("snapshot committed")
        .entries()
        .iter()
        .filter(|entry| entry.is_manual())
        .count()
}

#[tokio::test]
async fn crawl_run_writes_artifacts_and_one_fact() {
    let root = tempfile::tempdir().unwrap();
    let (layout, summary) = crawl_once(root.path(), "20240101000000").await;

    assert_eq!(summary.raw_records, 2);
    assert_eq!(summary.documents, 2);
    assert_eq!(summary.crawl_stop, Some(StopReason::QueueExhausted));
    assert!(summary.chunks >= 2);
    assert_eq!(summary.index.mode, RebuildMode::Fresh);
    assert_eq!(summary.index.embedded, summary.chunks + 1);
    assert_eq!(summary.index.total_entries, summary.chunks + 1);
    assert_eq!(summary.index.backup, None);

    let raw = fs::read_to_string(layout.raw_path()).unwrap();
    assert_eq!(raw.lines().count(), 2);
    assert!(layout.clean_path().exists());
    let chunk_lines = fs::read_to_string(layout.chunks_path()).unwrap();
    assert_eq!(chunk_lines.lines().count(), summary.chunks);

    assert_eq!(manual_entries(&root.path().join("kb_index")), 1);
}

#[tokio::test]
async fn fact_only_runs_keep_a_single_fact() {
    let root = tempfile::tempdir().unwrap();
    let index_dir = root.path().join("kb_index");
    let (_, first) = crawl_once(root.path(), "20240101000000").await;

    for run_id in ["20240102000000", "20240103000000"] {
        let layout = RunLayout::new(root.path().join("data"), "twinings", run_id);
        let summary = pipeline(&index_dir, layout)
            .run(CorpusInput::FactOnly)
            .await
            .unwrap();

        assert_eq!(summary.raw_records, 0);
        assert_eq!(summary.index.mode, RebuildMode::Incremental);
        assert_eq!(summary.index.embedded, 1);
        assert_eq!(summary.index.removed_facts, 1);
        assert_eq!(summary.index.total_entries, first.index.total_entries);
        let backup = summary.index.backup.expect("prior snapshot backed up");
        assert!(backup.ends_with(format!("backups/index_{run_id}")));
        assert_eq!(manual_entries(&index_dir), 1);
    }
}

#[tokio::test]
async fn prefetched_records_skip_already_indexed_chunks() {
    let root = tempfile::tempdir().unwrap();
    let index_dir = root.path().join("kb_index");
    let (first_layout, first) = crawl_once(root.path(), "20240101000000").await;

    let layout = RunLayout::new(root.path().join("data"), "twinings", "20240105000000");
    let summary = pipeline(&index_dir, layout.clone())
        .run(CorpusInput::Prefetched(first_layout.raw_path()))
        .await
        .unwrap();

    assert_eq!(summary.crawl_stop, None);
    assert_eq!(summary.raw_records, 2);
    assert_eq!(summary.chunks, first.chunks);
    assert_eq!(summary.index.skipped_existing, first.chunks);
    assert_eq!(summary.index.embedded, 1);
    assert_eq!(summary.index.total_entries, first.index.total_entries);
    assert!(layout.chunks_path().exists());
    assert!(!layout.raw_path().exists());
}

#[tokio::test(start_paused = true)]
async fn timed_out_crawl_still_indexes_harvested_pages() {
    let root = tempfile::tempdir().unwrap();
    let index_dir = root.path().join("kb_index");
    let mut web = FakeWeb::default()
        .page(
            "https://www.twinings.co.uk/twinings-1",
            "Blends",
            "English Breakfast is a blend of Assam, Ceylon and Kenyan teas.",
            &["https://www.twinings.co.uk/twinings-2"],
        )
        .page(
            "https://www.twinings.co.uk/twinings-2",
            "Strand",
            "The shop at 216 Strand has traded from the same address for centuries.",
            &["https://www.twinings.co.uk/twinings-3"],
        )
        .page(
            "https://www.twinings.co.uk/twinings-3",
            "Earl Grey",
            "Earl Grey is flavoured with oil of bergamot.",
            &[],
        );
    web.delay = Duration::from_secs(10);
    let controls = CrawlControls::default()
        .with_crawl_timeout(Duration::from_secs(25))
        .with_page_timeout(Duration::from_secs(20))
        .with_previews(0, 1, Duration::from_secs(1));
    let layout = RunLayout::new(root.path().join("data"), "twinings", "20240101000000");
    let mut seeds = SeedSet::with_cap(10);
    seeds.push("https://www.twinings.co.uk/twinings-1");

    let summary = pipeline_over(web, controls, &index_dir, layout.clone())
        .run(CorpusInput::Crawl(seeds))
        .await
        .unwrap();

    assert_eq!(summary.crawl_stop, Some(StopReason::TimedOut));
    assert_eq!(summary.raw_records, 2);
    assert_eq!(summary.documents, 2);
    assert_eq!(summary.index.total_entries, summary.chunks + 1);
    let raw = fs::read_to_string(layout.raw_path()).unwrap();
    assert_eq!(raw.lines().count(), 2);
    assert_eq!(manual_entries(&index_dir), 1);
}

#[tokio::test]
async fn rejected_embedding_key_fails_the_run_without_a_snapshot() {
    let root = tempfile::tempdir().unwrap();
    let index_dir = root.path().join("kb_index");
    let layout = RunLayout::new(root.path().join("data"), "twinings", "20240101000000");
    let index = IndexManager::new(
        SnapshotStore::new(&index_dir),
        EmbeddingClient::new(RevokedKeyEmbedder, 90),
    );
    let mut pipeline = Pipeline::new(
        Crawler::new(tea_web(), CrawlControls::default()),
        index,
        layout,
        TextSplitter::new(60, 10),
    );

    let err = pipeline
        .run(CorpusInput::FactOnly)
        .await
        .expect_err("unauthorized embedding fails the run");

    assert!(matches!(
        err,
        PipelineError::Index(IndexError::Embedding(EmbedError::Status { .. }))
    ));
    assert!(SnapshotStore::new(&index_dir).load().unwrap().is_none());
}
