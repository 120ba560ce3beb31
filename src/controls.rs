//! Crawl bounds, admission filtering, and the command-line surface that configures them.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::PipelineError;

/// Default substrings a link's host must contain to be admitted.
pub const ALLOWED_DOMAIN_SNIPPETS: &[&str] = &[
    "wikipedia.org",
    "twinings.",
    "abf.co.uk",
    "associatedbritishfoods",
    "ovaltine.",
];

/// Default topic keywords; a link's URL must contain at least one.
pub const KEYWORD_FILTER: &[&str] = &["twinings", "ovaltine", "associated british", "abf", "wander"];

/// Default cap on the number of URLs the frontier holds.
pub const DEFAULT_MAX_QUEUE: usize = 5000;

/// User agent sent by every outbound request.
pub const USER_AGENT: &str = "kbcrawl/0.1 (+topic knowledge base ingestion)";

const KEYWORD_JOINERS: &[&str] = &["-", "_", "+", "%20", ""];

/// Tunable knobs that bound crawl behavior.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrawlControls {
    max_pages: usize,
    max_links_per_page: usize,
    max_queue: usize,
    target_bytes: usize,
    crawl_timeout: Duration,
    page_timeout: Duration,
    preview_links: usize,
    preview_concurrency: usize,
    preview_timeout: Duration,
    allowed_domains: Vec<String>,
    keywords: Vec<String>,
}

impl CrawlControls {
    /// Constructs controls with the given page budget, fan-out cap, and filters.
    pub fn new(
        max_pages: usize,
        max_links_per_page: usize,
        allowed_domains: Vec<String>,
        keywords: Vec<String>,
    ) -> Self {
        Self {
            max_pages,
            max_links_per_page,
            allowed_domains: lowercase_all(allowed_domains),
            keywords: lowercase_all(keywords),
            ..Self::default()
        }
    }

    /// Overrides the overall crawl wall-clock budget.
    pub fn with_crawl_timeout(mut self, timeout: Duration) -> Self {
        self.crawl_timeout = timeout;
        self
    }

    /// Overrides the per-page fetch timeout.
    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    /// Overrides the harvested-bytes target that ends the crawl.
    pub fn with_target_bytes(mut self, bytes: usize) -> Self {
        self.target_bytes = bytes;
        self
    }

    /// Overrides the frontier capacity.
    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue.max(1);
        self
    }

    /// Overrides link-preview fan-out, concurrency, and timeout.
    pub fn with_previews(mut self, links: usize, concurrency: usize, timeout: Duration) -> Self {
        self.preview_links = links;
        self.preview_concurrency = concurrency.max(1);
        self.preview_timeout = timeout;
        self
    }

    /// Maximum pages harvested in one traversal.
    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Maximum new links admitted per source page.
    pub fn max_links_per_page(&self) -> usize {
        self.max_links_per_page
    }

    /// Maximum URLs held by the frontier queue.
    pub fn max_queue(&self) -> usize {
        self.max_queue
    }

    /// Harvested html+markdown bytes after which the crawl stops.
    pub fn target_bytes(&self) -> usize {
        self.target_bytes
    }

    /// Wall-clock budget for the whole traversal.
    pub fn crawl_timeout(&self) -> Duration {
        self.crawl_timeout
    }

    /// Timeout applied to each page fetch.
    pub fn page_timeout(&self) -> Duration {
        self.page_timeout
    }

    /// Number of admitted links previewed per page.
    pub fn preview_links(&self) -> usize {
        self.preview_links
    }

    /// Ceiling on concurrent preview sub-fetches.
    pub fn preview_concurrency(&self) -> usize {
        self.preview_concurrency
    }

    /// Timeout applied to each preview sub-fetch.
    pub fn preview_timeout(&self) -> Duration {
        self.preview_timeout
    }

    /// Returns the allowlist of domain substrings.
    pub fn allowed_domains(&self) -> &[String] {
        &self.allowed_domains
    }

    /// Returns the topic keywords.
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Determines whether the provided host contains an allowed domain snippet.
    pub fn is_domain_allowed(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.allowed_domains
            .iter()
            .any(|snippet| host.contains(snippet.as_str()))
    }

    /// Determines whether the URL text mentions at least one topic keyword.
    pub fn matches_keyword(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        self.keywords.iter().any(|keyword| {
            if keyword.contains(' ') {
                KEYWORD_JOINERS
                    .iter()
                    .any(|joiner| lower.contains(&keyword.replace(' ', joiner)))
            } else {
                lower.contains(keyword.as_str())
            }
        })
    }

    /// Conjunctive admission test: http(s) scheme, allowed host, and a topic keyword.
    pub fn admits(&self, url: &Url) -> bool {
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        let host_ok = url
            .host_str()
            .map(|host| self.is_domain_allowed(host))
            .unwrap_or(false);
        host_ok && self.matches_keyword(url.as_str())
    }
}

impl Default for CrawlControls {
    fn default() -> Self {
        Self {
            max_pages: 1000,
            max_links_per_page: 10,
            max_queue: DEFAULT_MAX_QUEUE,
            target_bytes: 100 * 1024 * 1024,
            crawl_timeout: Duration::from_secs(30 * 60),
            page_timeout: Duration::from_secs(20),
            preview_links: 20,
            preview_concurrency: 3,
            preview_timeout: Duration::from_secs(20),
            allowed_domains: to_owned_all(ALLOWED_DOMAIN_SNIPPETS),
            keywords: to_owned_all(KEYWORD_FILTER),
        }
    }
}

fn lowercase_all(values: Vec<String>) -> Vec<String> {
    values.into_iter().map(|v| v.to_lowercase()).collect()
}

fn to_owned_all(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Embedding backends the ingest binary can talk to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum EmbeddingProvider {
    /// Azure AI Inference `/embeddings` endpoint (`api-key` auth).
    Azure,
    /// OpenAI-compatible `/embeddings` endpoint (bearer auth).
    Openai,
}

/// Embedding backend settings shared by the ingest and search binaries.
#[derive(clap::Args, Debug, Clone)]
pub struct EmbeddingArgs {
    /// Which embedding API dialect to speak
    #[arg(long, env = "EMBEDDING_PROVIDER", value_enum, default_value = "azure")]
    pub embedding_provider: EmbeddingProvider,

    /// Base URL of the embedding API
    #[arg(
        long,
        env = "EMBEDDING_ENDPOINT",
        default_value = "https://llmaccess.services.ai.azure.com/models"
    )]
    pub embedding_endpoint: String,

    /// API key for the embedding backend
    #[arg(long, env = "EMBEDDING_KEY", default_value = "", hide_env_values = true)]
    pub embedding_key: String,

    /// Embedding model identifier
    #[arg(long, env = "EMBEDDING_MODEL", default_value = "embed-v-4-0")]
    pub embedding_model: String,

    /// Max number of texts per embedding request
    #[arg(long, env = "EMBEDDING_BATCH_LIMIT", default_value_t = 90)]
    pub embedding_batch: usize,

    /// Max seconds to wait for each embedding request
    #[arg(long, env = "EMBEDDING_TIMEOUT_SECS", default_value_t = 60)]
    pub embedding_timeout_secs: u64,
}

impl EmbeddingArgs {
    /// Per-request timeout for embedding calls.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs.max(1))
    }
}

/// Command-line interface of the ingestion binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "kbcrawl-ingest",
    about = "Crawl, clean, chunk, embed, and index the topic knowledge base"
)]
pub struct Cli {
    /// Maximum pages harvested by the crawler
    #[arg(long, env = "KBCRAWL_MAX_PAGES", default_value_t = 1000)]
    pub max_pages: usize,

    /// Maximum new links admitted from each page
    #[arg(long, env = "KBCRAWL_PER_PAGE_LINK_CAP", default_value_t = 10)]
    pub per_page_link_cap: usize,

    /// Target chunk size in characters
    #[arg(long, default_value_t = 700)]
    pub chunk_size: usize,

    /// Overlap between adjacent chunks in characters
    #[arg(long, default_value_t = 120)]
    pub chunk_overlap: usize,

    /// Skip live crawling and load raw records from --raw-path
    #[arg(long, default_value_t = false)]
    pub skip_crawl: bool,

    /// Pre-fetched raw JSONL used with --skip-crawl
    #[arg(long)]
    pub raw_path: Option<PathBuf>,

    /// Extra seed URLs, one per line
    #[arg(long)]
    pub seed_file: Option<PathBuf>,

    /// Expand seeds through web search queries
    #[arg(long, default_value_t = false)]
    pub use_search: bool,

    /// Results requested per search query
    #[arg(long, default_value_t = 100)]
    pub search_results: usize,

    /// Fetch linked PDF documents and append their text
    #[arg(long, default_value_t = false)]
    pub include_pdfs: bool,

    /// Stop crawling once this many MiB of page content were harvested
    #[arg(long, default_value_t = 100)]
    pub target_mb: usize,

    /// Wall-clock budget for the crawl, in minutes
    #[arg(long, default_value_t = 30)]
    pub max_runtime_min: u64,

    /// Only inject the manual fact record into the index, without crawling
    #[arg(long, default_value_t = false)]
    pub fact_only: bool,

    /// Root directory for raw and processed artifacts
    #[arg(long, env = "KBCRAWL_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Directory holding the persisted index snapshot
    #[arg(long, env = "KBCRAWL_INDEX_DIR", default_value = "kb_index")]
    pub index_dir: PathBuf,

    /// File-name prefix for per-run artifacts
    #[arg(long, env = "KBCRAWL_CORPUS", default_value = "twinings")]
    pub corpus: String,

    /// Domain allowlist snippets, comma separated (defaults to the built-in topic list)
    #[arg(long, env = "KBCRAWL_DOMAINS")]
    pub allowed_domains: Option<String>,

    /// Topic keywords, comma separated (defaults to the built-in topic list)
    #[arg(long, env = "KBCRAWL_KEYWORDS")]
    pub keywords: Option<String>,

    /// Maximum URLs held by the frontier
    #[arg(long, env = "CRAWL_MAX_QUEUE", default_value_t = DEFAULT_MAX_QUEUE)]
    pub max_queue: usize,

    /// Seconds allowed for each page fetch
    #[arg(long, env = "KBCRAWL_PAGE_TIMEOUT_SECS", default_value_t = 20)]
    pub page_timeout_secs: u64,

    /// Admitted links previewed per page (0 disables previews)
    #[arg(long, env = "KBCRAWL_PREVIEW_LINKS", default_value_t = 20)]
    pub preview_links: usize,

    /// Concurrent preview sub-fetches per page
    #[arg(long, env = "KBCRAWL_PREVIEW_CONCURRENCY", default_value_t = 3)]
    pub preview_concurrency: usize,

    /// Byte ceiling for fetched PDFs
    #[arg(long, env = "CRAWL_MAX_PDF_BYTES", default_value_t = crate::pdf::DEFAULT_MAX_PDF_BYTES)]
    pub max_pdf_bytes: usize,

    /// Text of the fact record injected on every rebuild
    #[arg(
        long,
        env = "KBCRAWL_FACT_TEXT",
        default_value = "The CEO of Twinings Ovaltine is Olav Silden."
    )]
    pub fact_text: String,

    /// Title of the injected fact record
    #[arg(long, env = "KBCRAWL_FACT_TITLE", default_value = "CEO Information")]
    pub fact_title: String,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,
}

impl Cli {
    /// Converts the parsed CLI into `CrawlControls`.
    pub fn build_controls(&self) -> CrawlControls {
        let domains = self
            .allowed_domains
            .as_deref()
            .map(split_list)
            .unwrap_or_else(|| to_owned_all(ALLOWED_DOMAIN_SNIPPETS));
        let keywords = self
            .keywords
            .as_deref()
            .map(split_list)
            .unwrap_or_else(|| to_owned_all(KEYWORD_FILTER));
        CrawlControls::new(self.max_pages, self.per_page_link_cap, domains, keywords)
            .with_max_queue(self.max_queue)
            .with_target_bytes(self.target_mb.saturating_mul(1024 * 1024))
            .with_crawl_timeout(self.run_duration())
            .with_page_timeout(Duration::from_secs(self.page_timeout_secs.max(1)))
            .with_previews(
                self.preview_links,
                self.preview_concurrency,
                Duration::from_secs(20),
            )
    }

    /// Returns the requested crawl duration.
    pub fn run_duration(&self) -> Duration {
        Duration::from_secs(self.max_runtime_min.saturating_mul(60))
    }

    /// Rejects flag combinations that cannot run, before any network I/O.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.embedding.embedding_key.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "embedding key missing; set EMBEDDING_KEY or --embedding-key".into(),
            ));
        }
        if self.skip_crawl && !self.fact_only && self.raw_path.is_none() {
            return Err(PipelineError::Configuration(
                "--skip-crawl requires --raw-path".into(),
            ));
        }
        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
