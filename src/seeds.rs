//! Seed resolution: static seeds, an optional seed file, and optional search expansion.

use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use tracing::{info, warn};
use url::Url;

use crate::controls::USER_AGENT;
use crate::error::PipelineError;

/// Built-in starting points for the topic crawl.
pub const SEED_URLS: &[&str] = &[
    "https://en.wikipedia.org/wiki/Twinings",
    "https://en.wikipedia.org/wiki/Ovaltine",
    "https://www.twinings.co.uk/about-twinings/company-history",
    "https://www.twinings.co.uk/about-twinings/meet-the-team",
    "https://www.abf.co.uk/about_abf/our_history",
    "https://www.abf.co.uk/about_abf/our_businesses/ingredients/twinings_ovaltine",
    "https://www.associatedbritishfoodsplc.com/en/investors/shareholder-information",
    "https://www.ovaltine.co.uk/our-story",
];

/// Queries issued when search expansion is enabled.
pub const DEFAULT_SEARCH_QUERIES: &[&str] = &[
    "Twinings Ovaltine heritage",
    "Twinings shareholder report",
    "Ovaltine sustainability pdf",
    "Associated British Foods Twinings filing",
    "Twinings annual report",
    "Ovaltine investors presentation",
    "Twinings history site:wikipedia.org",
    "Twinings heritage site:gov.uk",
    "Twinings Ovaltine CSR report",
    "Twinings stakeholder engagement pdf",
];

const DUCKDUCKGO_BASE: &str = "https://html.duckduckgo.com";

/// Ordered, duplicate-free, capped collection of seed URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedSet {
    urls: Vec<String>,
    seen: HashSet<String>,
    cap: usize,
}

impl SeedSet {
    /// Creates an empty set that accepts at most `cap` URLs.
    pub fn with_cap(cap: usize) -> Self {
        Self {
            urls: Vec::new(),
            seen: HashSet::new(),
            cap,
        }
    }

    /// Inserts a URL, returning `true` when it was new and the cap allowed it.
    pub fn push(&mut self, raw: &str) -> bool {
        let url = strip_fragment(raw.trim());
        if url.is_empty() || self.urls.len() >= self.cap || self.seen.contains(url) {
            return false;
        }
        self.seen.insert(url.to_string());
        self.urls.push(url.to_string());
        true
    }

    /// Inserts every URL from the iterator, in order.
    pub fn extend<I, S>(&mut self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for url in urls {
            self.push(url.as_ref());
        }
    }

    /// Seeds in insertion order.
    pub fn as_slice(&self) -> &[String] {
        &self.urls
    }

    /// Number of seeds held.
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    /// True when no seed was accepted.
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

fn strip_fragment(url: &str) -> &str {
    url.split('#').next().unwrap_or(url)
}

/// Reads one URL per non-blank line. A missing file is a configuration error.
pub fn load_seed_file(path: &Path) -> Result<Vec<String>, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::Configuration(format!(
            "seed file missing: {}",
            path.display()
        )));
    }
    let contents = std::fs::read_to_string(path).map_err(|err| PipelineError::io(path, err))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Assembles static seeds plus an optional seed file into a capped [`SeedSet`].
pub fn resolve_seeds(
    static_seeds: &[&str],
    seed_file: Option<&Path>,
    cap: usize,
) -> Result<SeedSet, PipelineError> {
    let mut seeds = SeedSet::with_cap(cap);
    seeds.extend(static_seeds);
    if let Some(path) = seed_file {
        let from_file = load_seed_file(path)?;
        info!(path = %path.display(), count = from_file.len(), "loaded seed file");
        seeds.extend(from_file);
    }
    Ok(seeds)
}

/// Runs each query through the provider and appends the results to `seeds`.
///
/// A failing query is logged and skipped; whatever the other queries returned is kept.
pub async fn expand_with_search<S: SearchProvider>(
    seeds: &mut SeedSet,
    provider: &S,
    queries: &[&str],
    max_results: usize,
) {
    let before = seeds.len();
    for query in queries {
        match provider.search(query, max_results).await {
            Ok(urls) => seeds.extend(urls),
            Err(err) => warn!(query = %query, error = %err, "search query failed"),
        }
    }
    info!(
        added = seeds.len() - before,
        total = seeds.len(),
        "expanded seeds through search"
    );
}

/// Errors surfaced by a single search query.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Transport or timeout failure.
    #[error("search request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The engine answered with a non-success status.
    #[error("search engine returned {0}")]
    Status(StatusCode),
}

/// Web search capability used for seed expansion.
pub trait SearchProvider {
    /// Returns up to `max_results` result URLs for `query`.
    fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> impl Future<Output = Result<Vec<String>, SearchError>>;
}

/// DuckDuckGo HTML endpoint adapter (no API key required).
#[derive(Clone)]
pub struct DuckDuckGoSearch {
    client: Client,
    base_url: String,
    results: Selector,
}

impl DuckDuckGoSearch {
    /// Builds the adapter with a per-query timeout.
    pub fn new(timeout: Duration) -> Result<Self, SearchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: DUCKDUCKGO_BASE.to_string(),
            results: Selector::parse("a.result__a").expect("result selector"),
        })
    }

    /// Points the adapter at another host; used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn parse_results(&self, html: &str, max_results: usize) -> Vec<String> {
        let document = Html::parse_document(html);
        document
            .select(&self.results)
            .filter_map(|anchor| anchor.value().attr("href"))
            .filter_map(decode_result_href)
            .take(max_results)
            .collect()
    }
}

impl SearchProvider for DuckDuckGoSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>, SearchError> {
        let endpoint = format!("{}/html/", self.base_url);
        let response = self
            .client
            .get(&endpoint)
            .query(&[("q", query), ("kl", "wt-wt"), ("kp", "-2")])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status));
        }
        let body = response.text().await?;
        Ok(self.parse_results(&body, max_results))
    }
}

/// Result anchors are either direct links or `/l/?uddg=<target>` redirects.
fn decode_result_href(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else if href.starts_with('/') {
        format!("{DUCKDUCKGO_BASE}{href}")
    } else {
        href.to_string()
    };
    let parsed = Url::parse(&absolute).ok()?;
    let target = if parsed.path().starts_with("/l/") {
        let (_, value) = parsed.query_pairs().find(|(key, _)| key == "uddg")?;
        Url::parse(&value).ok()?
    } else {
        parsed
    };
    matches!(target.scheme(), "http" | "https").then(|| target.to_string())
}
