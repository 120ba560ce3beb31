//! Sequential breadth-first crawler bounded by page count, corpus size, and a run deadline.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::controls::{CrawlControls, USER_AGENT};
use crate::frontier::{Frontier, FrontierError};
use crate::html::{read_body, scan_page, HtmlError};
use crate::normalizer::render_markdown;
use crate::records::RawRecord;
use crate::robots::{fetch_rules, origin_key, RobotsRules};

/// Default ceiling on a single HTML response body.
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const UNKNOWN_TITLE: &str = "Unknown";

/// A page as returned by a [`PageFetcher`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedPage {
    /// Requested URL.
    pub url: String,
    /// Document title when the page declared one.
    pub title: Option<String>,
    /// Decoded HTML body.
    pub html: String,
    /// Markdown rendering of the body.
    pub markdown: String,
    /// Absolute outbound links in document order.
    pub links: Vec<String>,
}

/// Title peeked from a linked page without harvesting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPreview {
    /// Previewed URL.
    pub url: String,
    /// Title found on the target, if any.
    pub title: Option<String>,
}

/// Failures fetching one page; logged and dropped by the crawler.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Transport failure.
    #[error("http error: {0}")]
    Request(#[from] reqwest::Error),
    /// Non-success response status.
    #[error("unexpected status {0}")]
    Status(StatusCode),
    /// Response was not an HTML document.
    #[error("unsupported content type {0}")]
    NotHtml(String),
    /// Body could not be read or scanned.
    #[error(transparent)]
    Html(#[from] HtmlError),
    /// robots.txt forbids the path.
    #[error("disallowed by robots.txt")]
    Disallowed,
    /// The request exceeded its own timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Retrieves pages and link previews for the crawler.
pub trait PageFetcher {
    /// Fetches and parses a full page.
    fn fetch(&self, url: &Url) -> impl Future<Output = Result<FetchedPage, FetchError>>;

    /// Fetches only enough of `url` to learn its title.
    fn preview(&self, url: &Url) -> impl Future<Output = Result<LinkPreview, FetchError>>;
}

/// `reqwest`-backed fetcher that honors robots.txt per origin.
pub struct HttpFetcher {
    client: Client,
    preview_client: Client,
    max_body_bytes: usize,
    robots: Mutex<HashMap<String, Arc<RobotsRules>>>,
}

impl HttpFetcher {
    /// Builds clients with the page and preview timeouts from `controls`.
    pub fn new(controls: &CrawlControls) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(controls.page_timeout())
            .build()?;
        let preview_client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(controls.preview_timeout())
            .build()?;
        Ok(Self {
            client,
            preview_client,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            robots: Mutex::new(HashMap::new()),
        })
    }

    /// Overrides the response body ceiling.
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    async fn check_robots(&self, url: &Url) -> Result<(), FetchError> {
        let key = origin_key(url);
        let cached = self
            .robots
            .lock()
            .ok()
            .and_then(|cache| cache.get(&key).cloned());
        let rules = match cached {
            Some(rules) => rules,
            None => {
                let rules = Arc::new(fetch_rules(&self.client, url).await);
                if let Ok(mut cache) = self.robots.lock() {
                    cache.insert(key, Arc::clone(&rules));
                }
                rules
            }
        };
        if rules.is_allowed(url) {
            Ok(())
        } else {
            Err(FetchError::Disallowed)
        }
    }

    async fn get_html(&self, client: &Client, url: &Url) -> Result<(Url, Vec<u8>), FetchError> {
        self.check_robots(url).await?;
        let response = client.get(url.as_str()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
        {
            if !content_type.contains("html") {
                return Err(FetchError::NotHtml(content_type.to_string()));
            }
        }
        let final_url = response.url().clone();
        let body = read_body(response, self.max_body_bytes).await?;
        Ok((final_url, body))
    }
}

impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let (final_url, body) = self.get_html(&self.client, url).await?;
        let scan = scan_page(&final_url, &body)?;
        let html = String::from_utf8_lossy(&body).into_owned();
        let markdown = render_markdown(&html);
        Ok(FetchedPage {
            url: url.to_string(),
            title: scan.title,
            html,
            markdown,
            links: scan.links,
        })
    }

    async fn preview(&self, url: &Url) -> Result<LinkPreview, FetchError> {
        let (final_url, body) = self.get_html(&self.preview_client, url).await?;
        let scan = scan_page(&final_url, &body)?;
        Ok(LinkPreview {
            url: url.to_string(),
            title: scan.title,
        })
    }
}

/// Why a crawl ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Nothing left to fetch.
    QueueExhausted,
    /// `max_pages` records were harvested.
    PageLimit,
    /// Harvested content reached the corpus byte target.
    CorpusTarget,
    /// The run deadline expired.
    TimedOut,
}

/// Counters reported when a crawl finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    /// Pages fetched successfully.
    pub pages_fetched: usize,
    /// Links seen on harvested pages.
    pub urls_discovered: usize,
    /// Links admitted to the frontier.
    pub urls_enqueued: usize,
    /// Links refused by the domain/keyword filter.
    pub urls_rejected: usize,
    /// Links already queued or fetched.
    pub duplicates_filtered: usize,
    /// Links dropped because the frontier was full.
    pub frontier_rejections: usize,
    /// Page fetches that failed.
    pub fetch_errors: usize,
    /// Link previews that produced a title.
    pub previews: usize,
    /// Link previews that failed.
    pub preview_errors: usize,
    /// Bytes of html and markdown harvested.
    pub bytes_harvested: usize,
}

impl CrawlStats {
    fn report(&self, elapsed: Duration, stop: StopReason) {
        let secs = elapsed.as_secs_f32().max(f32::EPSILON);
        info!(
            ?stop,
            elapsed_secs = secs,
            pages_fetched = self.pages_fetched,
            pages_per_sec = self.pages_fetched as f32 / secs,
            urls_discovered = self.urls_discovered,
            urls_enqueued = self.urls_enqueued,
            urls_rejected = self.urls_rejected,
            duplicates = self.duplicates_filtered,
            frontier_rejections = self.frontier_rejections,
            fetch_errors = self.fetch_errors,
            previews = self.previews,
            preview_errors = self.preview_errors,
            bytes = self.bytes_harvested,
            "crawl finished"
        );
    }
}

/// Harvested records together with how and why the crawl ended.
#[derive(Debug)]
pub struct CrawlOutcome {
    /// Pages in harvest order.
    pub records: Vec<RawRecord>,
    /// Terminal condition.
    pub stop: StopReason,
    /// Crawl counters.
    pub stats: CrawlStats,
}

/// Drives a [`PageFetcher`] over the frontier under [`CrawlControls`].
pub struct Crawler<F> {
    fetcher: F,
    controls: CrawlControls,
}

impl<F: PageFetcher> Crawler<F> {
    /// Pairs a fetcher with crawl bounds.
    pub fn new(fetcher: F, controls: CrawlControls) -> Self {
        Self { fetcher, controls }
    }

    /// Bounds in effect for this crawler.
    pub fn controls(&self) -> &CrawlControls {
        &self.controls
    }

    /// Crawls breadth-first from `seeds` until a terminal condition is reached.
    ///
    /// Seeds are fetched even when they would fail the admission filter; only
    /// discovered links are filtered. Records harvested before the deadline are
    /// always returned.
    pub async fn crawl(&self, seeds: &[String]) -> CrawlOutcome {
        let started = Instant::now();
        let deadline = started + self.controls.crawl_timeout();
        let mut frontier = Frontier::new(self.controls.max_queue());
        let mut stats = CrawlStats::default();
        let mut records: Vec<RawRecord> = Vec::new();
        let mut preview_titles: HashMap<String, String> = HashMap::new();

        for seed in seeds {
            match Url::parse(seed) {
                Ok(url) => {
                    if let Err(err) = frontier.push(url) {
                        debug!(seed = %seed, error = %err, "seed not scheduled");
                    }
                }
                Err(err) => warn!(seed = %seed, error = %err, "invalid seed url"),
            }
        }

        let stop = loop {
            if records.len() >= self.controls.max_pages() {
                break StopReason::PageLimit;
            }
            if stats.bytes_harvested >= self.controls.target_bytes() {
                break StopReason::CorpusTarget;
            }
            let Some(url) = frontier.pop() else {
                break StopReason::QueueExhausted;
            };

            info!(url = %url, harvested = records.len(), "crawling");
            let page = match timeout_at(deadline, self.fetch_page(&url)).await {
                Err(_) => {
                    warn!(url = %url, "crawl deadline reached during fetch");
                    break StopReason::TimedOut;
                }
                Ok(Err(err)) => {
                    warn!(url = %url, error = %err, "fetch failed");
                    stats.fetch_errors += 1;
                    continue;
                }
                Ok(Ok(page)) => page,
            };
            stats.pages_fetched += 1;

            let preview_targets = self.admit_links(&url, &page.links, &mut frontier, &mut stats);

            let title = page
                .title
                .clone()
                .or_else(|| preview_titles.get(url.as_str()).cloned())
                .unwrap_or_else(|| UNKNOWN_TITLE.to_string());
            let record = RawRecord::new(
                url.to_string(),
                title,
                page.html,
                page.markdown,
                Utc::now().to_rfc3339(),
                page.links,
            );
            stats.bytes_harvested += record.content_bytes();
            records.push(record);

            if preview_targets.is_empty() {
                continue;
            }
            match timeout_at(deadline, self.run_previews(preview_targets)).await {
                Err(_) => {
                    warn!(url = %url, "crawl deadline reached during link previews");
                    break StopReason::TimedOut;
                }
                Ok(previews) => {
                    for preview in previews {
                        match preview {
                            Ok(LinkPreview {
                                url,
                                title: Some(title),
                            }) => {
                                stats.previews += 1;
                                preview_titles.entry(url).or_insert(title);
                            }
                            Ok(_) => stats.previews += 1,
                            Err(err) => {
                                debug!(error = %err, "link preview failed");
                                stats.preview_errors += 1;
                            }
                        }
                    }
                }
            }
        };

        stats.report(started.elapsed(), stop);
        CrawlOutcome {
            records,
            stop,
            stats,
        }
    }

    async fn fetch_page(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let limit = self.controls.page_timeout();
        timeout(limit, self.fetcher.fetch(url))
            .await
            .unwrap_or(Err(FetchError::Timeout(limit)))
    }

    /// Enqueues admitted links and returns the same-host ones worth previewing.
    fn admit_links(
        &self,
        page_url: &Url,
        links: &[String],
        frontier: &mut Frontier,
        stats: &mut CrawlStats,
    ) -> Vec<Url> {
        let mut admitted = 0usize;
        let mut previews = Vec::new();

        for link in links {
            stats.urls_discovered += 1;
            let Ok(candidate) = Url::parse(link) else {
                stats.urls_rejected += 1;
                continue;
            };
            if !self.controls.admits(&candidate) {
                stats.urls_rejected += 1;
                continue;
            }
            if previews.len() < self.controls.preview_links()
                && candidate.host_str() == page_url.host_str()
                && candidate != *page_url
            {
                previews.push(candidate.clone());
            }
            if admitted >= self.controls.max_links_per_page() {
                continue;
            }
            match frontier.push(candidate) {
                Ok(()) => {
                    admitted += 1;
                    stats.urls_enqueued += 1;
                }
                Err(FrontierError::Duplicate(_)) => stats.duplicates_filtered += 1,
                Err(FrontierError::QueueFull(dropped)) => {
                    debug!(url = %dropped, "frontier full");
                    stats.frontier_rejections += 1;
                }
            }
        }
        previews
    }

    async fn run_previews(&self, targets: Vec<Url>) -> Vec<Result<LinkPreview, FetchError>> {
        let limit = self.controls.preview_timeout();
        stream::iter(targets)
            .map(|url| async move {
                timeout(limit, self.fetcher.preview(&url))
                    .await
                    .unwrap_or(Err(FetchError::Timeout(limit)))
            })
            .buffer_unordered(self.controls.preview_concurrency().max(1))
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::{ALLOWED_DOMAIN_SNIPPETS, KEYWORD_FILTER};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tokio::time::sleep;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct FakeWeb {
        pages: HashMap<String, FetchedPage>,
        delay: Duration,
        fetched: RefCell<Vec<String>>,
    }

    impl FakeWeb {
        fn page(mut self, url: &str, title: Option<&str>, links: &[&str]) -> Self {
            self.pages.insert(
                url.to_string(),
                FetchedPage {
                    url: url.to_string(),
                    title: title.map(str::to_string),
                    html: format!("<html><body><p>{url}</p></body></html>"),
                    markdown: url.to_string(),
                    links: links.iter().map(|l| l.to_string()).collect(),
                },
            );
            self
        }

        fn fetched(&self) -> Vec<String> {
            self.fetched.borrow().clone()
        }
    }

    impl PageFetcher for FakeWeb {
        async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
            self.fetched.borrow_mut().push(url.to_string());
            if !self.delay.is_zero() {
                sleep(self.delay).await;
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
                title: Some(format!("preview of {}", page.url)),
            })
        }
    }

    fn controls(max_pages: usize, per_page: usize) -> CrawlControls {
        CrawlControls::new(
            max_pages,
            per_page,
            ALLOWED_DOMAIN_SNIPPETS.iter().map(|s| s.to_string()).collect(),
            KEYWORD_FILTER.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn admission_requires_domain_and_keyword() {
        let web = FakeWeb::default().page(
            "https://a.com/twinings",
            Some("Seed"),
            &[
                "https://b.com/twinings-history",
                "https://en.wikipedia.org/wiki/Coffee",
            ],
        );
        let crawler = Crawler::new(web, controls(10, 10));
        let outcome = crawler.crawl(&["https://a.com/twinings".to_string()]).await;

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.stop, StopReason::QueueExhausted);
        assert_eq!(outcome.stats.urls_rejected, 2);
        assert_eq!(crawler.fetcher.fetched(), ["https://a.com/twinings"]);
    }

    #[tokio::test]
    async fn per_page_cap_and_dedupe_bound_the_frontier() {
        let web = FakeWeb::default()
            .page(
                "https://en.wikipedia.org/wiki/Twinings",
                Some("Twinings"),
                &[
                    "https://en.wikipedia.org/wiki/Twinings_tea",
                    "https://en.wikipedia.org/wiki/Ovaltine",
                    "https://en.wikipedia.org/wiki/Twinings",
                    "https://en.wikipedia.org/wiki/ABF_history",
                ],
            )
            .page(
                "https://en.wikipedia.org/wiki/Twinings_tea",
                Some("Tea"),
                &["https://en.wikipedia.org/wiki/Ovaltine"],
            )
            .page("https://en.wikipedia.org/wiki/Ovaltine", None, &[]);
        let crawler = Crawler::new(web, controls(10, 2));
        let outcome = crawler
            .crawl(&["https://en.wikipedia.org/wiki/Twinings".to_string()])
            .await;

        let urls: Vec<_> = outcome.records.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "https://en.wikipedia.org/wiki/Twinings",
                "https://en.wikipedia.org/wiki/Twinings_tea",
                "https://en.wikipedia.org/wiki/Ovaltine",
            ]
        );
        // Untitled page borrows the title found while previewing it.
        assert_eq!(
            outcome.records[2].title,
            "preview of https://en.wikipedia.org/wiki/Ovaltine"
        );
        assert!(outcome.stats.duplicates_filtered >= 1);
    }

    #[tokio::test]
    async fn stops_at_page_limit() {
        let web = FakeWeb::default()
            .page("https://www.twinings.co.uk/twinings-a", None, &["https://www.twinings.co.uk/twinings-b"])
            .page("https://www.twinings.co.uk/twinings-b", None, &[]);
        let crawler = Crawler::new(web, controls(1, 10).with_previews(0, 1, Duration::from_secs(1)));
        let outcome = crawler
            .crawl(&["https://www.twinings.co.uk/twinings-a".to_string()])
            .await;
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].title, "Unknown");
        assert_eq!(outcome.stop, StopReason::PageLimit);
    }

    #[tokio::test]
    async fn stops_at_corpus_target() {
        let web = FakeWeb::default()
            .page("https://www.twinings.co.uk/twinings-a", None, &["https://www.twinings.co.uk/twinings-b"])
            .page("https://www.twinings.co.uk/twinings-b", None, &[]);
        let crawler = Crawler::new(web, controls(10, 10).with_target_bytes(1));
        let outcome = crawler
            .crawl(&["https://www.twinings.co.uk/twinings-a".to_string()])
            .await;
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.stop, StopReason::CorpusTarget);
    }

    #[tokio::test]
    async fn failed_fetches_are_dropped_and_not_retried() {
        let web = FakeWeb::default().page(
            "https://www.ovaltine.co.uk/ovaltine",
            Some("Ovaltine"),
            &["https://www.ovaltine.co.uk/ovaltine-missing"],
        );
        let crawler = Crawler::new(web, controls(10, 10).with_previews(0, 1, Duration::from_secs(1)));
        let outcome = crawler
            .crawl(&[
                "https://www.ovaltine.co.uk/ovaltine".to_string(),
                "https://www.ovaltine.co.uk/ovaltine-missing".to_string(),
            ])
            .await;
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.stats.fetch_errors, 1);
        assert_eq!(crawler.fetcher.fetched().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_keeps_pages_harvested_so_far() {
        let mut web = FakeWeb::default()
            .page("https://www.twinings.co.uk/twinings-1", None, &["https://www.twinings.co.uk/twinings-2"])
            .page("https://www.twinings.co.uk/twinings-2", None, &["https://www.twinings.co.uk/twinings-3"])
            .page("https://www.twinings.co.uk/twinings-3", None, &[]);
        web.delay = Duration::from_secs(10);
        let crawler = Crawler::new(
            web,
            controls(10, 10)
                .with_crawl_timeout(Duration::from_secs(25))
                .with_page_timeout(Duration::from_secs(20))
                .with_previews(0, 1, Duration::from_secs(1)),
        );
        let outcome = crawler
            .crawl(&["https://www.twinings.co.uk/twinings-1".to_string()])
            .await;

        assert_eq!(outcome.stop, StopReason::TimedOut);
        assert_eq!(outcome.records.len(), 2);
    }

    #[tokio::test]
    async fn http_fetcher_reads_title_links_and_markdown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/twinings"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(
                    "<html><head><title>Twinings</title></head><body>\
                     <h1>History</h1><a href=\"/ovaltine\">Ovaltine</a></body></html>",
                    "text/html; charset=utf-8",
                ),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&CrawlControls::default()).unwrap();
        let page_url = Url::parse(&format!("{}/twinings", server.uri())).unwrap();
        let page = fetcher.fetch(&page_url).await.unwrap();
        assert_eq!(page.title.as_deref(), Some("Twinings"));
        assert_eq!(page.links, [format!("{}/ovaltine", server.uri())]);
        assert_eq!(page.markdown, "# History");

        let blocked = Url::parse(&format!("{}/private/doc", server.uri())).unwrap();
        assert!(matches!(
            fetcher.fetch(&blocked).await,
            Err(FetchError::Disallowed)
        ));
    }
}
