//! Streaming body reads and link/title extraction built on `lol_html`.

use futures_util::StreamExt;
use lol_html::{element, text, HtmlRewriter, OutputSink, Settings};
use reqwest::Response;
use url::Url;

/// Links and title pulled from one HTML document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageScan {
    /// Contents of the first `<title>` element, whitespace-collapsed.
    pub title: Option<String>,
    /// Absolute, fragment-free link targets in document order, without repeats.
    pub links: Vec<String>,
}

/// Streams a response body into memory, failing once it grows past `max_bytes`.
pub async fn read_body(response: Response, max_bytes: usize) -> Result<Vec<u8>, HtmlError> {
    if let Some(declared) = response.content_length() {
        if declared as usize > max_bytes {
            return Err(HtmlError::TooLarge {
                limit: max_bytes,
                seen: declared as usize,
            });
        }
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(HtmlError::Http)?;
        if body.len() + chunk.len() > max_bytes {
            return Err(HtmlError::TooLarge {
                limit: max_bytes,
                seen: body.len() + chunk.len(),
            });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Collects the title and every `a[href]` target of `html`, resolved against `base`.
pub fn scan_page(base: &Url, html: &[u8]) -> Result<PageScan, HtmlError> {
    let mut links: Vec<String> = Vec::new();
    let mut title = String::new();
    let mut title_done = false;

    {
        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: vec![
                    element!("a[href]", |el| {
                        if let Some(href) = el.get_attribute("href") {
                            if let Some(resolved) = resolve_link(base, &href) {
                                if !links.contains(&resolved) {
                                    links.push(resolved);
                                }
                            }
                        }
                        Ok(())
                    }),
                    text!("title", |chunk| {
                        if !title_done {
                            title.push_str(chunk.as_str());
                            if chunk.last_in_text_node() {
                                title_done = true;
                            }
                        }
                        Ok(())
                    }),
                ],
                ..Settings::default()
            },
            NoopSink,
        );
        rewriter.write(html).map_err(HtmlError::Rewrite)?;
        rewriter.end().map_err(HtmlError::Rewrite)?;
    }

    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    Ok(PageScan {
        title: (!title.is_empty()).then_some(title),
        links,
    })
}

/// Resolves `href` against `base`, dropping fragments and non-navigable schemes.
pub fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut resolved = base.join(href).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved.into())
}

/// Errors surfaced while reading or scanning HTML.
#[derive(Debug, thiserror::Error)]
pub enum HtmlError {
    /// Reading the response stream failed.
    #[error("http stream error: {0}")]
    Http(#[source] reqwest::Error),
    /// The HTML rewriter encountered malformed markup.
    #[error("html rewrite error: {0}")]
    Rewrite(#[source] lol_html::errors::RewritingError),
    /// The body exceeded the configured byte ceiling.
    #[error("body exceeds {limit} bytes (saw {seen})")]
    TooLarge {
        /// Configured ceiling.
        limit: usize,
        /// Bytes declared or received when the ceiling was crossed.
        seen: usize,
    },
}

struct NoopSink;

impl OutputSink for NoopSink {
    fn handle_chunk(&mut self, _chunk: &[u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn scans_title_and_resolves_links() {
        let base = Url::parse("https://en.wikipedia.org/wiki/Twinings").unwrap();
        let html = br##"<html><head><title>
            Twinings - Wikipedia </title></head>
            <body>
              <a href="/wiki/Ovaltine#History">Ovaltine</a>
              <a href="https://www.twinings.co.uk/">Site</a>
              <a href="/wiki/Ovaltine">again</a>
              <a href="#cite">note</a>
              <a href="mailto:x@y.z">mail</a>
              <svg><title>icon</title></svg>
            </body></html>"##;

        let scan = scan_page(&base, html).unwrap();
        assert_eq!(scan.title.as_deref(), Some("Twinings - Wikipedia"));
        assert_eq!(
            scan.links,
            vec![
                "https://en.wikipedia.org/wiki/Ovaltine".to_string(),
                "https://www.twinings.co.uk/".to_string(),
            ]
        );
    }

    #[test]
    fn missing_title_is_none() {
        let base = Url::parse("https://a.test/").unwrap();
        let scan = scan_page(&base, b"<p>no head</p>").unwrap();
        assert_eq!(scan.title, None);
        assert!(scan.links.is_empty());
    }
}
