//! Optional PDF augmentation: linked PDFs are downloaded under a byte cap, their text is
//! appended to the owning record, and the binary is kept content-addressed on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use url::Url;

use crate::controls::USER_AGENT;
use crate::html::{read_body, HtmlError};
use crate::records::RawRecord;

/// Default ceiling on one PDF payload.
pub const DEFAULT_MAX_PDF_BYTES: usize = 8 * 1024 * 1024;
/// PDFs fetched per record at most.
pub const MAX_PDFS_PER_RECORD: usize = 5;
/// Per-request timeout for PDF downloads.
pub const PDF_TIMEOUT: Duration = Duration::from_secs(30);

/// Failures for a single PDF; all are logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    /// Transport failure.
    #[error("pdf request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Non-success response status.
    #[error("pdf server returned {0}")]
    Status(StatusCode),
    /// `Content-Type` did not announce a PDF.
    #[error("not a pdf (content-type {0:?})")]
    NotPdf(String),
    /// Payload larger than the configured cap.
    #[error("pdf exceeds {limit} bytes (saw {size})")]
    Oversize {
        /// Configured cap.
        limit: usize,
        /// Declared or received size.
        size: usize,
    },
    /// Text extraction failed.
    #[error("pdf text extraction failed: {0}")]
    Extract(String),
    /// Extraction produced no text.
    #[error("pdf contained no text")]
    Empty,
    /// Persisting the binary failed.
    #[error("failed to write {path}: {source}")]
    Io {
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl From<HtmlError> for PdfError {
    fn from(err: HtmlError) -> Self {
        match err {
            HtmlError::Http(err) => PdfError::Request(err),
            HtmlError::TooLarge { limit, seen } => PdfError::Oversize { limit, size: seen },
            HtmlError::Rewrite(err) => PdfError::Extract(err.to_string()),
        }
    }
}

/// Downloads linked PDFs and appends their text to raw records.
pub struct PdfAugmenter {
    client: Client,
    binary_dir: PathBuf,
    max_bytes: usize,
    attempted: HashSet<String>,
}

impl PdfAugmenter {
    /// Builds an augmenter that stores binaries under `binary_dir`.
    pub fn new(binary_dir: impl Into<PathBuf>, max_bytes: usize) -> Result<Self, PdfError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(PDF_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            binary_dir: binary_dir.into(),
            max_bytes,
            attempted: HashSet::new(),
        })
    }

    /// Augments every record in place and returns how many PDFs were attached.
    ///
    /// Each PDF URL is attempted at most once for the lifetime of the augmenter.
    pub async fn augment(&mut self, records: &mut [RawRecord]) -> usize {
        let mut attached = 0;
        for record in records.iter_mut() {
            let targets: Vec<Url> = record
                .links
                .iter()
                .filter_map(|link| Url::parse(link).ok())
                .filter(is_pdf_link)
                .filter(|url| self.attempted.insert(url.to_string()))
                .take(MAX_PDFS_PER_RECORD)
                .collect();

            for url in targets {
                match self.fetch_text(&url).await {
                    Ok(text) => {
                        record.append_attachment(&text);
                        attached += 1;
                        info!(url = %url, record = %record.url, chars = text.len(), "attached pdf");
                    }
                    Err(err) => warn!(url = %url, error = %err, "skipping pdf"),
                }
            }
        }
        attached
    }

    /// Downloads one PDF, extracts its text, and stores the binary.
    pub async fn fetch_text(&self, url: &Url) -> Result<String, PdfError> {
        let response = self.client.get(url.as_str()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PdfError::Status(status));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains("application/pdf") {
            return Err(PdfError::NotPdf(content_type));
        }

        let bytes = read_body(response, self.max_bytes).await?;
        let (text, bytes) = extract_text(bytes).await?;
        if text.trim().is_empty() {
            return Err(PdfError::Empty);
        }

        let path = binary_path(&self.binary_dir, url.as_str());
        tokio::fs::create_dir_all(&self.binary_dir)
            .await
            .map_err(|source| PdfError::Io {
                path: self.binary_dir.clone(),
                source,
            })?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| PdfError::Io { path, source })?;
        Ok(text)
    }
}

/// Extracts on a blocking thread and hands the payload back for persisting.
async fn extract_text(bytes: Vec<u8>) -> Result<(String, Vec<u8>), PdfError> {
    tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem(&bytes)
            .map(|text| (text, bytes))
            .map_err(|err| PdfError::Extract(err.to_string()))
    })
    .await
    .map_err(|err| PdfError::Extract(err.to_string()))?
}

/// Links whose path ends in `.pdf`.
pub fn is_pdf_link(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https") && url.path().to_ascii_lowercase().ends_with(".pdf")
}

/// Content-addressed location of a downloaded PDF.
pub fn binary_path(dir: &Path, url: &str) -> PathBuf {
    let digest = Sha256::digest(url.as_bytes());
    dir.join(format!("{digest:x}.pdf"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record_with_links(url: &str, links: Vec<String>) -> RawRecord {
        RawRecord::new(
            url.into(),
            "Report".into(),
            String::new(),
            "intro".into(),
            "2024-01-01T00:00:00Z".into(),
            links,
        )
    }

    /// Smallest single-page PDF that renders `line` in Helvetica.
    fn one_line_pdf(line: &str) -> Vec<u8> {
        let stream = format!("BT /F1 24 Tf 72 720 Td ({line}) Tj ET");
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 5 0 R >> >> /Contents 4 0 R >>"
                .to_string(),
            format!("<< /Length {} >>\nstream\n{stream}\nendstream", stream.len()),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
                .to_string(),
        ];

        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::with_capacity(objects.len());
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
        }
        let xref = pdf.len();
        let mut table = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
        for offset in offsets {
            table.push_str(&format!("{offset:010} 00000 n \n"));
        }
        table.push_str(&format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref}\n%%EOF\n",
            objects.len() + 1
        ));
        pdf.extend_from_slice(table.as_bytes());
        pdf
    }

    #[test]
    fn recognizes_pdf_links() {
        let pdf = Url::parse("https://www.abf.co.uk/reports/Annual-Report.PDF?v=2").unwrap();
        let page = Url::parse("https://www.abf.co.uk/reports/pdf-library").unwrap();
        assert!(is_pdf_link(&pdf));
        assert!(!is_pdf_link(&page));
    }

    #[test]
    fn binary_paths_are_content_addressed() {
        let dir = Path::new("/data/raw/binary");
        let first = binary_path(dir, "https://a.test/report.pdf");
        assert_eq!(first, binary_path(dir, "https://a.test/report.pdf"));
        assert_ne!(first, binary_path(dir, "https://a.test/other.pdf"));
        let name = first.file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), 64 + ".pdf".len());
    }

    #[tokio::test]
    async fn rejects_wrong_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/report.pdf"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"),
            )
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let augmenter = PdfAugmenter::new(dir.path(), DEFAULT_MAX_PDF_BYTES).unwrap();
        let url = Url::parse(&format!("{}/report.pdf", server.uri())).unwrap();
        let err = augmenter.fetch_text(&url).await.expect_err("html rejected");
        assert!(matches!(err, PdfError::NotPdf(_)));
    }

    #[tokio::test]
    async fn rejects_oversize_payloads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big.pdf"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(vec![0u8; 2048], "application/pdf"),
            )
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let augmenter = PdfAugmenter::new(dir.path(), 1024).unwrap();
        let url = Url::parse(&format!("{}/big.pdf", server.uri())).unwrap();
        let err = augmenter.fetch_text(&url).await.expect_err("oversize rejected");
        assert!(matches!(err, PdfError::Oversize { limit: 1024, .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn each_pdf_url_is_fetched_once_per_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/shared.pdf"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        let pdf = format!("{}/shared.pdf", server.uri());
        let mut records = vec![
            record_with_links("https://a.test/one", vec![pdf.clone()]),
            record_with_links("https://a.test/two", vec![pdf.clone(), "https://a.test/page".into()]),
        ];
        let dir = tempfile::tempdir().unwrap();
        let mut augmenter = PdfAugmenter::new(dir.path(), DEFAULT_MAX_PDF_BYTES).unwrap();

        let attached = augmenter.augment(&mut records).await;
        assert_eq!(attached, 0);
        assert_eq!(records[0].markdown, "intro");
        assert!(records[1].attachments().is_empty());
    }

    #[tokio::test]
    async fn attaches_pdf_text_and_keeps_the_binary() {
        let server = MockServer::start().await;
        let payload = one_line_pdf("Twinings annual report");
        Mock::given(method("GET"))
            .and(path("/report.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(payload.clone(), "application/pdf"))
            .expect(1)
            .mount(&server)
            .await;
        let pdf = format!("{}/report.pdf", server.uri());
        let mut record = record_with_links("https://a.test/investors", vec![pdf.clone()]);
        record.html = "<html><body><p>page body</p></body></html>".into();
        let mut records = vec![record];
        let dir = tempfile::tempdir().unwrap();
        let mut augmenter = PdfAugmenter::new(dir.path(), DEFAULT_MAX_PDF_BYTES).unwrap();

        let attached = augmenter.augment(&mut records).await;

        assert_eq!(attached, 1);
        let record = &records[0];
        assert!(record.markdown.starts_with("intro\n"));
        assert!(record.markdown.contains("Twinings annual report"));
        assert_eq!(record.attachments().len(), 1);
        assert!(record.attachments()[0].contains("Twinings annual report"));

        let stored = std::fs::read(binary_path(dir.path(), &pdf)).unwrap();
        assert_eq!(stored, payload);

        let text = crate::normalizer::normalize_record(record);
        assert!(text.starts_with("page body"));
        assert!(text.contains("Twinings annual report"));
    }
}
