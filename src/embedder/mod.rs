//! Embedding backends plus the batching client that retries rate-limited calls.

pub mod azure;
pub mod openai;

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::controls::{EmbeddingArgs, EmbeddingProvider};

pub use azure::AzureEmbedder;
pub use openai::OpenAiEmbedder;

/// Default number of texts per embedding request.
pub const DEFAULT_BATCH_SIZE: usize = 90;
/// Attempts made for one batch before a rate limit becomes fatal.
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Embedding failures.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The backend answered HTTP 429.
    #[error("embedding backend rate limited the request")]
    RateLimited,
    /// Transport failure or timeout.
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Any other non-success status.
    #[error("embedding backend returned {status}: {body}")]
    Status {
        /// Response status.
        status: StatusCode,
        /// Response body, for diagnostics.
        body: String,
    },
    /// The backend responded with an unexpected payload.
    #[error("malformed embedding response: {0}")]
    Malformed(String),
    /// Number of vectors differs from number of inputs.
    #[error("backend returned {got} embeddings for {expected} inputs")]
    CountMismatch {
        /// Inputs sent.
        expected: usize,
        /// Vectors received.
        got: usize,
    },
    /// Vectors of one run disagree on dimension.
    #[error("embedding dimension {got} does not match {expected}")]
    DimensionMismatch {
        /// Dimension established earlier in the run.
        expected: usize,
        /// Offending dimension.
        got: usize,
    },
    /// A batch stayed rate limited through every attempt.
    #[error("batch {batch} still rate limited after {attempts} attempts")]
    RetriesExhausted {
        /// Zero-based batch index.
        batch: usize,
        /// Attempts made.
        attempts: usize,
    },
    /// The backend could not be configured.
    #[error("invalid embedding configuration: {0}")]
    Configuration(String),
}

impl EmbedError {
    /// Whether the failure is a retryable rate limit.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, EmbedError::RateLimited)
    }

    pub(crate) fn from_status(status: StatusCode, body: String) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            EmbedError::RateLimited
        } else {
            EmbedError::Status { status, body }
        }
    }
}

/// A remote model that turns texts into vectors.
///
/// Implementations return exactly one vector per input, in input order.
pub trait EmbeddingBackend {
    /// Model identifier recorded alongside the snapshot.
    fn model(&self) -> &str;

    /// Embeds one batch.
    fn embed(&self, inputs: &[&str]) -> impl Future<Output = Result<Vec<Vec<f32>>, EmbedError>>;
}

/// Either supported HTTP backend, chosen at runtime.
pub enum AnyEmbedder {
    /// Azure AI Inference.
    Azure(AzureEmbedder),
    /// OpenAI-compatible API.
    OpenAi(OpenAiEmbedder),
}

impl AnyEmbedder {
    /// Builds the backend selected by `args`.
    pub fn from_args(args: &EmbeddingArgs) -> Result<Self, EmbedError> {
        let embedder = match args.embedding_provider {
            EmbeddingProvider::Azure => AnyEmbedder::Azure(AzureEmbedder::new(
                &args.embedding_key,
                &args.embedding_endpoint,
                &args.embedding_model,
                args.timeout(),
            )?),
            EmbeddingProvider::Openai => AnyEmbedder::OpenAi(OpenAiEmbedder::new(
                &args.embedding_key,
                &args.embedding_endpoint,
                &args.embedding_model,
                args.timeout(),
            )?),
        };
        Ok(embedder)
    }
}

impl EmbeddingBackend for AnyEmbedder {
    fn model(&self) -> &str {
        match self {
            AnyEmbedder::Azure(inner) => inner.model(),
            AnyEmbedder::OpenAi(inner) => inner.model(),
        }
    }

    async fn embed(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        match self {
            AnyEmbedder::Azure(inner) => inner.embed(inputs).await,
            AnyEmbedder::OpenAi(inner) => inner.embed(inputs).await,
        }
    }
}

/// Splits work into batches and retries rate-limited batches with base-2 backoff.
pub struct EmbeddingClient<B> {
    backend: B,
    batch_size: usize,
    max_attempts: usize,
    backoff_unit: Duration,
}

impl<B: EmbeddingBackend> EmbeddingClient<B> {
    /// Wraps `backend` with the given batch size, 5 attempts, and a one-second backoff unit.
    pub fn new(backend: B, batch_size: usize) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_unit: Duration::from_secs(1),
        }
    }

    /// Overrides the base wait between rate-limited attempts.
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Overrides the number of attempts per batch.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Model identifier of the wrapped backend.
    pub fn model(&self) -> &str {
        self.backend.model()
    }

    /// Wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Embeds every text, one vector per input in order, all of one dimension.
    pub async fn embed_all(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        let mut dimension: Option<usize> = None;

        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            let embedded = self.embed_batch(batch_index, batch).await?;
            if embedded.len() != batch.len() {
                return Err(EmbedError::CountMismatch {
                    expected: batch.len(),
                    got: embedded.len(),
                });
            }
            for vector in &embedded {
                let expected = *dimension.get_or_insert(vector.len());
                if vector.len() != expected {
                    return Err(EmbedError::DimensionMismatch {
                        expected,
                        got: vector.len(),
                    });
                }
            }
            debug!(batch = batch_index, size = batch.len(), "embedded batch");
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    async fn embed_batch(&self, batch_index: usize, batch: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.backend.embed(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if err.is_rate_limit() && attempt < self.max_attempts => {
                    let wait = self.backoff_unit * (1u32 << (attempt - 1));
                    warn!(
                        batch = batch_index,
                        attempt,
                        wait_secs = wait.as_secs_f32(),
                        "embedding rate limited; backing off"
                    );
                    sleep(wait).await;
                }
                Err(err) if err.is_rate_limit() => {
                    error!(batch = batch_index, attempts = attempt, "embedding retries exhausted");
                    return Err(EmbedError::RetriesExhausted {
                        batch: batch_index,
                        attempts: attempt,
                    });
                }
                Err(err) => {
                    error!(batch = batch_index, error = %err, "embedding failed");
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tokio::time::Instant;

    /// Scripted backend: pops one outcome per call, then echoes input lengths.
    struct Scripted {
        failures: RefCell<Vec<EmbedError>>,
        calls: RefCell<Vec<usize>>,
    }

    impl Scripted {
        fn new(failures: Vec<EmbedError>) -> Self {
            Self {
                failures: RefCell::new(failures),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl EmbeddingBackend for Scripted {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn embed(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.calls.borrow_mut().push(inputs.len());
            let next = {
                let mut failures = self.failures.borrow_mut();
                (!failures.is_empty()).then(|| failures.remove(0))
            };
            if let Some(err) = next {
                return Err(err);
            }
            Ok(inputs.iter().map(|text| vec![text.len() as f32, 1.0]).collect())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limits_with_doubling_waits() {
        let client = EmbeddingClient::new(
            Scripted::new(vec![EmbedError::RateLimited, EmbedError::RateLimited]),
            90,
        );
        let started = Instant::now();
        let vectors = client.embed_all(&["a", "bb"]).await.unwrap();

        assert_eq!(vectors, vec![vec![1.0, 1.0], vec![2.0, 1.0]]);
        assert_eq!(client.backend.calls.borrow().len(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_five_attempts() {
        let failures = (0..5).map(|_| EmbedError::RateLimited).collect();
        let client = EmbeddingClient::new(Scripted::new(failures), 90);
        let started = Instant::now();
        let err = client.embed_all(&["a"]).await.expect_err("exhausted");

        assert!(matches!(err, EmbedError::RetriesExhausted { batch: 0, attempts: 5 }));
        assert_eq!(client.backend.calls.borrow().len(), 5);
        assert_eq!(started.elapsed(), Duration::from_secs(1 + 2 + 4 + 8));
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        let client = EmbeddingClient::new(
            Scripted::new(vec![EmbedError::Status {
                status: StatusCode::UNAUTHORIZED,
                body: "bad key".into(),
            }]),
            90,
        );
        let err = client.embed_all(&["a"]).await.expect_err("fatal");
        assert!(matches!(err, EmbedError::Status { .. }));
        assert_eq!(client.backend.calls.borrow().len(), 1);
    }

    #[tokio::test]
    async fn batches_respect_size_and_order() {
        let client = EmbeddingClient::new(Scripted::new(Vec::new()), 2);
        let texts = ["a", "bb", "ccc", "dddd", "eeeee"];
        let vectors = client.embed_all(&texts).await.unwrap();

        assert_eq!(*client.backend.calls.borrow(), vec![2, 2, 1]);
        let lens: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lens, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn only_429_maps_to_rate_limited() {
        assert!(EmbedError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_rate_limit());
        assert!(!EmbedError::from_status(StatusCode::BAD_GATEWAY, String::new()).is_rate_limit());
    }
}
