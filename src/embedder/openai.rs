//! OpenAI-compatible embeddings backend.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use super::{EmbedError, EmbeddingBackend};

/// Async client for `POST {base}/embeddings` with bearer authentication.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
}

impl OpenAiEmbedder {
    /// Builds a new OpenAI embeddings client.
    pub fn new(api_key: &str, base_url: &str, model: &str, timeout: Duration) -> Result<Self, EmbedError> {
        if api_key.trim().is_empty() {
            return Err(EmbedError::Configuration("missing OpenAI API key".into()));
        }
        if model.trim().is_empty() {
            return Err(EmbedError::Configuration("missing OpenAI model name".into()));
        }
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| EmbedError::Configuration("invalid OpenAI API key".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

impl EmbeddingBackend for OpenAiEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };
        let response = self.client.post(&self.endpoint).json(&request).send().await?;
        read_embeddings(response, inputs.len()).await
    }
}

#[derive(Serialize)]
pub(crate) struct EmbeddingRequest<'a> {
    pub(crate) model: &'a str,
    pub(crate) input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Decodes an `{data: [{embedding, index}]}` response, restoring input order.
pub(crate) async fn read_embeddings(response: Response, expected: usize) -> Result<Vec<Vec<f32>>, EmbedError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        return Err(EmbedError::from_status(status, body));
    }
    let mut parsed: EmbeddingResponse = response
        .json()
        .await
        .map_err(|err| EmbedError::Malformed(err.to_string()))?;
    parsed.data.sort_by_key(|entry| entry.index);
    if parsed.data.len() != expected {
        return Err(EmbedError::CountMismatch {
            expected,
            got: parsed.data.len(),
        });
    }
    Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
}
