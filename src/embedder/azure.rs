//! Azure AI Inference embeddings backend.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;

use super::openai::{read_embeddings, EmbeddingRequest};
use super::{EmbedError, EmbeddingBackend};

/// API version pinned for the `/embeddings` route.
pub const AZURE_API_VERSION: &str = "2024-05-01-preview";

/// Async client for Azure AI Inference `/embeddings` using the `api-key` header.
#[derive(Clone)]
pub struct AzureEmbedder {
    client: Client,
    endpoint: String,
    model: String,
}

impl AzureEmbedder {
    /// Builds a new Azure embeddings client.
    ///
    /// `endpoint` is the models base URL, e.g. `https://<resource>.services.ai.azure.com/models`.
    pub fn new(api_key: &str, endpoint: &str, model: &str, timeout: Duration) -> Result<Self, EmbedError> {
        if api_key.trim().is_empty() {
            return Err(EmbedError::Configuration("missing Azure embedding key".into()));
        }
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(EmbedError::Configuration(
                "Azure endpoint must be an http(s) URL".into(),
            ));
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            "api-key",
            HeaderValue::from_str(api_key.trim())
                .map_err(|_| EmbedError::Configuration("invalid Azure embedding key".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", endpoint.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

impl EmbeddingBackend for AzureEmbedder {
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
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("api-version", AZURE_API_VERSION)])
            .json(&request)
            .send()
            .await?;
        read_embeddings(response, inputs.len()).await
    }
}
