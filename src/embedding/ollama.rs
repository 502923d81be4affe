//! Local embedding backend backed by an Ollama runtime.
//!
//! The adapter issues plain HTTP requests to the runtime's batch embed endpoint. Transport
//! failures and timeouts surface as retryable [`EmbeddingError::BackendUnavailable`];
//! everything else is a hard error for the caller to inspect.

use super::{BackendKind, Embedding, EmbeddingBackend, EmbeddingError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Embedding client for a local Ollama runtime.
pub struct OllamaBackend {
    http: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaBackend {
    /// Construct a backend for the given runtime URL, model, and declared dimension.
    pub fn new(
        base_url: Option<String>,
        model: String,
        dimension: usize,
        timeout: Duration,
    ) -> Self {
        let http = Client::builder()
            .user_agent("docshelf/embed")
            .timeout(timeout)
            .build()
            .expect("Failed to construct reqwest::Client for Ollama embeddings");
        Self {
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            model,
            dimension,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let payload = json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| EmbeddingError::BackendUnavailable {
                backend: BackendKind::Local,
                message: format!("failed to reach Ollama at {}: {error}", self.base_url),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::BackendUnavailable {
                backend: BackendKind::Local,
                message: format!("Ollama returned {status}: {body}"),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::InvalidResponse(format!(
                "Ollama rejected the request ({status}): {body}"
            )));
        }

        let body: OllamaEmbedResponse = response.json().await.map_err(|error| {
            EmbeddingError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        Ok(body
            .embeddings
            .into_iter()
            .map(|values| Embedding {
                dimension: values.len(),
                values,
                model_id: self.model.clone(),
            })
            .collect())
    }
}
