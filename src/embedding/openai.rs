//! Cloud embedding backend for OpenAI-compatible APIs.

use super::{BackendKind, Embedding, EmbeddingBackend, EmbeddingError};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Embedding client for a hosted OpenAI-compatible endpoint.
pub struct OpenAiBackend {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl OpenAiBackend {
    /// Construct a backend authenticated with the given API key.
    pub fn new(
        api_key: &str,
        base_url: Option<String>,
        model: String,
        dimension: usize,
        timeout: Duration,
    ) -> Self {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).expect("API key contains invalid header characters"),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .user_agent("docshelf/embed")
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .expect("Failed to construct reqwest::Client for cloud embeddings");

        let base = base_url.unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());
        let endpoint = format!("{}/embeddings", base.trim_end_matches('/'));

        Self {
            http,
            endpoint,
            model,
            dimension,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingBackend for OpenAiBackend {
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
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|error| EmbeddingError::BackendUnavailable {
                backend: BackendKind::Cloud,
                message: format!("failed to reach {}: {error}", self.endpoint),
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::BackendUnavailable {
                backend: BackendKind::Cloud,
                message: format!("embeddings API returned {status}: {body}"),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::InvalidResponse(format!(
                "embeddings API rejected the request ({status}): {body}"
            )));
        }

        let body: EmbeddingResponse = response.json().await.map_err(|error| {
            EmbeddingError::InvalidResponse(format!("failed to decode embeddings response: {error}"))
        })?;

        // The API reports an index per row; order by it so output matches input order.
        let mut rows = body.data;
        rows.sort_by_key(|row| row.index);

        Ok(rows
            .into_iter()
            .map(|row| Embedding {
                dimension: row.embedding.len(),
                values: row.embedding,
                model_id: self.model.clone(),
            })
            .collect())
    }
}
