//! Embedding backend abstraction and adapters.
//!
//! Backends form a closed set ([`BackendKind::Local`] for an Ollama runtime,
//! [`BackendKind::Cloud`] for an OpenAI-compatible API) behind one capability trait. A
//! dataset selects its backend at creation time and every chunk in the dataset is embedded
//! through the same backend, which keeps dimensionality and model identity consistent. The
//! gateway is constructed once from configuration and passed by reference into the
//! pipeline; nothing here is looked up from global state.

/// Local Ollama-backed embedding adapter.
pub mod ollama;
/// Cloud OpenAI-compatible embedding adapter.
pub mod openai;

use crate::config::EngineConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Supported embedding backend families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local model runtime (Ollama).
    Local,
    /// Hosted embeddings API.
    Cloud,
}

impl std::str::FromStr for BackendKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "cloud" => Ok(Self::Cloud),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Cloud => f.write_str("cloud"),
        }
    }
}

/// A fixed-length vector tagged with the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    /// Vector components.
    pub values: Vec<f32>,
    /// Dimensionality of the vector.
    pub dimension: usize,
    /// Identifier of the producing model.
    pub model_id: String,
}

/// Errors raised by embedding backends and the gateway.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Embedding was requested for empty or whitespace-only text.
    #[error("embedding input must not be empty")]
    EmptyInput,
    /// Backend could not be reached or did not answer in time.
    #[error("{backend} embedding backend unavailable: {message}")]
    BackendUnavailable {
        /// Backend family that failed.
        backend: BackendKind,
        /// Transport-level detail.
        message: String,
    },
    /// Backend answered with something the adapter could not use.
    #[error("malformed embedding response: {0}")]
    InvalidResponse(String),
    /// Produced vector does not match the declared dimensionality.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension declared for the backend.
        expected: usize,
        /// Dimension actually produced.
        actual: usize,
    },
    /// No backend of the requested kind was configured.
    #[error("no {0} embedding backend configured")]
    NotConfigured(BackendKind),
}

impl EmbeddingError {
    /// Whether the failure is transient and worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Identifier of the model this backend embeds with.
    fn model_id(&self) -> &str;

    /// Dimensionality of every vector this backend produces.
    fn dimension(&self) -> usize;

    /// Produce one embedding per input text, preserving input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError>;
}

/// Routes embedding requests to the backend selected for a dataset.
///
/// Validation lives here rather than in the adapters: empty input fails before any network
/// call, and every returned vector is checked against the backend's declared dimension so a
/// misconfigured backend surfaces as [`EmbeddingError::DimensionMismatch`] instead of
/// silently indexing garbage.
pub struct EmbeddingGateway {
    backends: HashMap<BackendKind, Arc<dyn EmbeddingBackend>>,
}

impl EmbeddingGateway {
    /// Create a gateway with no backends registered.
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Register a backend for the given kind, replacing any previous one.
    pub fn with_backend(mut self, kind: BackendKind, backend: Arc<dyn EmbeddingBackend>) -> Self {
        self.backends.insert(kind, backend);
        self
    }

    /// Build a gateway from configuration.
    ///
    /// The local backend is always registered; the cloud backend only when an API key is
    /// configured.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut gateway = Self::new().with_backend(
            BackendKind::Local,
            Arc::new(ollama::OllamaBackend::new(
                config.ollama_url.clone(),
                config.embedding_model.clone(),
                config.embedding_dimension,
                config.embed_timeout,
            )),
        );

        if let Some(api_key) = config.openai_api_key.as_deref() {
            gateway = gateway.with_backend(
                BackendKind::Cloud,
                Arc::new(openai::OpenAiBackend::new(
                    api_key,
                    config.openai_url.clone(),
                    config.embedding_model.clone(),
                    config.embedding_dimension,
                    config.embed_timeout,
                )),
            );
        }

        gateway
    }

    /// Look up the backend registered for a kind.
    pub fn backend(&self, kind: BackendKind) -> Result<&Arc<dyn EmbeddingBackend>, EmbeddingError> {
        self.backends
            .get(&kind)
            .ok_or(EmbeddingError::NotConfigured(kind))
    }

    /// Embed a batch of texts through the backend of the given kind.
    ///
    /// Input order is preserved. Any empty or whitespace-only element fails the whole call
    /// with a validation error; a zero vector is never substituted.
    pub async fn embed_batch(
        &self,
        kind: BackendKind,
        texts: &[String],
    ) -> Result<Vec<Embedding>, EmbeddingError> {
        if texts.iter().any(|text| text.trim().is_empty()) {
            return Err(EmbeddingError::EmptyInput);
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let backend = self.backend(kind)?;
        let embeddings = backend.embed_batch(texts).await?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, backend returned {}",
                texts.len(),
                embeddings.len()
            )));
        }
        let expected = backend.dimension();
        for embedding in &embeddings {
            if embedding.dimension != expected {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: embedding.dimension,
                });
            }
        }

        Ok(embeddings)
    }

    /// Embed a single text through the backend of the given kind.
    pub async fn embed(&self, kind: BackendKind, text: &str) -> Result<Embedding, EmbeddingError> {
        let mut embeddings = self.embed_batch(kind, &[text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("backend returned no vectors".into()))
    }
}

impl Default for EmbeddingGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBackend {
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingBackend for FixedBackend {
        fn model_id(&self) -> &str {
            "fixed-test"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|_| Embedding {
                    values: vec![1.0; 3],
                    dimension: 3,
                    model_id: "fixed-test".to_string(),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn gateway_rejects_empty_input_before_dispatch() {
        let gateway = EmbeddingGateway::new()
            .with_backend(BackendKind::Local, Arc::new(FixedBackend { dimension: 3 }));
        let error = gateway
            .embed_batch(BackendKind::Local, &["  ".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(error, EmbeddingError::EmptyInput));
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn gateway_surfaces_missing_backend() {
        let gateway = EmbeddingGateway::new();
        let error = gateway.embed(BackendKind::Cloud, "query").await.unwrap_err();
        assert!(matches!(error, EmbeddingError::NotConfigured(BackendKind::Cloud)));
    }

    #[tokio::test]
    async fn gateway_checks_vector_dimension() {
        let gateway = EmbeddingGateway::new()
            .with_backend(BackendKind::Local, Arc::new(FixedBackend { dimension: 5 }));
        let error = gateway.embed(BackendKind::Local, "query").await.unwrap_err();
        assert!(matches!(
            error,
            EmbeddingError::DimensionMismatch {
                expected: 5,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn gateway_preserves_input_order() {
        let gateway = EmbeddingGateway::new()
            .with_backend(BackendKind::Local, Arc::new(FixedBackend { dimension: 3 }));
        let embeddings = gateway
            .embed_batch(
                BackendKind::Local,
                &["first".to_string(), "second".to_string()],
            )
            .await
            .expect("embeddings");
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].model_id, "fixed-test");
    }

    #[test]
    fn backend_kind_parses_from_str() {
        assert_eq!("local".parse(), Ok(BackendKind::Local));
        assert_eq!("Cloud".parse(), Ok(BackendKind::Cloud));
        assert!("edge".parse::<BackendKind>().is_err());
    }
}
