//! Request, outcome, and error types for the pipeline surface.

use crate::chunker::ChunkError;
use crate::embedding::EmbeddingError;
use crate::extract::ExtractError;
use crate::links::LinkError;
use crate::store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Errors emitted while wiring the pipeline from configuration.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Vector store could not be opened.
    #[error("Failed to open vector store: {0}")]
    Store(#[from] StoreError),
    /// Link registry could not be opened.
    #[error("Failed to open link registry: {0}")]
    Links(#[from] LinkError),
}

/// Errors emitted by the ingestion pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Chunking options were invalid for this ingestion.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkError),
    /// Embedding backend failed to produce vectors for the input text.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Vector store rejected the operation.
    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),
    /// Document extraction failed.
    #[error("Failed to extract document: {0}")]
    Extract(#[from] ExtractError),
}

/// Errors emitted while serving a retrieval query.
#[derive(Debug, Error)]
pub enum RetrieveError {
    /// Embedding backend failed to return a vector for the query text.
    #[error("Failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Vector store rejected the operation.
    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),
    /// Link registry interaction failed.
    #[error("Link registry failed: {0}")]
    Links(#[from] LinkError),
}

/// Summary of a completed ingestion produced by
/// [`crate::pipeline::PipelineService::ingest_text`].
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// Dataset the batch was committed to.
    pub dataset_id: String,
    /// Number of chunks committed by this ingestion.
    pub chunk_count: usize,
    /// Chunk size used during processing.
    pub chunk_size: usize,
    /// Chunks skipped within the request due to duplicate content.
    pub skipped_duplicates: usize,
    /// Total chunks in the dataset after the commit.
    pub total_chunks: usize,
}

/// Parameters for one retrieval query.
#[derive(Debug, Clone)]
pub struct RetrieveRequest {
    /// Consumer whose links scope and weight the query.
    pub consumer_id: String,
    /// Natural-language query text to embed.
    pub query_text: String,
    /// Maximum number of chunks in the assembled bundle.
    pub max_chunks: usize,
    /// Maximum cumulative token count in the assembled bundle.
    pub max_tokens: usize,
    /// Similarity threshold; the engine default applies when unset.
    pub threshold: Option<f32>,
    /// Optional query-intent tags used by the reranker.
    pub intent_tags: Vec<String>,
}

impl RetrieveRequest {
    /// Build a request with engine-default threshold and no intent tags.
    pub fn new(
        consumer_id: impl Into<String>,
        query_text: impl Into<String>,
        max_chunks: usize,
        max_tokens: usize,
    ) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            query_text: query_text.into(),
            max_chunks,
            max_tokens,
            threshold: None,
            intent_tags: Vec::new(),
        }
    }

    /// Set an explicit similarity threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Attach query-intent tags.
    pub fn with_intent_tags(mut self, tags: Vec<String>) -> Self {
        self.intent_tags = tags;
        self
    }
}

/// Backoff policy for retryable embedding failures during ingestion.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Number of retries after the initial attempt.
    pub max_retries: usize,
    /// Delay before the first retry; doubles on each subsequent attempt.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}
