//! Shared types for the vector store.

use crate::embedding::BackendKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by vector store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No dataset with the given id exists.
    #[error("dataset '{0}' not found")]
    DatasetNotFound(String),
    /// A dataset with the given id already exists.
    #[error("dataset '{0}' already exists")]
    DatasetExists(String),
    /// Dataset id contains characters unsuitable for a snapshot filename.
    #[error("invalid dataset id '{0}'")]
    InvalidDatasetId(String),
    /// Dataset was declared with a zero embedding dimension.
    #[error("dataset '{0}' must declare a non-zero embedding dimension")]
    InvalidDimension(String),
    /// A committed vector does not match the dataset's established dimension.
    #[error("dimension mismatch for dataset '{dataset}': expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dataset the batch was committed to.
        dataset: String,
        /// Dimension established at dataset creation.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },
    /// Filesystem interaction failed.
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// A snapshot file exists but could not be decoded.
    #[error("corrupt snapshot at {path}: {source}")]
    Corrupt {
        /// Path of the unreadable snapshot.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}

/// Processing state of a dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    /// Created but never ingested.
    Pending,
    /// An ingestion batch is in flight.
    Processing,
    /// Queryable; reflects the most recent completed commit.
    Ready,
    /// The last ingestion attempt failed; see the recorded error.
    Failed,
}

impl std::fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A named corpus of ingested material.
///
/// Every chunk in a dataset shares the embedding backend, model, and dimensionality recorded
/// here; a dataset is only queryable while its status is [`DatasetStatus::Ready`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    /// Stable identifier, also the snapshot filename stem.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Free-form source classification (e.g. `medical_records`, `school_papers`).
    pub source_kind: String,
    /// Embedding backend selected at creation time.
    pub backend: BackendKind,
    /// Embedding model identity shared by all chunks.
    pub embedding_model: String,
    /// Dimensionality shared by all chunk vectors.
    pub embedding_dimension: usize,
    /// Current processing status.
    pub status: DatasetStatus,
    /// Number of committed chunks.
    pub chunk_count: usize,
    /// Error message recorded when the status is `failed`.
    pub error: Option<String>,
    /// RFC3339 creation timestamp.
    pub created_at: String,
}

/// Parameters for creating a dataset.
#[derive(Debug, Clone)]
pub struct NewDataset {
    /// Optional explicit id; a UUID is generated when omitted.
    pub id: Option<String>,
    /// Display name.
    pub name: String,
    /// Free-form source classification.
    pub source_kind: String,
    /// Embedding backend for all ingestion into this dataset.
    pub backend: BackendKind,
    /// Embedding model identity.
    pub embedding_model: String,
    /// Expected vector dimensionality.
    pub embedding_dimension: usize,
}

/// One committed chunk with its embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Unique chunk identifier.
    pub id: Uuid,
    /// Owning dataset.
    pub dataset_id: String,
    /// 0-based position within the dataset, unique and monotonically increasing.
    pub ordinal: usize,
    /// Chunk text content.
    pub text: String,
    /// Character offset of the chunk's first token in the extracted source text.
    pub char_start: usize,
    /// Exclusive character offset of the chunk's last token.
    pub char_end: usize,
    /// Section heading the chunk falls under, when known.
    pub section_title: Option<String>,
    /// 1-based page number, when the source had page breaks.
    pub page_number: Option<u32>,
    /// Token count recorded by the chunker.
    pub token_count: usize,
    /// Normalized tags attached at ingestion.
    pub tags: Vec<String>,
    /// Stable digest of the chunk text, used for dedupe.
    pub chunk_hash: String,
    /// Embedding vector, dimension fixed per dataset.
    pub vector: Vec<f32>,
}

/// A chunk prepared for commit; the store assigns id and ordinal.
#[derive(Debug, Clone)]
pub struct ChunkInsert {
    /// Chunk text content.
    pub text: String,
    /// Character offset of the first token.
    pub char_start: usize,
    /// Exclusive character offset of the last token.
    pub char_end: usize,
    /// Section heading, when known.
    pub section_title: Option<String>,
    /// 1-based page number, when known.
    pub page_number: Option<u32>,
    /// Token count recorded by the chunker.
    pub token_count: usize,
    /// Normalized tags.
    pub tags: Vec<String>,
    /// Stable digest of the chunk text.
    pub chunk_hash: String,
    /// Embedding vector.
    pub vector: Vec<f32>,
}

/// An immutable view of one dataset as of its most recent completed commit.
///
/// The chunk list is shared via `Arc`, so holding a snapshot never blocks writers and a
/// snapshot never observes a half-committed batch.
#[derive(Debug, Clone)]
pub struct DatasetSnapshot {
    /// Dataset metadata at snapshot time.
    pub meta: Dataset,
    /// Committed chunks in ordinal order.
    pub chunks: Arc<Vec<ChunkRecord>>,
}
