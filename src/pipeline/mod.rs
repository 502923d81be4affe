//! Ingestion and retrieval orchestration.
//!
//! [`PipelineService`] sequences the pipeline end to end. Ingestion for one dataset runs
//! chunk → embed → commit sequentially; independent datasets ingest in parallel, with the
//! vector store serializing writers per dataset id. Retrieval is read-only and may run with
//! unlimited parallelism against dataset snapshots.

mod service;
mod types;

pub use service::{PipelineService, compute_chunk_hash};
pub use types::{
    IngestError, IngestOutcome, RetrieveError, RetrieveRequest, RetryPolicy, SetupError,
};
