#![deny(missing_docs)]

//! Core library for the Docshelf retrieval engine.

/// Chunk boundary policies and token accounting.
pub mod chunker;
/// Environment-driven configuration management.
pub mod config;
/// Context bundle assembly and source attribution.
pub mod context;
/// Embedding backend abstraction and adapters.
pub mod embedding;
/// Document extractor interface and the built-in plain-text extractor.
pub mod extract;
/// Consumer link registry and weighting preferences.
pub mod links;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion and query metrics helpers.
pub mod metrics;
/// Ingestion and retrieval orchestration.
pub mod pipeline;
/// Contextual score adjustment for retrieval results.
pub mod rerank;
/// Similarity search over stored chunk vectors.
pub mod retrieval;
/// Durable dataset, chunk, and vector storage.
pub mod store;
