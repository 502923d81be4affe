use crate::chunker::ChunkStrategy;
use crate::embedding::BackendKind;
use crate::rerank::RerankWeights;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the Docshelf engine.
///
/// The value is loaded once (usually via [`EngineConfig::from_env`]) and passed by reference
/// into the components that need it; there is no process-global configuration cache.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding dataset snapshots and the consumer link file.
    pub data_dir: PathBuf,
    /// Embedding backend used for datasets that do not specify one.
    pub backend: BackendKind,
    /// Embedding model identifier passed to the backend.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the local Ollama runtime.
    pub ollama_url: Option<String>,
    /// Base URL of the cloud embeddings API.
    pub openai_url: Option<String>,
    /// API key for the cloud embeddings API.
    pub openai_api_key: Option<String>,
    /// Optional override for the automatic chunk size selection.
    pub chunk_size: Option<usize>,
    /// Token overlap between consecutive chunks.
    pub chunk_overlap: usize,
    /// Chunk boundary strategy applied during ingestion.
    pub chunk_strategy: ChunkStrategy,
    /// Bias automatic chunk sizing toward smaller chunks.
    pub chunk_safe_defaults: bool,
    /// Timeout applied to each embedding backend call.
    pub embed_timeout: Duration,
    /// Retry budget for retryable embedding failures during ingestion.
    pub embed_max_retries: usize,
    /// Similarity threshold applied when a retrieval request does not set one.
    pub search_default_threshold: f32,
    /// Score adjustment constants used by the reranker.
    pub rerank: RerankWeights,
}

impl EngineConfig {
    /// Load configuration from environment variables, performing validation along the way.
    ///
    /// Reads a `.env` file when present. `EMBEDDING_MODEL` and `EMBEDDING_DIMENSION` are
    /// required; everything else falls back to the defaults in [`EngineConfig::default`].
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Ok(Self {
            data_dir: load_env_optional("DOCSHELF_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            backend: match load_env_optional("EMBEDDING_BACKEND") {
                Some(value) => value
                    .parse()
                    .map_err(|()| ConfigError::InvalidValue("EMBEDDING_BACKEND".to_string()))?,
                None => defaults.backend,
            },
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: load_env("EMBEDDING_DIMENSION")?
                .parse()
                .map_err(|_| ConfigError::InvalidValue("EMBEDDING_DIMENSION".to_string()))?,
            ollama_url: load_env_optional("OLLAMA_URL"),
            openai_url: load_env_optional("OPENAI_BASE_URL"),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            chunk_size: parse_optional("CHUNK_SIZE")?,
            chunk_overlap: parse_optional("CHUNK_OVERLAP")?.unwrap_or(defaults.chunk_overlap),
            chunk_strategy: match load_env_optional("CHUNK_STRATEGY") {
                Some(value) => value
                    .parse()
                    .map_err(|()| ConfigError::InvalidValue("CHUNK_STRATEGY".to_string()))?,
                None => defaults.chunk_strategy,
            },
            chunk_safe_defaults: load_env_optional("CHUNK_SAFE_DEFAULTS")
                .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.chunk_safe_defaults),
            embed_timeout: parse_optional::<u64>("EMBED_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.embed_timeout),
            embed_max_retries: parse_optional("EMBED_MAX_RETRIES")?
                .unwrap_or(defaults.embed_max_retries),
            search_default_threshold: parse_optional("SEARCH_DEFAULT_THRESHOLD")?
                .unwrap_or(defaults.search_default_threshold),
            rerank: rerank_from_env(defaults.rerank)?,
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            backend: BackendKind::Local,
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dimension: 768,
            ollama_url: None,
            openai_url: None,
            openai_api_key: None,
            chunk_size: None,
            chunk_overlap: 0,
            chunk_strategy: ChunkStrategy::Fixed,
            chunk_safe_defaults: false,
            embed_timeout: Duration::from_secs(30),
            embed_max_retries: 3,
            search_default_threshold: 0.25,
            rerank: RerankWeights::default(),
        }
    }
}

fn rerank_from_env(mut weights: RerankWeights) -> Result<RerankWeights, ConfigError> {
    if let Some(value) = parse_optional("RERANK_SPECIALTY_BOOST")? {
        weights.specialty_boost = value;
    }
    if let Some(value) = parse_optional("RERANK_TAG_OVERLAP_FACTOR")? {
        weights.tag_overlap_factor = value;
    }
    if let Some(value) = parse_optional("RERANK_RECENCY_BOOST")? {
        weights.recency_boost = value;
    }
    if let Some(hours) = parse_optional::<i64>("RERANK_RECENCY_WINDOW_HOURS")? {
        weights.recency_window = time::Duration::hours(hours);
    }
    Ok(weights)
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}
