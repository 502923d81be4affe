//! Pipeline service coordinating chunking, embedding, storage, and retrieval.

use crate::{
    chunker::{ChunkDraft, ChunkOptions, ChunkStrategy, chunk, determine_chunk_size},
    config::EngineConfig,
    context::{ContextBundle, assemble},
    embedding::{EmbeddingError, EmbeddingGateway},
    extract::{DocumentExtractor, page_breaks, page_for_offset},
    links::{ConsumerLink, ConsumerRegistry, LinkStore, normalize_tags},
    metrics::{MetricsSnapshot, PipelineMetrics},
    pipeline::types::{IngestError, IngestOutcome, RetrieveError, RetrieveRequest, RetryPolicy, SetupError},
    rerank::{RerankContext, RerankWeights, rerank},
    retrieval::{LinkContext, SearchParams, rank_cmp, search},
    store::{ChunkInsert, Dataset, DatasetSnapshot, DatasetStatus, NewDataset, StoreError, VectorStore},
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use time::OffsetDateTime;
use walkdir::WalkDir;

/// Candidate oversampling ahead of reranking: the engine scores this many times
/// `max_chunks` so the reranker has room to reorder before assembly truncates.
const CANDIDATE_POOL_FACTOR: usize = 4;

/// Coordinates the full pipeline: chunking, embedding, atomic commits, and retrieval.
///
/// The service owns long-lived handles to the vector store, embedding gateway, consumer
/// registry, and metrics. Construct it once near process start and share it through an
/// `Arc`; every collaborator is injected rather than resolved from global state.
pub struct PipelineService {
    store: Arc<VectorStore>,
    gateway: Arc<EmbeddingGateway>,
    registry: Arc<dyn ConsumerRegistry>,
    metrics: Arc<PipelineMetrics>,
    chunk_size_override: Option<usize>,
    chunk_overlap: usize,
    chunk_strategy: ChunkStrategy,
    chunk_safe_defaults: bool,
    retry: RetryPolicy,
    rerank_weights: RerankWeights,
    default_threshold: f32,
    default_backend: crate::embedding::BackendKind,
    default_model: String,
    default_dimension: usize,
}

impl PipelineService {
    /// Build a service from pre-constructed collaborators.
    pub fn new(
        config: &EngineConfig,
        store: Arc<VectorStore>,
        gateway: Arc<EmbeddingGateway>,
        registry: Arc<dyn ConsumerRegistry>,
    ) -> Self {
        Self {
            store,
            gateway,
            registry,
            metrics: Arc::new(PipelineMetrics::new()),
            chunk_size_override: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            chunk_strategy: config.chunk_strategy,
            chunk_safe_defaults: config.chunk_safe_defaults,
            retry: RetryPolicy {
                max_retries: config.embed_max_retries,
                ..RetryPolicy::default()
            },
            rerank_weights: config.rerank,
            default_threshold: config.search_default_threshold,
            default_backend: config.backend,
            default_model: config.embedding_model.clone(),
            default_dimension: config.embedding_dimension,
        }
    }

    /// Wire the service from configuration alone.
    ///
    /// Opens the vector store under `<data_dir>/datasets`, the link registry at
    /// `<data_dir>/links.json`, and builds the embedding gateway. The link store is
    /// returned alongside the service so callers can manage links and specialty tags.
    pub fn from_config(config: &EngineConfig) -> Result<(Self, Arc<LinkStore>), SetupError> {
        let store = Arc::new(VectorStore::open(config.data_dir.join("datasets"))?);
        let links = Arc::new(LinkStore::open(config.data_dir.join("links.json"))?);
        let gateway = Arc::new(EmbeddingGateway::from_config(config));
        let registry: Arc<dyn ConsumerRegistry> = Arc::clone(&links) as Arc<dyn ConsumerRegistry>;
        Ok((Self::new(config, store, gateway, registry), links))
    }

    /// Replace the retry policy used for retryable embedding failures.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Shared handle to the underlying vector store.
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Register a new dataset in `pending` state.
    pub fn create_dataset(&self, spec: NewDataset) -> Result<Dataset, StoreError> {
        self.store.create_dataset(spec)
    }

    /// Register a dataset using the engine's configured backend, model, and dimension.
    pub fn create_default_dataset(
        &self,
        id: Option<String>,
        name: impl Into<String>,
        source_kind: impl Into<String>,
    ) -> Result<Dataset, StoreError> {
        self.store.create_dataset(NewDataset {
            id,
            name: name.into(),
            source_kind: source_kind.into(),
            backend: self.default_backend,
            embedding_model: self.default_model.clone(),
            embedding_dimension: self.default_dimension,
        })
    }

    /// Delete a dataset and all of its chunks.
    ///
    /// Consumer links pointing at the dataset may remain; they simply contribute zero
    /// candidates to future queries.
    pub fn delete_dataset(&self, dataset_id: &str) -> Result<(), StoreError> {
        self.store.delete_dataset(dataset_id)
    }

    /// Chunk, embed, and commit raw text into a dataset.
    ///
    /// The batch is committed atomically; on embedding exhaustion the dataset transitions
    /// to `failed` with the error recorded, and on cancellation or validation failure it
    /// keeps its prior status. Tags are normalized and attached to every chunk.
    pub async fn ingest_text(
        &self,
        dataset_id: &str,
        text: &str,
        tags: Vec<String>,
    ) -> Result<IngestOutcome, IngestError> {
        let dataset = self
            .store
            .dataset(dataset_id)
            .ok_or_else(|| StoreError::DatasetNotFound(dataset_id.to_string()))?;

        let chunk_size = determine_chunk_size(
            self.chunk_size_override,
            dataset.backend,
            &dataset.embedding_model,
            self.chunk_safe_defaults,
        );
        let options = ChunkOptions::new(chunk_size, self.chunk_overlap, self.chunk_strategy);
        tracing::debug!(
            dataset = dataset_id,
            chunk_size,
            overlap = self.chunk_overlap,
            strategy = ?self.chunk_strategy,
            "Derived chunking options"
        );

        // Validation failures surface before the dataset's status is touched.
        let drafts = chunk(text, &options)?;
        let (prepared, skipped_duplicates) = dedupe_drafts(drafts);
        let tags = normalize_tags(tags);

        if prepared.is_empty() {
            tracing::info!(dataset = dataset_id, "Nothing to ingest after chunking");
            return Ok(IngestOutcome {
                dataset_id: dataset_id.to_string(),
                chunk_count: 0,
                chunk_size,
                skipped_duplicates,
                total_chunks: dataset.chunk_count,
            });
        }

        self.store
            .set_status(dataset_id, DatasetStatus::Processing, None)?;
        let guard = StatusGuard::new(Arc::clone(&self.store), dataset_id, dataset.status);

        let texts: Vec<String> = prepared.iter().map(|p| p.draft.text.clone()).collect();
        let embeddings = match self.embed_with_retry(&dataset, &texts).await {
            Ok(embeddings) => embeddings,
            Err(error) => return Err(self.fail_ingestion(dataset_id, guard, error)),
        };

        for embedding in &embeddings {
            if embedding.dimension != dataset.embedding_dimension {
                let error = EmbeddingError::DimensionMismatch {
                    expected: dataset.embedding_dimension,
                    actual: embedding.dimension,
                };
                return Err(self.fail_ingestion(dataset_id, guard, error));
            }
        }

        debug_assert_eq!(prepared.len(), embeddings.len());
        let breaks = page_breaks(text);
        let inserts: Vec<ChunkInsert> = prepared
            .into_iter()
            .zip(embeddings)
            .map(|(prepared, embedding)| ChunkInsert {
                page_number: page_for_offset(&breaks, prepared.draft.char_start),
                text: prepared.draft.text,
                char_start: prepared.draft.char_start,
                char_end: prepared.draft.char_end,
                section_title: prepared.draft.section_title,
                token_count: prepared.draft.token_count,
                tags: tags.clone(),
                chunk_hash: prepared.chunk_hash,
                vector: embedding.values,
            })
            .collect();

        let chunk_count = self.store.commit_dataset(dataset_id, inserts)?;
        guard.disarm();

        let total_chunks = self
            .store
            .dataset(dataset_id)
            .map(|meta| meta.chunk_count)
            .unwrap_or(chunk_count);
        self.metrics.record_document(chunk_count as u64);
        tracing::info!(
            dataset = dataset_id,
            chunks = chunk_count,
            chunk_size,
            skipped_duplicates,
            total_chunks,
            "Document ingested"
        );

        Ok(IngestOutcome {
            dataset_id: dataset_id.to_string(),
            chunk_count,
            chunk_size,
            skipped_duplicates,
            total_chunks,
        })
    }

    /// Extract a document with the given extractor and ingest its text.
    pub async fn ingest_file(
        &self,
        dataset_id: &str,
        path: &Path,
        extractor: &dyn DocumentExtractor,
        tags: Vec<String>,
    ) -> Result<IngestOutcome, IngestError> {
        let document = extractor.extract(path)?;
        tracing::info!(
            dataset = dataset_id,
            path = %path.display(),
            title = ?document.metadata.title,
            pages = ?document.metadata.page_count,
            "Ingesting document"
        );
        self.ingest_text(dataset_id, &document.text, tags).await
    }

    /// Walk a directory and ingest every file the extractor supports.
    ///
    /// Individual documents that fail to ingest are logged and skipped so one bad file does
    /// not abort the rest of the walk.
    pub async fn ingest_directory(
        &self,
        dataset_id: &str,
        dir: &Path,
        extractor: &dyn DocumentExtractor,
        tags: Vec<String>,
    ) -> Result<Vec<IngestOutcome>, IngestError> {
        if !dir.is_dir() {
            return Err(IngestError::Extract(
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} is not a directory", dir.display()),
                )
                .into(),
            ));
        }

        let mut outcomes = Vec::new();
        for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
            let path = entry.path();
            if !entry.file_type().is_file() || !extractor.supports(path) {
                continue;
            }
            match self
                .ingest_file(dataset_id, path, extractor, tags.clone())
                .await
            {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => {
                    tracing::warn!(path = %path.display(), error = %error, "Skipping document");
                }
            }
        }
        Ok(outcomes)
    }

    /// Retrieve, rerank, and assemble context for a consumer query.
    ///
    /// This is the single entry point the generation layer calls. A consumer with no
    /// enabled links, or whose linked datasets hold no candidates above the threshold,
    /// receives an empty bundle with `context_used == false` rather than an error.
    pub async fn retrieve_context(
        &self,
        request: RetrieveRequest,
    ) -> Result<ContextBundle, RetrieveError> {
        let links: Vec<ConsumerLink> = self
            .registry
            .links_for(&request.consumer_id)
            .into_iter()
            .filter(|link| link.enabled)
            .collect();
        if links.is_empty() {
            tracing::debug!(consumer = %request.consumer_id, "No enabled links in scope");
            self.metrics.record_query(false);
            return Ok(ContextBundle::empty());
        }

        let scope_ids: Vec<String> = links.iter().map(|link| link.dataset_id.clone()).collect();
        let snapshots = self.store.query_scope(&scope_ids);
        if snapshots.is_empty() {
            self.metrics.record_query(false);
            return Ok(ContextBundle::empty());
        }

        let threshold = request
            .threshold
            .unwrap_or(self.default_threshold)
            .clamp(0.0, 1.0);
        let pool = request.max_chunks.saturating_mul(CANDIDATE_POOL_FACTOR);
        let params = SearchParams {
            threshold,
            top_k: pool,
        };

        // Datasets may differ in backend; embed the query once per backend in scope.
        let mut groups: HashMap<_, Vec<DatasetSnapshot>> = HashMap::new();
        for snapshot in snapshots {
            groups.entry(snapshot.meta.backend).or_default().push(snapshot);
        }

        let mut candidates = Vec::new();
        for (kind, group) in groups {
            let embedding = self.gateway.embed(kind, &request.query_text).await?;
            let scoped: Vec<DatasetSnapshot> = group
                .into_iter()
                .filter(|snapshot| {
                    let matches = snapshot.meta.embedding_dimension == embedding.dimension;
                    if !matches {
                        tracing::warn!(
                            dataset = %snapshot.meta.id,
                            dataset_dimension = snapshot.meta.embedding_dimension,
                            query_dimension = embedding.dimension,
                            "Skipping dataset with incompatible dimension"
                        );
                    }
                    matches
                })
                .collect();
            candidates.extend(search(&embedding.values, &scoped, &params));
        }
        candidates.sort_by(rank_cmp);
        candidates.truncate(pool);

        let link_by_dataset: HashMap<&str, &ConsumerLink> = links
            .iter()
            .map(|link| (link.dataset_id.as_str(), link))
            .collect();
        for candidate in &mut candidates {
            candidate.link = link_by_dataset
                .get(candidate.dataset_id.as_str())
                .map(|link| LinkContext {
                    weight: link.weight,
                    access_level: link.access_level,
                    last_used_at: link.last_used_at.clone(),
                });
        }

        let context = RerankContext {
            specialty_tags: self.registry.specialty_tags(&request.consumer_id),
            intent_tags: normalize_tags(request.intent_tags.clone()),
            now: OffsetDateTime::now_utc(),
            weights: self.rerank_weights,
        };
        let reranked = rerank(candidates, &context);
        let bundle = assemble(&reranked, request.max_chunks, request.max_tokens);

        if bundle.context_used {
            let mut used: Vec<String> = bundle
                .items
                .iter()
                .map(|item| item.dataset_id.clone())
                .collect();
            used.sort();
            used.dedup();
            if let Err(error) = self.registry.record_usage(&request.consumer_id, &used) {
                tracing::warn!(consumer = %request.consumer_id, error = %error, "Failed to record link usage");
            }
        }

        self.metrics.record_query(bundle.context_used);
        tracing::info!(
            consumer = %request.consumer_id,
            items = bundle.items.len(),
            total_tokens = bundle.total_tokens,
            context_used = bundle.context_used,
            "Context assembled"
        );
        Ok(bundle)
    }

    /// Return the current pipeline metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn embed_with_retry(
        &self,
        dataset: &Dataset,
        texts: &[String],
    ) -> Result<Vec<crate::embedding::Embedding>, EmbeddingError> {
        let mut attempt = 0;
        loop {
            match self.gateway.embed_batch(dataset.backend, texts).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(error) if error.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.initial_backoff * 2u32.saturating_pow(attempt as u32 - 1);
                    tracing::warn!(
                        dataset = %dataset.id,
                        attempt,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Embedding backend unavailable; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Record the terminal status for a failed ingestion and convert the error.
    ///
    /// Backend and dimension failures mark the dataset `failed` with the message recorded;
    /// validation failures restore the prior status via the guard, since the dataset itself
    /// is intact.
    fn fail_ingestion(
        &self,
        dataset_id: &str,
        guard: StatusGuard,
        error: EmbeddingError,
    ) -> IngestError {
        match &error {
            EmbeddingError::EmptyInput | EmbeddingError::NotConfigured(_) => drop(guard),
            _ => {
                if let Err(status_error) = self.store.set_status(
                    dataset_id,
                    DatasetStatus::Failed,
                    Some(error.to_string()),
                ) {
                    tracing::warn!(
                        dataset = dataset_id,
                        error = %status_error,
                        "Failed to record dataset failure"
                    );
                }
                guard.disarm();
            }
        }
        IngestError::Embedding(error)
    }
}

/// Restores a dataset's prior status if an ingestion is dropped before commit.
///
/// Partial chunk/vector work lives only on the stack, so dropping the ingestion future
/// discards it; the guard makes sure the `processing` marker does not outlive the attempt.
struct StatusGuard {
    store: Arc<VectorStore>,
    dataset_id: String,
    prior: DatasetStatus,
    armed: bool,
}

impl StatusGuard {
    fn new(store: Arc<VectorStore>, dataset_id: &str, prior: DatasetStatus) -> Self {
        Self {
            store,
            dataset_id: dataset_id.to_string(),
            prior,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(error) = self.store.set_status(&self.dataset_id, self.prior, None) {
            tracing::warn!(
                dataset = %self.dataset_id,
                error = %error,
                "Failed to restore dataset status after interrupted ingestion"
            );
        } else {
            tracing::warn!(
                dataset = %self.dataset_id,
                status = %self.prior,
                "Restored dataset status after interrupted ingestion"
            );
        }
    }
}

/// Chunk draft with associated content hash, ready for embedding.
struct PreparedChunk {
    draft: ChunkDraft,
    chunk_hash: String,
}

/// Compute a deterministic SHA-256 digest for chunk text.
pub fn compute_chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Remove duplicate drafts within a document, keeping the first occurrence.
fn dedupe_drafts(drafts: Vec<ChunkDraft>) -> (Vec<PreparedChunk>, usize) {
    let mut seen = std::collections::HashSet::new();
    let mut prepared = Vec::new();
    let mut skipped = 0;

    for draft in drafts {
        if draft.text.trim().is_empty() {
            continue;
        }
        let chunk_hash = compute_chunk_hash(&draft.text);
        if seen.insert(chunk_hash.clone()) {
            prepared.push(PreparedChunk { draft, chunk_hash });
        } else {
            skipped += 1;
        }
    }

    (prepared, skipped)
}
