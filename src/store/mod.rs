//! Durable dataset, chunk, and vector storage.
//!
//! Datasets persist as one snapshot file each (see [`snapshot`]); the in-memory view keeps
//! the committed chunk list behind an `Arc` per dataset. A commit builds the next chunk list
//! off to the side, persists it atomically, and then swaps the `Arc`, so readers observe a
//! dataset either entirely before or entirely after a batch. Writers to the same dataset id
//! are serialized by a per-dataset mutex; writers to different datasets do not contend.

mod snapshot;
mod types;

pub use types::{
    ChunkInsert, ChunkRecord, Dataset, DatasetSnapshot, DatasetStatus, NewDataset, StoreError,
};

use snapshot::{load_all, remove_snapshot, write_snapshot};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

#[derive(Clone)]
struct Shard {
    meta: Dataset,
    chunks: Arc<Vec<ChunkRecord>>,
}

/// Keyed storage for datasets, their chunks, and their vectors.
pub struct VectorStore {
    data_dir: PathBuf,
    inner: RwLock<HashMap<String, Shard>>,
    commit_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl VectorStore {
    /// Open a store rooted at the given directory, loading any persisted datasets.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;

        let mut shards = HashMap::new();
        for snapshot in load_all(&data_dir)? {
            shards.insert(
                snapshot.meta.id.clone(),
                Shard {
                    meta: snapshot.meta,
                    chunks: Arc::new(snapshot.chunks),
                },
            );
        }
        tracing::info!(datasets = shards.len(), dir = %data_dir.display(), "Vector store opened");

        Ok(Self {
            data_dir,
            inner: RwLock::new(shards),
            commit_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Register a new dataset in `pending` state.
    pub fn create_dataset(&self, spec: NewDataset) -> Result<Dataset, StoreError> {
        let id = spec
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if id.is_empty()
            || !id
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
        {
            return Err(StoreError::InvalidDatasetId(id));
        }
        if spec.embedding_dimension == 0 {
            return Err(StoreError::InvalidDimension(id));
        }

        let meta = Dataset {
            id: id.clone(),
            name: spec.name,
            source_kind: spec.source_kind,
            backend: spec.backend,
            embedding_model: spec.embedding_model,
            embedding_dimension: spec.embedding_dimension,
            status: DatasetStatus::Pending,
            chunk_count: 0,
            error: None,
            created_at: now_rfc3339(),
        };

        // Same-id creations serialize on the commit lock; the shard map write lock is only
        // held for the in-memory swap, never across file I/O.
        let commit = self.commit_lock(&id);
        let _guard = commit.lock().expect("commit lock poisoned");

        if self
            .inner
            .read()
            .expect("store lock poisoned")
            .contains_key(&id)
        {
            return Err(StoreError::DatasetExists(id));
        }
        write_snapshot(&self.data_dir, &meta, &[])?;

        let mut shards = self.inner.write().expect("store lock poisoned");
        shards.insert(
            id.clone(),
            Shard {
                meta: meta.clone(),
                chunks: Arc::new(Vec::new()),
            },
        );
        drop(shards);

        tracing::info!(dataset = %id, "Dataset created");
        Ok(meta)
    }

    /// Fetch a dataset's current metadata.
    pub fn dataset(&self, dataset_id: &str) -> Option<Dataset> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .get(dataset_id)
            .map(|shard| shard.meta.clone())
    }

    /// Enumerate all datasets, ordered by id.
    pub fn list_datasets(&self) -> Vec<Dataset> {
        let mut datasets: Vec<Dataset> = self
            .inner
            .read()
            .expect("store lock poisoned")
            .values()
            .map(|shard| shard.meta.clone())
            .collect();
        datasets.sort_by(|a, b| a.id.cmp(&b.id));
        datasets
    }

    /// Update a dataset's processing status and recorded error message.
    pub fn set_status(
        &self,
        dataset_id: &str,
        status: DatasetStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let commit = self.commit_lock(dataset_id);
        let _guard = commit.lock().expect("commit lock poisoned");

        let mut shard = {
            let shards = self.inner.read().expect("store lock poisoned");
            shards
                .get(dataset_id)
                .cloned()
                .ok_or_else(|| StoreError::DatasetNotFound(dataset_id.to_string()))?
        };
        shard.meta.status = status;
        shard.meta.error = error;
        write_snapshot(&self.data_dir, &shard.meta, &shard.chunks)?;

        let mut shards = self.inner.write().expect("store lock poisoned");
        shards.insert(dataset_id.to_string(), shard);
        drop(shards);

        tracing::debug!(dataset = dataset_id, %status, "Dataset status updated");
        Ok(())
    }

    /// Commit a batch of chunk/vector pairs to a dataset, all-or-nothing.
    ///
    /// Ordinals continue from the dataset's existing chunks. The batch becomes visible to
    /// queries only after the snapshot is safely on disk; on any error, queries keep seeing
    /// the previous commit. The committed dataset is marked `ready`. Returns the number of
    /// chunks committed by this batch.
    pub fn commit_dataset(
        &self,
        dataset_id: &str,
        inserts: Vec<ChunkInsert>,
    ) -> Result<usize, StoreError> {
        let commit = self.commit_lock(dataset_id);
        let _guard = commit.lock().expect("commit lock poisoned");

        let current = {
            let shards = self.inner.read().expect("store lock poisoned");
            shards
                .get(dataset_id)
                .cloned()
                .ok_or_else(|| StoreError::DatasetNotFound(dataset_id.to_string()))?
        };

        for insert in &inserts {
            if insert.vector.len() != current.meta.embedding_dimension {
                return Err(StoreError::DimensionMismatch {
                    dataset: dataset_id.to_string(),
                    expected: current.meta.embedding_dimension,
                    actual: insert.vector.len(),
                });
            }
        }

        let mut chunks: Vec<ChunkRecord> = (*current.chunks).clone();
        let base_ordinal = chunks.len();
        for (offset, insert) in inserts.into_iter().enumerate() {
            chunks.push(ChunkRecord {
                id: Uuid::new_v4(),
                dataset_id: dataset_id.to_string(),
                ordinal: base_ordinal + offset,
                text: insert.text,
                char_start: insert.char_start,
                char_end: insert.char_end,
                section_title: insert.section_title,
                page_number: insert.page_number,
                token_count: insert.token_count,
                tags: insert.tags,
                chunk_hash: insert.chunk_hash,
                vector: insert.vector,
            });
        }

        let committed = chunks.len() - base_ordinal;
        let mut meta = current.meta;
        meta.status = DatasetStatus::Ready;
        meta.error = None;
        meta.chunk_count = chunks.len();

        write_snapshot(&self.data_dir, &meta, &chunks)?;

        let mut shards = self.inner.write().expect("store lock poisoned");
        shards.insert(
            dataset_id.to_string(),
            Shard {
                meta,
                chunks: Arc::new(chunks),
            },
        );
        drop(shards);

        tracing::info!(dataset = dataset_id, chunks = committed, "Batch committed");
        Ok(committed)
    }

    /// Resolve dataset ids to queryable snapshots.
    ///
    /// Unknown ids and datasets that are not `ready` contribute nothing rather than failing
    /// the scope, so one stale reference never breaks retrieval for the rest.
    pub fn query_scope(&self, dataset_ids: &[String]) -> Vec<DatasetSnapshot> {
        let shards = self.inner.read().expect("store lock poisoned");
        let mut snapshots = Vec::new();
        for id in dataset_ids {
            match shards.get(id) {
                Some(shard) if shard.meta.status == DatasetStatus::Ready => {
                    snapshots.push(DatasetSnapshot {
                        meta: shard.meta.clone(),
                        chunks: Arc::clone(&shard.chunks),
                    });
                }
                Some(shard) => {
                    tracing::debug!(dataset = %id, status = %shard.meta.status, "Skipping non-ready dataset in scope");
                }
                None => {
                    tracing::debug!(dataset = %id, "Skipping unknown dataset in scope");
                }
            }
        }
        snapshots
    }

    /// Delete a dataset and every chunk belonging to it.
    pub fn delete_dataset(&self, dataset_id: &str) -> Result<(), StoreError> {
        let commit = self.commit_lock(dataset_id);
        let _guard = commit.lock().expect("commit lock poisoned");

        let removed = {
            let mut shards = self.inner.write().expect("store lock poisoned");
            shards.remove(dataset_id)
        };
        if removed.is_none() {
            return Err(StoreError::DatasetNotFound(dataset_id.to_string()));
        }
        remove_snapshot(&self.data_dir, dataset_id)?;

        let mut locks = self.commit_locks.lock().expect("commit lock map poisoned");
        locks.remove(dataset_id);
        drop(locks);

        tracing::info!(dataset = dataset_id, "Dataset deleted");
        Ok(())
    }

    fn commit_lock(&self, dataset_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.commit_locks.lock().expect("commit lock map poisoned");
        locks.entry(dataset_id.to_string()).or_default().clone()
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
