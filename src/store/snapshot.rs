//! Snapshot file handling for the vector store.
//!
//! Each dataset persists as one JSON file under the store's data directory. Writes go to a
//! temporary sibling first and are renamed into place, so a snapshot on disk is always a
//! complete commit: readers after a crash see either the previous batch or the new one.

use super::types::{ChunkRecord, Dataset, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub(crate) const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    meta: &'a Dataset,
    chunks: &'a [ChunkRecord],
}

/// Decoded snapshot contents.
#[derive(Deserialize)]
pub(crate) struct Snapshot {
    #[allow(dead_code)]
    pub(crate) version: u32,
    pub(crate) meta: Dataset,
    pub(crate) chunks: Vec<ChunkRecord>,
}

pub(crate) fn snapshot_path(dir: &Path, dataset_id: &str) -> PathBuf {
    dir.join(format!("{dataset_id}.json"))
}

/// Persist a dataset atomically: write a temp file, then rename over the target.
pub(crate) fn write_snapshot(
    dir: &Path,
    meta: &Dataset,
    chunks: &[ChunkRecord],
) -> Result<(), StoreError> {
    fs::create_dir_all(dir)?;
    let snapshot = SnapshotRef {
        version: SNAPSHOT_VERSION,
        meta,
        chunks,
    };
    let data = serde_json::to_vec(&snapshot).map_err(|source| StoreError::Corrupt {
        path: snapshot_path(dir, &meta.id),
        source,
    })?;

    let target = snapshot_path(dir, &meta.id);
    let temp = dir.join(format!("{}.json.tmp", meta.id));
    fs::write(&temp, data)?;
    fs::rename(&temp, &target)?;
    Ok(())
}

pub(crate) fn read_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
    let data = fs::read(path)?;
    serde_json::from_slice(&data).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Load every dataset snapshot found in the data directory.
pub(crate) fn load_all(dir: &Path) -> Result<Vec<Snapshot>, StoreError> {
    let mut snapshots = Vec::new();
    if !dir.exists() {
        return Ok(snapshots);
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        snapshots.push(read_snapshot(&path)?);
    }

    Ok(snapshots)
}

pub(crate) fn remove_snapshot(dir: &Path, dataset_id: &str) -> Result<(), StoreError> {
    match fs::remove_file(snapshot_path(dir, dataset_id)) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::BackendKind;
    use crate::store::types::DatasetStatus;

    fn meta(id: &str) -> Dataset {
        Dataset {
            id: id.to_string(),
            name: "Test".to_string(),
            source_kind: "notes".to_string(),
            backend: BackendKind::Local,
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dimension: 3,
            status: DatasetStatus::Pending,
            chunk_count: 0,
            error: None,
            created_at: "2025-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn snapshots_round_trip_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_snapshot(dir.path(), &meta("ds"), &[]).expect("write");

        let loaded = read_snapshot(&snapshot_path(dir.path(), "ds")).expect("read");
        assert_eq!(loaded.version, SNAPSHOT_VERSION);
        assert_eq!(loaded.meta.id, "ds");
        assert!(loaded.chunks.is_empty());
    }

    #[test]
    fn load_all_ignores_non_json_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_snapshot(dir.path(), &meta("ds"), &[]).expect("write");
        std::fs::write(dir.path().join("stray.json.tmp"), b"{").expect("stray file");

        let snapshots = load_all(dir.path()).expect("load");
        assert_eq!(snapshots.len(), 1);
    }

    #[test]
    fn corrupt_snapshot_reports_its_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = snapshot_path(dir.path(), "broken");
        std::fs::write(&path, b"not json").expect("write");

        let error = read_snapshot(&path).unwrap_err();
        assert!(matches!(error, StoreError::Corrupt { .. }));
    }
}
