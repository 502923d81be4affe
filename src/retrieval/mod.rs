//! Similarity search over stored chunk vectors.
//!
//! Scoring is an exact scan: cosine similarity between the query vector and every chunk in
//! the scoped dataset snapshots. That is the right trade-off for personal collections of
//! hundreds to low thousands of chunks; an approximate index can replace [`search`] behind
//! the same contract if corpora outgrow it.

use crate::links::AccessLevel;
use crate::store::DatasetSnapshot;
use std::cmp::Ordering;

/// Filtering and truncation parameters for one search.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    /// Candidates scoring strictly below this similarity are excluded.
    pub threshold: f32,
    /// Maximum number of results returned.
    pub top_k: usize,
}

/// Consumer link context attached to a result before reranking.
#[derive(Debug, Clone)]
pub struct LinkContext {
    /// Relevance weight from the consumer's link.
    pub weight: f32,
    /// Access level granted for the owning dataset.
    pub access_level: AccessLevel,
    /// RFC3339 timestamp of the consumer's last use of the dataset.
    pub last_used_at: Option<String>,
}

/// One scored chunk produced by the retrieval engine.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    /// Owning dataset id.
    pub dataset_id: String,
    /// Owning dataset display name, carried for attribution.
    pub dataset_name: String,
    /// Chunk ordinal within the dataset.
    pub ordinal: usize,
    /// Chunk text.
    pub text: String,
    /// Section heading, when recorded.
    pub section_title: Option<String>,
    /// Page number, when recorded.
    pub page_number: Option<u32>,
    /// Chunk token count.
    pub token_count: usize,
    /// Chunk tags.
    pub tags: Vec<String>,
    /// Cosine similarity against the query vector.
    pub base_score: f32,
    /// Score after rerank adjustments; equals `base_score` until reranking runs.
    pub final_score: f32,
    /// Consumer link context, populated by the pipeline before reranking.
    pub link: Option<LinkContext>,
}

/// Cosine similarity between two vectors.
///
/// Defined as 0 when either vector has zero norm or the lengths differ, so degenerate
/// inputs never produce NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Deterministic result ordering: descending final score, then ascending dataset id, then
/// ascending chunk ordinal.
pub(crate) fn rank_cmp(a: &RetrievalResult, b: &RetrievalResult) -> Ordering {
    b.final_score
        .partial_cmp(&a.final_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.dataset_id.cmp(&b.dataset_id))
        .then_with(|| a.ordinal.cmp(&b.ordinal))
}

/// Score every chunk in the scoped snapshots against the query vector.
///
/// Chunks scoring strictly below the threshold are excluded; survivors are ordered by
/// [`rank_cmp`] and truncated to `top_k`. An empty scope yields an empty result, never an
/// error.
pub fn search(
    query: &[f32],
    scope: &[DatasetSnapshot],
    params: &SearchParams,
) -> Vec<RetrievalResult> {
    if params.top_k == 0 {
        return Vec::new();
    }

    let mut results = Vec::new();
    for snapshot in scope {
        for chunk in snapshot.chunks.iter() {
            let score = cosine_similarity(query, &chunk.vector);
            if score < params.threshold {
                continue;
            }
            results.push(RetrievalResult {
                dataset_id: snapshot.meta.id.clone(),
                dataset_name: snapshot.meta.name.clone(),
                ordinal: chunk.ordinal,
                text: chunk.text.clone(),
                section_title: chunk.section_title.clone(),
                page_number: chunk.page_number,
                token_count: chunk.token_count,
                tags: chunk.tags.clone(),
                base_score: score,
                final_score: score,
                link: None,
            });
        }
    }

    results.sort_by(rank_cmp);
    results.truncate(params.top_k);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::BackendKind;
    use crate::store::{ChunkRecord, Dataset, DatasetStatus};
    use std::sync::Arc;
    use uuid::Uuid;

    fn snapshot(id: &str, vectors: Vec<Vec<f32>>) -> DatasetSnapshot {
        let chunks = vectors
            .into_iter()
            .enumerate()
            .map(|(ordinal, vector)| ChunkRecord {
                id: Uuid::new_v4(),
                dataset_id: id.to_string(),
                ordinal,
                text: format!("chunk {ordinal} of {id}"),
                char_start: 0,
                char_end: 0,
                section_title: None,
                page_number: None,
                token_count: 4,
                tags: Vec::new(),
                chunk_hash: format!("{id}-{ordinal}"),
                vector,
            })
            .collect();

        DatasetSnapshot {
            meta: Dataset {
                id: id.to_string(),
                name: format!("Dataset {id}"),
                source_kind: "notes".to_string(),
                backend: BackendKind::Local,
                embedding_model: "nomic-embed-text".to_string(),
                embedding_dimension: 2,
                status: DatasetStatus::Ready,
                chunk_count: 0,
                error: None,
                created_at: "2025-01-01T00:00:00Z".to_string(),
            },
            chunks: Arc::new(chunks),
        }
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn cosine_of_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn search_filters_strictly_below_threshold() {
        let scope = vec![snapshot("ds", vec![vec![1.0, 0.0], vec![0.0, 1.0]])];
        let results = search(
            &[1.0, 0.0],
            &scope,
            &SearchParams {
                threshold: 0.5,
                top_k: 10,
            },
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].ordinal, 0);
        assert!((results[0].base_score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn search_truncates_to_top_k() {
        let scope = vec![snapshot(
            "ds",
            vec![vec![1.0, 0.0], vec![1.0, 0.1], vec![1.0, 0.2]],
        )];
        let results = search(
            &[1.0, 0.0],
            &scope,
            &SearchParams {
                threshold: 0.0,
                top_k: 2,
            },
        );
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn ties_break_by_dataset_id_then_ordinal() {
        let scope = vec![
            snapshot("beta", vec![vec![1.0, 0.0], vec![1.0, 0.0]]),
            snapshot("alpha", vec![vec![1.0, 0.0]]),
        ];
        let results = search(
            &[1.0, 0.0],
            &scope,
            &SearchParams {
                threshold: 0.0,
                top_k: 10,
            },
        );
        let order: Vec<(&str, usize)> = results
            .iter()
            .map(|r| (r.dataset_id.as_str(), r.ordinal))
            .collect();
        assert_eq!(order, vec![("alpha", 0), ("beta", 0), ("beta", 1)]);
    }

    #[test]
    fn empty_scope_returns_empty_results() {
        let results = search(
            &[1.0, 0.0],
            &[],
            &SearchParams {
                threshold: 0.0,
                top_k: 5,
            },
        );
        assert!(results.is_empty());
    }

    #[test]
    fn identical_stored_vector_ranks_first_with_full_score() {
        let scope = vec![snapshot(
            "ds",
            vec![
                vec![0.9, 0.1],
                vec![0.5, 0.5],
                vec![0.2, 0.8],
                vec![0.6, 0.4],
            ],
        )];
        let query = vec![0.2, 0.8];
        let results = search(
            &query,
            &scope,
            &SearchParams {
                threshold: 0.7,
                top_k: 5,
            },
        );
        assert_eq!(results[0].ordinal, 2);
        assert!((results[0].base_score - 1.0).abs() < 1e-6);
        assert!(results.iter().skip(1).all(|r| r.base_score < 1.0 - 1e-6));
        assert!(results.iter().all(|r| r.base_score >= 0.7));
    }
}
