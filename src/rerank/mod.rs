//! Contextual score adjustment for retrieval results.
//!
//! Reranking is a pure function of its inputs: the candidate list, the consumer's specialty
//! and intent tags, the link context attached per result, and a clock value supplied by the
//! caller. Adjustments apply in a fixed order so runs are reproducible:
//!
//! 1. start from the base similarity,
//! 2. ×`specialty_boost` when chunk tags intersect the consumer's specialty tags,
//! 3. ×`(1 + overlap_ratio · tag_overlap_factor)` for query-intent tag overlap,
//! 4. ×`recency_boost` when the consumer used the dataset within the recency window,
//! 5. ×the consumer link weight.
//!
//! The constants are contract defaults carried from the original scoring rules; treat them
//! as tunable configuration rather than derived values.

use crate::retrieval::{RetrievalResult, rank_cmp};
use std::collections::BTreeSet;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Tunable multipliers used by [`rerank`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankWeights {
    /// Multiplier applied when chunk tags intersect the consumer's specialty tags.
    pub specialty_boost: f32,
    /// Scale of the query-intent tag overlap bonus.
    pub tag_overlap_factor: f32,
    /// Multiplier applied when the dataset was used within the recency window.
    pub recency_boost: f32,
    /// How recently a dataset must have been used to earn the recency boost.
    pub recency_window: time::Duration,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            specialty_boost: 1.2,
            tag_overlap_factor: 0.3,
            recency_boost: 1.1,
            recency_window: time::Duration::hours(24),
        }
    }
}

/// Everything the reranker needs besides the results themselves.
#[derive(Debug, Clone)]
pub struct RerankContext {
    /// The consumer's declared specialty tags, normalized.
    pub specialty_tags: BTreeSet<String>,
    /// Query-intent tags for this request, normalized.
    pub intent_tags: Vec<String>,
    /// Clock value used for the recency check; passed in for determinism.
    pub now: OffsetDateTime,
    /// Multipliers to apply.
    pub weights: RerankWeights,
}

/// Adjust scores with contextual signals and re-sort deterministically.
///
/// The result count is preserved. When every adjusted score is equal the ordering tie-break
/// (ascending dataset id, then ordinal) keeps the original similarity order stable.
pub fn rerank(mut results: Vec<RetrievalResult>, context: &RerankContext) -> Vec<RetrievalResult> {
    for result in &mut results {
        let mut score = result.base_score;

        if !context.specialty_tags.is_empty()
            && result
                .tags
                .iter()
                .any(|tag| context.specialty_tags.contains(tag))
        {
            score *= context.weights.specialty_boost;
        }

        if !context.intent_tags.is_empty() {
            let overlap = context
                .intent_tags
                .iter()
                .filter(|tag| result.tags.iter().any(|chunk_tag| chunk_tag == *tag))
                .count();
            let ratio = overlap as f32 / context.intent_tags.len().max(1) as f32;
            score *= 1.0 + ratio * context.weights.tag_overlap_factor;
        }

        if let Some(link) = &result.link {
            if used_within_window(link.last_used_at.as_deref(), context) {
                score *= context.weights.recency_boost;
            }
            score *= link.weight;
        }

        result.final_score = score;
    }

    results.sort_by(rank_cmp);
    results
}

fn used_within_window(last_used_at: Option<&str>, context: &RerankContext) -> bool {
    let Some(raw) = last_used_at else {
        return false;
    };
    let Ok(used) = OffsetDateTime::parse(raw, &Rfc3339) else {
        tracing::debug!(last_used_at = raw, "Ignoring unparseable usage timestamp");
        return false;
    };
    let elapsed = context.now - used;
    elapsed >= time::Duration::ZERO && elapsed <= context.weights.recency_window
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::AccessLevel;
    use crate::retrieval::LinkContext;
    use time::macros::datetime;

    fn result(dataset: &str, ordinal: usize, base: f32, tags: &[&str]) -> RetrievalResult {
        RetrievalResult {
            dataset_id: dataset.to_string(),
            dataset_name: dataset.to_string(),
            ordinal,
            text: "chunk".to_string(),
            section_title: None,
            page_number: None,
            token_count: 1,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            base_score: base,
            final_score: base,
            link: None,
        }
    }

    fn with_link(mut result: RetrievalResult, weight: f32, last_used: Option<&str>) -> RetrievalResult {
        result.link = Some(LinkContext {
            weight,
            access_level: AccessLevel::Full,
            last_used_at: last_used.map(str::to_string),
        });
        result
    }

    fn context() -> RerankContext {
        RerankContext {
            specialty_tags: BTreeSet::new(),
            intent_tags: Vec::new(),
            now: datetime!(2025-06-01 12:00:00 UTC),
            weights: RerankWeights::default(),
        }
    }

    #[test]
    fn preserves_result_count_and_is_stable_on_equal_scores() {
        let results = vec![
            result("a", 0, 0.5, &[]),
            result("a", 1, 0.5, &[]),
            result("b", 0, 0.5, &[]),
        ];
        let reranked = rerank(results, &context());
        assert_eq!(reranked.len(), 3);
        let order: Vec<(&str, usize)> = reranked
            .iter()
            .map(|r| (r.dataset_id.as_str(), r.ordinal))
            .collect();
        assert_eq!(order, vec![("a", 0), ("a", 1), ("b", 0)]);
    }

    #[test]
    fn specialty_match_boosts_score() {
        let mut ctx = context();
        ctx.specialty_tags = BTreeSet::from(["cardiology".to_string()]);

        let reranked = rerank(
            vec![
                result("a", 0, 0.5, &["cardiology"]),
                result("b", 0, 0.5, &["gardening"]),
            ],
            &ctx,
        );
        assert_eq!(reranked[0].dataset_id, "a");
        assert!((reranked[0].final_score - 0.6).abs() < 1e-6);
        assert!((reranked[1].final_score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn intent_overlap_scales_with_ratio() {
        let mut ctx = context();
        ctx.intent_tags = vec!["dosage".to_string(), "storage".to_string()];

        let reranked = rerank(vec![result("a", 0, 1.0, &["dosage"])], &ctx);
        // One of two intent tags matched: 1.0 * (1 + 0.5 * 0.3).
        assert!((reranked[0].final_score - 1.15).abs() < 1e-6);
    }

    #[test]
    fn recent_usage_boosts_score() {
        let ctx = context();
        let recent = with_link(result("a", 0, 1.0, &[]), 1.0, Some("2025-06-01T02:00:00Z"));
        let stale = with_link(result("b", 0, 1.0, &[]), 1.0, Some("2025-05-20T02:00:00Z"));

        let reranked = rerank(vec![recent, stale], &ctx);
        assert_eq!(reranked[0].dataset_id, "a");
        assert!((reranked[0].final_score - 1.1).abs() < 1e-6);
        assert!((reranked[1].final_score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn link_weight_separates_equal_base_scores() {
        let ctx = context();
        let light = with_link(result("light", 0, 0.8, &[]), 0.5, None);
        let heavy = with_link(result("heavy", 0, 0.8, &[]), 1.5, None);

        let reranked = rerank(vec![light, heavy], &ctx);
        assert_eq!(reranked[0].dataset_id, "heavy");
        assert!((reranked[0].final_score - 1.2).abs() < 1e-6);
        assert!((reranked[1].final_score - 0.4).abs() < 1e-6);
    }

    #[test]
    fn adjustments_compose_in_order() {
        let mut ctx = context();
        ctx.specialty_tags = BTreeSet::from(["cardiology".to_string()]);
        ctx.intent_tags = vec!["dosage".to_string()];

        let candidate = with_link(
            result("a", 0, 1.0, &["cardiology", "dosage"]),
            2.0,
            Some("2025-06-01T11:00:00Z"),
        );
        let reranked = rerank(vec![candidate], &ctx);
        // 1.0 * 1.2 * 1.3 * 1.1 * 2.0
        assert!((reranked[0].final_score - 3.432).abs() < 1e-5);
    }
}
