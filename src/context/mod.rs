//! Context bundle assembly and source attribution.
//!
//! The assembler turns a reranked result list into the bounded, attributed bundle handed to
//! the generation layer. Chunks are included whole or not at all; selection walks the
//! ranked prefix and stops at the first result that would exceed either bound.

use crate::links::AccessLevel;
use crate::retrieval::RetrievalResult;
use serde::Serialize;
use std::collections::HashSet;

/// One attributed chunk included in a context bundle.
#[derive(Debug, Clone, Serialize)]
pub struct ContextItem {
    /// Owning dataset id.
    pub dataset_id: String,
    /// Owning dataset display name, for citation.
    pub dataset_name: String,
    /// Chunk ordinal within the dataset, for citation.
    pub chunk_ordinal: usize,
    /// Section heading, when recorded.
    pub section_title: Option<String>,
    /// Page number, when recorded.
    pub page_number: Option<u32>,
    /// Chunk text.
    pub text: String,
    /// Chunk token count.
    pub token_count: usize,
    /// Final reranked score.
    pub score: f32,
    /// Access level the consumer holds on the owning dataset, when known.
    pub access_level: Option<AccessLevel>,
}

/// The final attributed set of chunks for one query.
#[derive(Debug, Clone, Serialize)]
pub struct ContextBundle {
    /// Selected items in rank order.
    pub items: Vec<ContextItem>,
    /// Explicit emptiness flag; `false` means "no context available".
    pub context_used: bool,
    /// Cumulative token count of the selected items.
    pub total_tokens: usize,
}

impl ContextBundle {
    /// An empty bundle with `context_used` unset.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            context_used: false,
            total_tokens: 0,
        }
    }
}

/// Select a bounded prefix of reranked results and attach attribution.
///
/// At most `max_chunks` items are selected and their cumulative token count never exceeds
/// `max_tokens`; selection stops at the first result that would cross either bound. Repeated
/// `(dataset, ordinal)` pairs are dropped defensively.
pub fn assemble(
    results: &[RetrievalResult],
    max_chunks: usize,
    max_tokens: usize,
) -> ContextBundle {
    let mut bundle = ContextBundle::empty();
    let mut seen: HashSet<(&str, usize)> = HashSet::new();

    for result in results {
        if bundle.items.len() >= max_chunks {
            break;
        }
        if !seen.insert((result.dataset_id.as_str(), result.ordinal)) {
            continue;
        }
        if bundle.total_tokens + result.token_count > max_tokens {
            break;
        }

        bundle.total_tokens += result.token_count;
        bundle.items.push(ContextItem {
            dataset_id: result.dataset_id.clone(),
            dataset_name: result.dataset_name.clone(),
            chunk_ordinal: result.ordinal,
            section_title: result.section_title.clone(),
            page_number: result.page_number,
            text: result.text.clone(),
            token_count: result.token_count,
            score: result.final_score,
            access_level: result.link.as_ref().map(|link| link.access_level),
        });
    }

    bundle.context_used = !bundle.items.is_empty();
    bundle
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(dataset: &str, ordinal: usize, tokens: usize, score: f32) -> RetrievalResult {
        RetrievalResult {
            dataset_id: dataset.to_string(),
            dataset_name: format!("Dataset {dataset}"),
            ordinal,
            text: format!("chunk {ordinal}"),
            section_title: Some("Section".to_string()),
            page_number: Some(1),
            token_count: tokens,
            tags: Vec::new(),
            base_score: score,
            final_score: score,
            link: None,
        }
    }

    #[test]
    fn respects_max_chunks() {
        let results = vec![
            result("a", 0, 10, 0.9),
            result("a", 1, 10, 0.8),
            result("a", 2, 10, 0.7),
        ];
        let bundle = assemble(&results, 2, 1000);
        assert_eq!(bundle.items.len(), 2);
        assert!(bundle.context_used);
        assert_eq!(bundle.total_tokens, 20);
    }

    #[test]
    fn stops_at_first_result_exceeding_token_budget() {
        let results = vec![
            result("a", 0, 50, 0.9),
            result("a", 1, 60, 0.8),
            // Would fit on its own, but selection never skips past an oversized result.
            result("a", 2, 10, 0.7),
        ];
        let bundle = assemble(&results, 10, 100);
        assert_eq!(bundle.items.len(), 1);
        assert_eq!(bundle.total_tokens, 50);
    }

    #[test]
    fn never_truncates_a_chunk_to_fit() {
        let results = vec![result("a", 0, 500, 0.9)];
        let bundle = assemble(&results, 5, 100);
        assert!(bundle.items.is_empty());
        assert!(!bundle.context_used);
        assert_eq!(bundle.total_tokens, 0);
    }

    #[test]
    fn deduplicates_repeated_chunks() {
        let results = vec![
            result("a", 0, 10, 0.9),
            result("a", 0, 10, 0.9),
            result("b", 0, 10, 0.8),
        ];
        let bundle = assemble(&results, 10, 1000);
        assert_eq!(bundle.items.len(), 2);
        assert_eq!(bundle.items[1].dataset_id, "b");
    }

    #[test]
    fn empty_input_yields_unused_bundle() {
        let bundle = assemble(&[], 5, 1000);
        assert!(!bundle.context_used);
        assert!(bundle.items.is_empty());
    }

    #[test]
    fn items_carry_attribution() {
        let bundle = assemble(&[result("a", 3, 10, 0.42)], 5, 1000);
        let item = &bundle.items[0];
        assert_eq!(item.dataset_name, "Dataset a");
        assert_eq!(item.chunk_ordinal, 3);
        assert_eq!(item.section_title.as_deref(), Some("Section"));
        assert_eq!(item.page_number, Some(1));
        assert!((item.score - 0.42).abs() < f32::EPSILON);
    }
}
