//! Consumer link registry and weighting preferences.
//!
//! A consumer (e.g. a persona) is related to datasets through [`ConsumerLink`] rows: an
//! enabled flag, a relevance weight, an access level, and usage counters. The retrieval
//! pipeline reads links to build its dataset scope and to weight reranking; it records
//! usage after each query that produced context. Weights outside `[0.1, 2.0]` are rejected
//! at write time, never clamped.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Smallest accepted link weight.
pub const MIN_WEIGHT: f32 = 0.1;
/// Largest accepted link weight.
pub const MAX_WEIGHT: f32 = 2.0;

/// Errors raised by the link registry.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Weight falls outside the accepted range.
    #[error("link weight {weight} outside allowed range [{MIN_WEIGHT}, {MAX_WEIGHT}]")]
    WeightOutOfRange {
        /// The rejected weight.
        weight: f32,
    },
    /// No link exists for the given consumer/dataset pair.
    #[error("no link between consumer '{consumer_id}' and dataset '{dataset_id}'")]
    UnknownLink {
        /// Consumer side of the missing link.
        consumer_id: String,
        /// Dataset side of the missing link.
        dataset_id: String,
    },
    /// Filesystem interaction failed.
    #[error("link store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// The link file exists but could not be decoded.
    #[error("corrupt link file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// How much of a linked dataset's content a consumer may receive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    /// Full chunk text may be injected.
    #[default]
    Full,
    /// Only summarized content should be surfaced downstream.
    Summary,
    /// Only attribution, no content.
    ReferenceOnly,
}

/// The relationship between one consumer and one dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerLink {
    /// Consumer side of the link.
    pub consumer_id: String,
    /// Dataset side of the link.
    pub dataset_id: String,
    /// Disabled links drop the dataset from the consumer's retrieval scope.
    pub enabled: bool,
    /// Relevance weight in `[0.1, 2.0]`, applied during reranking.
    pub weight: f32,
    /// Access level granted to the consumer for this dataset.
    pub access_level: AccessLevel,
    /// Number of queries this link has contributed context to.
    pub usage_count: u64,
    /// RFC3339 timestamp of the last contribution, if any.
    pub last_used_at: Option<String>,
}

impl ConsumerLink {
    /// Build an enabled link with neutral weight and full access.
    pub fn new(consumer_id: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            dataset_id: dataset_id.into(),
            enabled: true,
            weight: 1.0,
            access_level: AccessLevel::Full,
            usage_count: 0,
            last_used_at: None,
        }
    }

    /// Set the relevance weight, for builder-style construction.
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// Set the access level, for builder-style construction.
    pub fn with_access_level(mut self, access_level: AccessLevel) -> Self {
        self.access_level = access_level;
        self
    }
}

/// Read side of the registry consumed by the retrieval pipeline.
pub trait ConsumerRegistry: Send + Sync {
    /// All links for a consumer, enabled or not.
    fn links_for(&self, consumer_id: &str) -> Vec<ConsumerLink>;

    /// Specialty tags declared for a consumer.
    fn specialty_tags(&self, consumer_id: &str) -> BTreeSet<String>;

    /// Record that the given datasets contributed context to a query.
    fn record_usage(&self, consumer_id: &str, dataset_ids: &[String]) -> Result<(), LinkError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LinkState {
    links: Vec<ConsumerLink>,
    specialties: BTreeMap<String, BTreeSet<String>>,
}

/// JSON-file-backed implementation of the registry.
pub struct LinkStore {
    path: PathBuf,
    state: RwLock<LinkState>,
}

impl LinkStore {
    /// Open (or create) the link file at the given path.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LinkError> {
        let path = path.into();
        let state = if path.exists() {
            let data = fs::read(&path)?;
            serde_json::from_slice(&data)?
        } else {
            LinkState::default()
        };
        tracing::debug!(links = state.links.len(), path = %path.display(), "Link store opened");
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Insert or replace the link for a consumer/dataset pair.
    ///
    /// The weight is validated against `[0.1, 2.0]`; out-of-range values are rejected so a
    /// misconfigured preference never silently skews ranking.
    pub fn upsert_link(&self, link: ConsumerLink) -> Result<(), LinkError> {
        if !link.weight.is_finite() || link.weight < MIN_WEIGHT || link.weight > MAX_WEIGHT {
            return Err(LinkError::WeightOutOfRange {
                weight: link.weight,
            });
        }

        let mut state = self.state.write().expect("link store lock poisoned");
        match state
            .links
            .iter_mut()
            .find(|existing| is_pair(existing, &link.consumer_id, &link.dataset_id))
        {
            Some(existing) => *existing = link,
            None => state.links.push(link),
        }
        self.persist(&state)
    }

    /// Enable or disable an existing link.
    pub fn set_enabled(
        &self,
        consumer_id: &str,
        dataset_id: &str,
        enabled: bool,
    ) -> Result<(), LinkError> {
        let mut state = self.state.write().expect("link store lock poisoned");
        let link = state
            .links
            .iter_mut()
            .find(|existing| is_pair(existing, consumer_id, dataset_id))
            .ok_or_else(|| LinkError::UnknownLink {
                consumer_id: consumer_id.to_string(),
                dataset_id: dataset_id.to_string(),
            })?;
        link.enabled = enabled;
        self.persist(&state)
    }

    /// Remove the link for a consumer/dataset pair, if present.
    pub fn remove_link(&self, consumer_id: &str, dataset_id: &str) -> Result<(), LinkError> {
        let mut state = self.state.write().expect("link store lock poisoned");
        state
            .links
            .retain(|existing| !is_pair(existing, consumer_id, dataset_id));
        self.persist(&state)
    }

    /// Remove every link pointing at a dataset, across all consumers.
    pub fn remove_dataset_links(&self, dataset_id: &str) -> Result<(), LinkError> {
        let mut state = self.state.write().expect("link store lock poisoned");
        state.links.retain(|existing| existing.dataset_id != dataset_id);
        self.persist(&state)
    }

    /// Replace a consumer's specialty tags; tags are trimmed, lowercased, and deduplicated.
    pub fn set_specialty_tags(
        &self,
        consumer_id: &str,
        tags: Vec<String>,
    ) -> Result<(), LinkError> {
        let normalized: BTreeSet<String> = normalize_tags(tags).into_iter().collect();
        let mut state = self.state.write().expect("link store lock poisoned");
        if normalized.is_empty() {
            state.specialties.remove(consumer_id);
        } else {
            state
                .specialties
                .insert(consumer_id.to_string(), normalized);
        }
        self.persist(&state)
    }

    fn persist(&self, state: &LinkState) -> Result<(), LinkError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec(state)?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, data)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

impl ConsumerRegistry for LinkStore {
    fn links_for(&self, consumer_id: &str) -> Vec<ConsumerLink> {
        self.state
            .read()
            .expect("link store lock poisoned")
            .links
            .iter()
            .filter(|link| link.consumer_id == consumer_id)
            .cloned()
            .collect()
    }

    fn specialty_tags(&self, consumer_id: &str) -> BTreeSet<String> {
        self.state
            .read()
            .expect("link store lock poisoned")
            .specialties
            .get(consumer_id)
            .cloned()
            .unwrap_or_default()
    }

    fn record_usage(&self, consumer_id: &str, dataset_ids: &[String]) -> Result<(), LinkError> {
        if dataset_ids.is_empty() {
            return Ok(());
        }
        let now = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string());

        let mut state = self.state.write().expect("link store lock poisoned");
        for link in state.links.iter_mut() {
            if link.consumer_id == consumer_id
                && dataset_ids.iter().any(|id| id == &link.dataset_id)
            {
                link.usage_count += 1;
                link.last_used_at = Some(now.clone());
            }
        }
        self.persist(&state)
    }
}

fn is_pair(link: &ConsumerLink, consumer_id: &str, dataset_id: &str) -> bool {
    link.consumer_id == consumer_id && link.dataset_id == dataset_id
}

/// Normalize tag values: trim whitespace, lowercase, and drop empties and duplicates.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut normalized = Vec::new();
    for tag in tags {
        let trimmed = tag.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lower = trimmed.to_lowercase();
        if seen.insert(lower.clone()) {
            normalized.push(lower);
        }
    }
    normalized
}
