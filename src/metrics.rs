use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and retrieval activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_ingested: AtomicU64,
    chunks_ingested: AtomicU64,
    queries_served: AtomicU64,
    empty_bundles: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an ingested document and the number of chunks committed for it.
    pub fn record_document(&self, chunk_count: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_ingested
            .fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record a served retrieval query and whether it produced any context.
    pub fn record_query(&self, context_used: bool) {
        self.queries_served.fetch_add(1, Ordering::Relaxed);
        if !context_used {
            self.empty_bundles.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            chunks_ingested: self.chunks_ingested.load(Ordering::Relaxed),
            queries_served: self.queries_served.load(Ordering::Relaxed),
            empty_bundles: self.empty_bundles.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Number of documents that have been ingested since startup.
    pub documents_ingested: u64,
    /// Total chunk count committed across all ingested documents.
    pub chunks_ingested: u64,
    /// Number of retrieval queries served since startup.
    pub queries_served: u64,
    /// Number of queries that produced an empty context bundle.
    pub empty_bundles: u64,
}
