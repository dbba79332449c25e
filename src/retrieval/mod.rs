//! Hybrid retrieval: dual-index search, score fusion, deduplication
//!
//! Both indexes are scored independently, min-max normalized over their own
//! candidate sets, fused by weighted sum, deduplicated, and truncated to k.

mod deduplication;
mod fusion;
mod hybrid;

pub use deduplication::deduplicate_results;
pub use fusion::{fuse, min_max_normalize, FusedCandidate};
pub use hybrid::HybridRetriever;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrieveError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Index mismatch for corpus version {version}: dense and sparse chunk-id sets differ")]
    IndexMismatch { version: String },

    #[error("Retrieval timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Dense search failed: {0}")]
    DenseSearch(String),

    #[error("Sparse search failed: {0}")]
    SparseSearch(String),

    #[error("Corpus store error: {0}")]
    Store(String),
}

/// One ranked retrieval result; transient to the request, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub text: String,
    pub doc_summary: Option<String>,
    pub chunk_summary: Option<String>,
    pub source_path: String,
    /// Normalized dense score; `None` when only the sparse index matched
    pub dense_score: Option<f32>,
    /// Normalized sparse score; `None` when only the dense index matched
    pub sparse_score: Option<f32>,
    pub fused_score: f32,
}
