//! Hybrid retriever over one immutable corpus version

use crate::config::{IndexingConfig, RetrievalConfig};
use crate::corpus::{Chunk, ChunkStore, CorpusLayout, Manifest};
use crate::embedding::EmbeddingProvider;
use crate::index::{DenseIndex, SparseIndex, SparseIndexError};
use crate::retrieval::{deduplicate_results, fuse, RetrievalResult, RetrieveError};
use ahash::AHashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Query-time retriever: scores a query against both indexes of a corpus
/// version, fuses, deduplicates, and hydrates results from the chunk store.
///
/// A retriever handle is read-only and pinned to the version it opened;
/// rebuilds produce a new version and repoint `CURRENT` without touching
/// open handles, so queries need no locking and run with unbounded read
/// concurrency.
pub struct HybridRetriever {
    provider: Arc<dyn EmbeddingProvider>,
    dense: Arc<DenseIndex>,
    sparse: Arc<SparseIndex>,
    store: Arc<ChunkStore>,
    version: String,
    dense_ids: BTreeSet<String>,
    sparse_ids: BTreeSet<String>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    /// Open a corpus version's artifacts, failing fast with
    /// [`RetrieveError::IndexMismatch`] if the declared chunk-id sets of the
    /// two indexes differ.
    pub fn open(
        layout: &CorpusLayout,
        version: &str,
        provider: Arc<dyn EmbeddingProvider>,
        retrieval: RetrievalConfig,
        indexing: &IndexingConfig,
    ) -> Result<Self, RetrieveError> {
        let manifest = Manifest::load(&layout.manifest_path(version))
            .map_err(|e| RetrieveError::Store(e.to_string()))?;

        let store = ChunkStore::open(&layout.store_path(version))
            .map_err(|e| RetrieveError::Store(e.to_string()))?;

        let dense = DenseIndex::load(
            &store,
            manifest.dim,
            indexing.hnsw_ef_construction,
            indexing.hnsw_m,
        )
        .map_err(|e| RetrieveError::DenseSearch(e.to_string()))?;

        let sparse = SparseIndex::open_readonly(layout.sparse_dir(version))
            .map_err(|e| RetrieveError::SparseSearch(e.to_string()))?;

        let retriever = Self::from_parts(provider, dense, sparse, store, manifest, retrieval);
        retriever.verify_correspondence()?;
        Ok(retriever)
    }

    /// Assemble a retriever from already-opened parts.
    ///
    /// The declared chunk-id sets come from the manifest; correspondence is
    /// verified on every retrieve (use [`HybridRetriever::open`] to also
    /// fail fast at open time).
    pub fn from_parts(
        provider: Arc<dyn EmbeddingProvider>,
        dense: DenseIndex,
        sparse: SparseIndex,
        store: ChunkStore,
        manifest: Manifest,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            provider,
            dense: Arc::new(dense),
            sparse: Arc::new(sparse),
            store: Arc::new(store),
            version: manifest.version,
            dense_ids: manifest.dense_chunk_ids.into_iter().collect(),
            sparse_ids: manifest.sparse_chunk_ids.into_iter().collect(),
            config,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The 1:1 chunk-id correspondence invariant: the two declared sets must
    /// match each other, and the dense index contents must match its
    /// declaration.
    fn verify_correspondence(&self) -> Result<(), RetrieveError> {
        if self.dense_ids != self.sparse_ids {
            return Err(RetrieveError::IndexMismatch {
                version: self.version.clone(),
            });
        }

        if self.dense.len() != self.dense_ids.len()
            || !self
                .dense
                .chunk_ids()
                .iter()
                .all(|id| self.dense_ids.contains(id))
        {
            return Err(RetrieveError::IndexMismatch {
                version: self.version.clone(),
            });
        }

        Ok(())
    }

    /// Retrieve the top-`k` fused results for a query.
    ///
    /// `alpha` weights the dense signal: 1.0 is pure dense ranking, 0.0 pure
    /// sparse. Candidate scoring runs both searches concurrently under the
    /// configured timeout; on expiry partial results are discarded and
    /// [`RetrieveError::Timeout`] is returned.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        alpha: f32,
    ) -> Result<Vec<RetrievalResult>, RetrieveError> {
        if query.trim().is_empty() {
            return Err(RetrieveError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }
        if !alpha.is_finite() || !(0.0..=1.0).contains(&alpha) {
            return Err(RetrieveError::InvalidQuery(format!(
                "alpha must be within [0, 1], got {}",
                alpha
            )));
        }

        // Consistency check before any scoring.
        self.verify_correspondence()?;

        if k == 0 {
            return Ok(Vec::new());
        }

        let k_prime = k.saturating_mul(self.config.oversample.max(1));
        let timeout_ms = self.config.timeout_ms;

        let provider = Arc::clone(&self.provider);
        let dense = Arc::clone(&self.dense);
        let ef_search = self.config.ef_search;
        let dense_query = query.to_string();
        let dense_task =
            tokio::task::spawn_blocking(move || -> Result<Vec<(String, f32)>, RetrieveError> {
                let embedding = provider
                    .embed_query(&dense_query)
                    .map_err(|e| RetrieveError::Embedding(e.to_string()))?;
                let hits = dense
                    .search(&embedding, k_prime, ef_search)
                    .map_err(|e| RetrieveError::DenseSearch(e.to_string()))?;
                Ok(hits.into_iter().map(|h| (h.chunk_id, h.score)).collect())
            });

        let sparse = Arc::clone(&self.sparse);
        let sparse_query = query.to_string();
        let sparse_task =
            tokio::task::spawn_blocking(move || -> Result<Vec<(String, f32)>, RetrieveError> {
                let hits = sparse.search(&sparse_query, k_prime).map_err(|e| match e {
                    SparseIndexError::QueryParse(msg) => RetrieveError::InvalidQuery(msg),
                    other => RetrieveError::SparseSearch(other.to_string()),
                })?;
                Ok(hits.into_iter().map(|h| (h.chunk_id, h.score)).collect())
            });

        let searches = async {
            let dense_hits = dense_task
                .await
                .map_err(|e| RetrieveError::DenseSearch(format!("search task failed: {}", e)))??;
            let sparse_hits = sparse_task
                .await
                .map_err(|e| RetrieveError::SparseSearch(format!("search task failed: {}", e)))??;
            Ok::<_, RetrieveError>((dense_hits, sparse_hits))
        };

        let (dense_hits, sparse_hits) =
            tokio::time::timeout(Duration::from_millis(timeout_ms), searches)
                .await
                .map_err(|_| RetrieveError::Timeout { timeout_ms })??;

        // A candidate outside the validated set means an index disagrees
        // with its declaration.
        for (chunk_id, _) in dense_hits.iter().chain(sparse_hits.iter()) {
            if !self.dense_ids.contains(chunk_id) {
                return Err(RetrieveError::IndexMismatch {
                    version: self.version.clone(),
                });
            }
        }

        let candidates = fuse(dense_hits, sparse_hits, alpha);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = candidates.iter().map(|c| c.chunk_id.clone()).collect();
        let chunks = self
            .store
            .chunks_by_ids(&ids)
            .map_err(|e| RetrieveError::Store(e.to_string()))?;
        let mut by_id: AHashMap<String, Chunk> =
            chunks.into_iter().map(|c| (c.id.clone(), c)).collect();

        let mut results = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let Some(chunk) = by_id.remove(&candidate.chunk_id) else {
                return Err(RetrieveError::Store(format!(
                    "Chunk {} is indexed but missing from the corpus store",
                    candidate.chunk_id
                )));
            };
            results.push(RetrievalResult {
                chunk_id: chunk.id,
                text: chunk.text,
                doc_summary: chunk.doc_summary,
                chunk_summary: chunk.chunk_summary,
                source_path: chunk.source_path,
                dense_score: candidate.dense_score,
                sparse_score: candidate.sparse_score,
                fused_score: candidate.fused_score,
            });
        }

        let mut results = deduplicate_results(results);
        results.truncate(k);
        Ok(results)
    }
}
