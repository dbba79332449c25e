/// HNSW vector index for dense similarity search
use crate::corpus::ChunkStore;
use hnsw_rs::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DenseIndexError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Index load failed: {0}")]
    Load(String),
}

/// Search result with chunk id and similarity score
#[derive(Debug, Clone)]
pub struct DenseHit {
    pub chunk_id: String,
    /// Cosine similarity derived score (1 - cosine distance); raw range
    /// depends on the metric, normalized per candidate set before fusion
    pub score: f32,
}

/// HNSW index over chunk embeddings
///
/// The durable artifact is the embeddings table in the chunk store; the HNSW
/// graph is rebuilt from it at open time and is immutable for the lifetime
/// of a corpus version handle. Internal ids are sequential positions in
/// `chunk_ids`.
pub struct DenseIndex {
    index: Hnsw<'static, f32, DistCosine>,
    chunk_ids: Vec<String>,
    dimension: usize,
}

impl DenseIndex {
    pub fn new(dimension: usize, ef_construction: usize, m: usize, capacity: usize) -> Self {
        let index = Hnsw::<f32, DistCosine>::new(
            m,
            capacity.max(1024),
            16, // max layers
            ef_construction,
            DistCosine,
        );

        Self {
            index,
            chunk_ids: Vec::new(),
            dimension,
        }
    }

    /// Rebuild the index from a chunk store's embeddings, in corpus order.
    pub fn load(
        store: &ChunkStore,
        dimension: usize,
        ef_construction: usize,
        m: usize,
    ) -> crate::error::Result<Self> {
        let embeddings = store.embeddings()?;
        let mut index = Self::new(dimension, ef_construction, m, embeddings.len());

        for (chunk_id, vector) in &embeddings {
            index
                .insert(chunk_id, vector)
                .map_err(|e| crate::error::QuarryError::DenseIndex(e.to_string()))?;
        }

        tracing::debug!("Dense index loaded: {} vectors ({}D)", index.len(), dimension);
        Ok(index)
    }

    pub fn insert(&mut self, chunk_id: &str, vector: &[f32]) -> Result<(), DenseIndexError> {
        if vector.len() != self.dimension {
            return Err(DenseIndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let internal_id = self.chunk_ids.len();
        let data = vector.to_vec();
        self.index.insert((&data, internal_id));
        self.chunk_ids.push(chunk_id.to_string());

        Ok(())
    }

    /// Top-k nearest neighbours, sorted by similarity descending.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
    ) -> Result<Vec<DenseHit>, DenseIndexError> {
        if query.len() != self.dimension {
            return Err(DenseIndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        if self.chunk_ids.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let neighbours = self.index.search(query, k, ef_search);

        Ok(neighbours
            .into_iter()
            .filter_map(|n| {
                self.chunk_ids.get(n.d_id).map(|chunk_id| DenseHit {
                    chunk_id: chunk_id.clone(),
                    score: 1.0 - n.distance,
                })
            })
            .collect())
    }

    /// Chunk ids held by the index, in insertion order.
    pub fn chunk_ids(&self) -> &[String] {
        &self.chunk_ids
    }

    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
