/// Ordered, concurrency-bounded batch embedding
use super::{EmbedError, EmbeddingProvider};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Item to be embedded (assembled text with its chunk id)
#[derive(Debug, Clone)]
pub struct EmbeddingItem {
    pub chunk_id: String,
    pub text: String,
}

/// Splits work into provider-sized batches, issues them concurrently up to a
/// limit, and reassembles the vectors in input order.
pub struct EmbeddingBatcher {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_concurrent: usize,
}

impl EmbeddingBatcher {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Embed every item, returning `(chunk_id, vector)` pairs in input order.
    ///
    /// A failing batch is bisected and retried at smaller granularity; a
    /// single item that still fails surfaces as
    /// `EmbedError::Unembeddable { chunk_id }`, which is fatal to the caller
    /// (dropping the item would break the 1:1 chunk/index correspondence).
    pub async fn embed_all(
        &self,
        items: Vec<EmbeddingItem>,
    ) -> Result<Vec<(String, Vec<f32>)>, EmbedError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let batches: Vec<Vec<EmbeddingItem>> = items
            .chunks(self.batch_size)
            .map(|b| b.to_vec())
            .collect();
        let batch_count = batches.len();

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(batch_count);

        for (batch_idx, batch) in batches.into_iter().enumerate() {
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&semaphore);

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| EmbedError::Generation(e.to_string()))?;

                let vectors = tokio::task::block_in_place(|| {
                    embed_with_bisect(provider.as_ref(), &batch)
                })?;

                debug!("Embedded batch {} ({} items)", batch_idx, batch.len());
                Ok::<_, EmbedError>((batch_idx, batch, vectors))
            }));
        }

        // Reassemble in input order regardless of completion order.
        let mut slots: Vec<Option<Vec<(String, Vec<f32>)>>> = vec![None; batch_count];
        for handle in handles {
            let (batch_idx, batch, vectors) = handle
                .await
                .map_err(|e| EmbedError::Generation(format!("Embedding task panicked: {}", e)))??;

            slots[batch_idx] = Some(
                batch
                    .into_iter()
                    .zip(vectors)
                    .map(|(item, vector)| (item.chunk_id, vector))
                    .collect(),
            );
        }

        Ok(slots.into_iter().flatten().flatten().collect())
    }
}

/// Embed one batch, bisecting on failure to isolate the offending item.
fn embed_with_bisect(
    provider: &dyn EmbeddingProvider,
    items: &[EmbeddingItem],
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let texts: Vec<String> = items.iter().map(|item| item.text.clone()).collect();

    match provider.embed_batch(&texts) {
        Ok(vectors) => {
            if vectors.len() != items.len() {
                return Err(EmbedError::Generation(format!(
                    "Embedding count mismatch: expected {}, got {}",
                    items.len(),
                    vectors.len()
                )));
            }
            Ok(vectors)
        }
        Err(e) => {
            if items.len() == 1 {
                return Err(EmbedError::Unembeddable {
                    chunk_id: items[0].chunk_id.clone(),
                    reason: e.to_string(),
                });
            }

            warn!(
                "Batch of {} failed ({}); retrying at smaller granularity",
                items.len(),
                e
            );
            let mid = items.len() / 2;
            let mut vectors = embed_with_bisect(provider, &items[..mid])?;
            vectors.extend(embed_with_bisect(provider, &items[mid..])?);
            Ok(vectors)
        }
    }
}
