//! Result deduplication by chunk id and by near-duplicate text

use crate::corpus::normalized_text_key;
use crate::retrieval::RetrievalResult;
use ahash::AHashSet;

/// Deduplicate ranked results.
///
/// A chunk id appears at most once regardless of how many signals matched
/// it, and two chunks with identical normalized text keep only one instance.
/// The input is sorted by fused score descending, so keeping the first
/// occurrence keeps the higher-scored instance.
pub fn deduplicate_results(results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    let mut seen_ids: AHashSet<String> = AHashSet::new();
    let mut seen_texts: AHashSet<String> = AHashSet::new();

    results
        .into_iter()
        .filter(|result| {
            seen_ids.insert(result.chunk_id.clone())
                && seen_texts.insert(normalized_text_key(&result.text))
        })
        .collect()
}
