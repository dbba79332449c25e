//! Shared test support: deterministic offline embedding providers and
//! corpus fixtures.
#![allow(dead_code)]

use quarry::builder::DocumentInput;
use quarry::config::Config;
use quarry::embedding::{EmbedError, EmbeddingProvider};
use std::path::Path;

pub const DIM: usize = 32;

/// Lexical stems that the fake embedder treats as semantically equivalent,
/// so lexically different but related texts land near each other in vector
/// space while staying invisible to keyword search.
const SYNONYMS: &[(&str, &str)] = &[
    ("obligations", "debt"),
    ("borrowings", "debt"),
    ("indebtedness", "debt"),
    ("repayment", "maturity"),
    ("repayments", "maturity"),
    ("maturities", "maturity"),
    ("timetable", "profile"),
    ("laddering", "profile"),
];

/// Deterministic bag-of-words embedder: tokens hash into fixed buckets and
/// the vector is L2-normalized, so cosine similarity tracks token overlap.
pub struct HashedEmbedder;

impl HashedEmbedder {
    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];

        for token in text.split_whitespace() {
            let token: String = token
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            if token.is_empty() {
                continue;
            }

            let stem = SYNONYMS
                .iter()
                .find(|(from, _)| *from == token)
                .map(|(_, to)| to.to_string())
                .unwrap_or(token);

            // FNV-1a
            let mut acc: u32 = 2166136261;
            for b in stem.bytes() {
                acc ^= b as u32;
                acc = acc.wrapping_mul(16777619);
            }
            v[(acc as usize) % DIM] += 1.0;
        }

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl EmbeddingProvider for HashedEmbedder {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if text.trim().is_empty() {
            return Err(EmbedError::InvalidInput("Empty text".to_string()));
        }
        Ok(Self::vector_for(text))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "hashed-test-embedder"
    }
}

/// Provider whose every batch fails, driving the bisect-and-fail path.
pub struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    fn embed_query(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Generation("provider unavailable".to_string()))
    }

    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Generation("provider unavailable".to_string()))
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "failing-test-embedder"
    }
}

/// Config pointed at a temp data dir, with bounds small enough for short
/// fixture documents.
pub fn test_config(data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = data_dir.to_path_buf();
    config.chunking.min_words = 10;
    config.chunking.max_tokens = 128;
    config.chunking.boundary_tolerance = 16;
    config.enrich.doc_input_words = 200;
    config.enrich.context_words = 100;
    config.embedding.batch_size = 4;
    config.embedding.max_concurrent_batches = 2;
    config.build.doc_workers = 2;
    config
}

pub fn doc(document_id: &str, text: &str) -> DocumentInput {
    DocumentInput {
        document_id: document_id.to_string(),
        source_path: format!("{}.txt", document_id),
        text: text.to_string(),
    }
}

/// A document of `n` generated sentences, `words` words each.
pub fn generated_doc(document_id: &str, n: usize, words: usize) -> DocumentInput {
    let mut text = String::new();
    for i in 0..n {
        for w in 0..words {
            text.push_str(&format!("{}term{}w{} ", document_id, i, w));
        }
        text.pop();
        text.push_str(". ");
    }
    doc(document_id, &text)
}
