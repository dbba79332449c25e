//! Chunk enrichment: document-level and chunk-level summaries
//!
//! Summaries improve matching by letting summary terms participate in both
//! indexes. The summarization capability is a trait so an LLM-backed
//! implementation can be injected; the built-in implementation is a
//! deterministic extractive summarizer, which keeps the engine fully offline
//! and makes enrichment idempotent.

use crate::config::EnrichConfig;
use crate::corpus::Chunk;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SummarizeError {
    #[error("Summarization unavailable: {0}")]
    Unavailable(String),
}

/// Summarization capability: text in, summary out.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, text: &str) -> Result<String, SummarizeError>;
}

/// Deterministic extractive summarizer: leading sentences, bounded words.
pub struct ExtractiveSummarizer {
    max_sentences: usize,
    max_words: usize,
}

impl ExtractiveSummarizer {
    pub fn new(max_sentences: usize, max_words: usize) -> Self {
        Self {
            max_sentences,
            max_words,
        }
    }
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self::new(3, 80)
    }
}

impl Summarizer for ExtractiveSummarizer {
    fn summarize(&self, text: &str) -> Result<String, SummarizeError> {
        let mut sentences = 0;
        let mut end = text.len();

        for (i, ch) in text.char_indices() {
            if matches!(ch, '.' | '!' | '?') {
                sentences += 1;
                if sentences >= self.max_sentences {
                    end = i + ch.len_utf8();
                    break;
                }
            }
        }

        Ok(truncate_words(&text[..end], self.max_words))
    }
}

/// One enrichment failure, recorded in the build diagnostics.
#[derive(Debug, Clone)]
pub struct EnrichFailure {
    pub document_id: String,
    /// `None` when the document-level summary failed
    pub chunk_id: Option<String>,
    pub reason: String,
}

/// Attaches document and chunk summaries to a document's chunk list.
pub struct Enricher {
    summarizer: Arc<dyn Summarizer>,
    doc_input_words: usize,
    context_words: usize,
}

impl Enricher {
    pub fn new(summarizer: Arc<dyn Summarizer>, config: &EnrichConfig) -> Self {
        Self {
            summarizer,
            doc_input_words: config.doc_input_words,
            context_words: config.context_words,
        }
    }

    /// Enrich a full document's chunks in place, returning the failures.
    ///
    /// Idempotent: prior summaries are overwritten, never duplicated.
    /// Best-effort: a failed summary leaves the field `None` and the build
    /// proceeds to indexing.
    pub fn enrich_document(&self, chunks: &mut [Chunk]) -> Vec<EnrichFailure> {
        let mut failures = Vec::new();

        let Some(first) = chunks.first() else {
            return failures;
        };
        let document_id = first.document_id.clone();

        // Document summary from the concatenated chunk text, truncated.
        let full_text: String = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let doc_input = truncate_words(&full_text, self.doc_input_words);

        let doc_summary = match self.summarizer.summarize(&doc_input) {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::warn!(document_id = %document_id, "Document summary failed: {}", e);
                failures.push(EnrichFailure {
                    document_id: document_id.clone(),
                    chunk_id: None,
                    reason: e.to_string(),
                });
                None
            }
        };

        // Chunk summaries from the document summary plus surrounding chunks.
        for i in 0..chunks.len() {
            let before = if i > 0 { chunks[i - 1].text.as_str() } else { "" };
            let after = chunks.get(i + 1).map(|c| c.text.as_str()).unwrap_or("");

            let prompt = format!(
                "--Document Summary--\n{}\n-- Chunk before--\n{}\n-- Target Chunk--\n{}\n-- Chunk after--\n{}",
                truncate_words(doc_summary.as_deref().unwrap_or(""), self.context_words),
                truncate_words(before, self.context_words),
                truncate_words(&chunks[i].text, self.context_words),
                truncate_words(after, self.context_words),
            );

            let chunk_summary = match self.summarizer.summarize(&prompt) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    tracing::warn!(chunk_id = %chunks[i].id, "Chunk summary failed: {}", e);
                    failures.push(EnrichFailure {
                        document_id: document_id.clone(),
                        chunk_id: Some(chunks[i].id.clone()),
                        reason: e.to_string(),
                    });
                    None
                }
            };

            chunks[i].doc_summary = doc_summary.clone();
            chunks[i].chunk_summary = chunk_summary;
        }

        failures
    }
}

/// First `max` whitespace-delimited words of `text`.
pub(crate) fn truncate_words(text: &str, max: usize) -> String {
    text.split_whitespace()
        .take(max)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnrichConfig;

    struct FailingSummarizer;

    impl Summarizer for FailingSummarizer {
        fn summarize(&self, _text: &str) -> Result<String, SummarizeError> {
            Err(SummarizeError::Unavailable("model offline".to_string()))
        }
    }

    fn chunks() -> Vec<Chunk> {
        ["First passage about credit facilities. It has detail.",
         "Second passage about repayment schedules. More detail.",
         "Third passage about covenants."]
            .iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                id: Chunk::make_id("doc", i),
                document_id: "doc".to_string(),
                text: text.to_string(),
                word_count: crate::chunking::count_words(text),
                token_count: crate::chunking::estimate_tokens(text),
                doc_summary: None,
                chunk_summary: None,
                source_path: "doc.txt".to_string(),
            })
            .collect()
    }

    fn enricher() -> Enricher {
        Enricher::new(
            Arc::new(ExtractiveSummarizer::default()),
            &EnrichConfig {
                doc_input_words: 100,
                context_words: 50,
            },
        )
    }

    #[test]
    fn attaches_both_summaries() {
        let mut chunks = chunks();
        let failures = enricher().enrich_document(&mut chunks);

        assert!(failures.is_empty());
        for chunk in &chunks {
            assert!(chunk.doc_summary.is_some());
            assert!(chunk.chunk_summary.is_some());
        }
        // All chunks of a document share the same document summary.
        assert_eq!(chunks[0].doc_summary, chunks[2].doc_summary);
    }

    #[test]
    fn is_idempotent() {
        let mut first = chunks();
        let e = enricher();
        e.enrich_document(&mut first);

        let mut second = first.clone();
        e.enrich_document(&mut second);

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.doc_summary, b.doc_summary);
            assert_eq!(a.chunk_summary, b.chunk_summary);
        }
    }

    #[test]
    fn failures_leave_none_and_are_reported() {
        let mut chunks = chunks();
        let e = Enricher::new(
            Arc::new(FailingSummarizer),
            &EnrichConfig {
                doc_input_words: 100,
                context_words: 50,
            },
        );
        let failures = e.enrich_document(&mut chunks);

        // One document failure plus one per chunk.
        assert_eq!(failures.len(), 1 + chunks.len());
        assert!(failures[0].chunk_id.is_none());
        for chunk in &chunks {
            assert!(chunk.doc_summary.is_none());
            assert!(chunk.chunk_summary.is_none());
        }
    }

    #[test]
    fn empty_chunk_list_is_a_no_op() {
        let mut chunks: Vec<Chunk> = Vec::new();
        let failures = enricher().enrich_document(&mut chunks);
        assert!(failures.is_empty());
    }

    #[test]
    fn extractive_summary_is_bounded() {
        let s = ExtractiveSummarizer::new(2, 10);
        let text = "One sentence here. Two sentences here. Three sentences here. Four.";
        let summary = s.summarize(text).unwrap();
        assert!(summary.split_whitespace().count() <= 10);
        assert!(summary.contains("One sentence"));
        assert!(!summary.contains("Three"));
    }
}
