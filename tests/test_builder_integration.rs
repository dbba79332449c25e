//! Knowledge-base builder integration tests
//!
//! Exercise the full chunk -> enrich -> embed -> index pipeline offline with
//! a deterministic fake embedding provider.

mod common;

use common::{doc, generated_doc, test_config, FailingEmbedder, HashedEmbedder};
use quarry::builder::{BuildMode, KnowledgeBaseBuilder};
use quarry::corpus::{BuildState, ChunkStore, CorpusLayout, Manifest};
use quarry::enrich::ExtractiveSummarizer;
use quarry::error::QuarryError;
use std::sync::Arc;
use tempfile::TempDir;

fn builder(temp: &TempDir) -> KnowledgeBaseBuilder {
    KnowledgeBaseBuilder::new(
        test_config(temp.path()),
        Arc::new(ExtractiveSummarizer::default()),
        Arc::new(HashedEmbedder),
    )
    .unwrap()
}

fn failing_builder(temp: &TempDir) -> KnowledgeBaseBuilder {
    KnowledgeBaseBuilder::new(
        test_config(temp.path()),
        Arc::new(ExtractiveSummarizer::default()),
        Arc::new(FailingEmbedder),
    )
    .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn full_pipeline_produces_consistent_corpus() {
    let temp = TempDir::new().unwrap();
    let b = builder(&temp);

    let documents = vec![
        generated_doc("alpha", 30, 12),
        generated_doc("beta", 20, 15),
        generated_doc("gamma", 40, 8),
    ];
    let originals: Vec<(String, String)> = documents
        .iter()
        .map(|d| (d.document_id.clone(), d.text.clone()))
        .collect();

    let report = b.build(documents, BuildMode::Rebuild).await.unwrap();

    assert_eq!(report.documents, 3);
    assert!(report.chunks > 3);
    assert_eq!(report.embedded, report.chunks);
    assert!(report.skipped.is_empty());
    assert!(report.enrich_failures.is_empty());

    let layout = b.layout();
    assert_eq!(
        layout.current_version().unwrap().as_deref(),
        Some(report.version.as_str())
    );

    let store = ChunkStore::open(&layout.store_path(&report.version)).unwrap();
    let stats = store.stats().unwrap();
    assert_eq!(stats.state, BuildState::Indexed);
    assert_eq!(stats.chunk_count, report.chunks);
    assert_eq!(stats.embedding_count, report.chunks);

    // Chunk bounds hold; the ordered concatenation of a document's chunks
    // reconstructs the original text.
    for (document_id, original) in &originals {
        let chunks = store.chunks_for_document(document_id).unwrap();
        assert!(!chunks.is_empty());

        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(&joined, original);

        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.word_count >= 10, "non-final chunk under min_words");
        }
        for chunk in &chunks {
            assert!(chunk.token_count <= 128, "chunk over max_tokens");
            assert!(chunk.doc_summary.is_some());
            assert!(chunk.chunk_summary.is_some());
        }
    }

    // The manifest declares identical chunk-id sets for both indexes.
    let manifest = Manifest::load(&layout.manifest_path(&report.version)).unwrap();
    assert_eq!(manifest.dense_chunk_ids, manifest.sparse_chunk_ids);
    assert_eq!(manifest.chunk_count, report.chunks);
}

#[tokio::test(flavor = "multi_thread")]
async fn identical_documents_get_disjoint_chunk_ids() {
    let temp = TempDir::new().unwrap();
    let b = builder(&temp);

    let text = generated_doc("x", 15, 12).text;
    let report = b
        .build(
            vec![doc("first_copy", &text), doc("second_copy", &text)],
            BuildMode::Rebuild,
        )
        .await
        .unwrap();

    let store = ChunkStore::open(&b.layout().store_path(&report.version)).unwrap();
    let first: Vec<String> = store
        .chunks_for_document("first_copy")
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    let second: Vec<String> = store
        .chunks_for_document("second_copy")
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();

    assert!(!first.is_empty());
    assert_eq!(first.len(), second.len());
    for id in &first {
        assert!(!second.contains(id));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_document_is_skipped_not_fatal() {
    let temp = TempDir::new().unwrap();
    let b = builder(&temp);

    let report = b
        .build(
            vec![generated_doc("real", 20, 12), doc("blank", "   \n\n  ")],
            BuildMode::Rebuild,
        )
        .await
        .unwrap();

    assert_eq!(report.documents, 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].document_id, "blank");
    assert!(report.skipped[0].reason.contains("empty"));
}

#[tokio::test(flavor = "multi_thread")]
async fn incremental_append_adds_without_reprocessing() {
    let temp = TempDir::new().unwrap();
    let b = builder(&temp);

    let doc_a = generated_doc("alpha", 20, 12);
    let first = b.build(vec![doc_a.clone()], BuildMode::Rebuild).await.unwrap();

    let doc_b = generated_doc("beta", 20, 12);
    let second = b
        .build(vec![doc_a, doc_b], BuildMode::Incremental)
        .await
        .unwrap();

    // New version, prior one untouched.
    assert_ne!(first.version, second.version);
    assert_eq!(
        b.layout().current_version().unwrap().as_deref(),
        Some(second.version.as_str())
    );

    // The unchanged document was skipped, only the new one chunked.
    assert_eq!(second.documents, 1);
    assert_eq!(second.skipped.len(), 1);
    assert_eq!(second.skipped[0].document_id, "alpha");
    assert!(second.skipped[0].reason.contains("unchanged"));

    // Prior chunks survive with their ids; new chunks joined them.
    let store = ChunkStore::open(&b.layout().store_path(&second.version)).unwrap();
    let alpha_chunks = store.chunks_for_document("alpha").unwrap();
    let beta_chunks = store.chunks_for_document("beta").unwrap();
    assert_eq!(alpha_chunks.len(), first.chunks);
    assert!(!beta_chunks.is_empty());

    let manifest = Manifest::load(&b.layout().manifest_path(&second.version)).unwrap();
    assert_eq!(
        manifest.chunk_count,
        alpha_chunks.len() + beta_chunks.len()
    );

    // The first version's store is still intact on disk.
    let old_store = ChunkStore::open(&b.layout().store_path(&first.version)).unwrap();
    assert_eq!(old_store.stats().unwrap().chunk_count, first.chunks);
}

#[tokio::test(flavor = "multi_thread")]
async fn incremental_without_corpus_is_rejected() {
    let temp = TempDir::new().unwrap();
    let b = builder(&temp);

    let result = b
        .build(vec![generated_doc("alpha", 10, 12)], BuildMode::Incremental)
        .await;
    assert!(matches!(result, Err(QuarryError::NoCurrentCorpus)));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_indexing_resumes_without_rechunking() {
    let temp = TempDir::new().unwrap();
    let documents = vec![generated_doc("alpha", 20, 12), generated_doc("beta", 15, 12)];

    // First attempt: embedding provider is down; chunking and enrichment
    // are durable, indexing fails.
    let failing = failing_builder(&temp);
    let error = failing
        .build(documents.clone(), BuildMode::Rebuild)
        .await
        .unwrap_err();
    assert!(matches!(error, QuarryError::Embedding(_)));

    let layout = CorpusLayout::new(temp.path().to_path_buf());
    assert!(layout.current_version().unwrap().is_none());

    let pending = std::fs::read_to_string(temp.path().join("PENDING")).unwrap();
    let pending = pending.trim().to_string();
    let store = ChunkStore::open(&layout.store_path(&pending)).unwrap();
    let stats = store.stats().unwrap();
    assert_eq!(stats.state, BuildState::Enriched);
    assert!(stats.chunk_count > 0);
    assert_eq!(stats.embedding_count, 0);
    let chunks_after_failure = stats.chunk_count;

    // Retry with a working provider: the pending version is resumed, no
    // document is re-chunked, and the build completes.
    let working = builder(&temp);
    let report = working.build(documents, BuildMode::Rebuild).await.unwrap();

    assert_eq!(report.version, pending);
    assert_eq!(report.documents, 0);
    assert_eq!(report.chunks, 0);
    assert!(report
        .skipped
        .iter()
        .all(|s| s.reason.contains("unchanged")));
    assert_eq!(report.embedded, chunks_after_failure);

    assert_eq!(
        layout.current_version().unwrap().as_deref(),
        Some(pending.as_str())
    );
    assert!(!temp.path().join("PENDING").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_builds_are_rejected() {
    let temp = TempDir::new().unwrap();
    let b = builder(&temp);

    // Simulate another builder holding the lock.
    std::fs::create_dir_all(temp.path()).unwrap();
    std::fs::write(b.layout().lock_path(), "4242").unwrap();

    let result = b
        .build(vec![generated_doc("alpha", 10, 12)], BuildMode::Rebuild)
        .await;
    assert!(matches!(
        result,
        Err(QuarryError::BuildInProgress { pid: 4242 })
    ));

    std::fs::remove_file(b.layout().lock_path()).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn enrichment_failure_is_best_effort() {
    struct BrokenSummarizer;
    impl quarry::enrich::Summarizer for BrokenSummarizer {
        fn summarize(&self, _text: &str) -> Result<String, quarry::enrich::SummarizeError> {
            Err(quarry::enrich::SummarizeError::Unavailable(
                "summarizer offline".to_string(),
            ))
        }
    }

    let temp = TempDir::new().unwrap();
    let b = KnowledgeBaseBuilder::new(
        test_config(temp.path()),
        Arc::new(BrokenSummarizer),
        Arc::new(HashedEmbedder),
    )
    .unwrap();

    let report = b
        .build(vec![generated_doc("alpha", 20, 12)], BuildMode::Rebuild)
        .await
        .unwrap();

    // Enrichment failed but indexing still completed.
    assert!(!report.enrich_failures.is_empty());
    assert!(report.embedded > 0);

    let store = ChunkStore::open(&b.layout().store_path(&report.version)).unwrap();
    assert_eq!(store.stats().unwrap().state, BuildState::Indexed);
    for chunk in store.all_chunks().unwrap() {
        assert!(chunk.doc_summary.is_none());
        assert!(chunk.chunk_summary.is_none());
    }
}
