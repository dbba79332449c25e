//! Knowledge-base construction pipeline
//!
//! Orchestrates Chunker -> Enricher -> Embedder -> {dense, sparse} index as
//! a state machine (`Empty -> Chunked -> Enriched -> Indexed`). Every
//! stage's output is durable in the chunk store before the next stage runs,
//! so a failed build resumes from the version it left behind without
//! re-chunking or re-embedding. Completed builds atomically repoint the
//! `CURRENT` pointer; index writes are single-writer, guarded by an
//! exclusive lock file.

use crate::chunking::{count_words, estimate_tokens, Chunker};
use crate::config::Config;
use crate::corpus::{BuildState, Chunk, ChunkStore, CorpusLayout, Manifest};
use crate::embedding::{EmbeddingBatcher, EmbeddingItem, EmbeddingProvider};
use crate::enrich::{EnrichFailure, Enricher, Summarizer};
use crate::error::{QuarryError, Result};
use crate::index::SparseIndex;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// How a build treats existing corpus state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Start from a cleared corpus
    Rebuild,
    /// Append new documents to a copy of the current version
    Incremental,
}

/// One raw document, as produced by the external text extractor.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub document_id: String,
    pub source_path: String,
    pub text: String,
}

/// A document the build skipped; non-fatal, the batch continues.
#[derive(Debug, Clone)]
pub struct SkippedDocument {
    pub document_id: String,
    pub source_path: String,
    pub reason: String,
}

/// Per-build diagnostics report.
#[derive(Debug)]
pub struct BuildReport {
    pub version: String,
    /// Documents chunked by this build
    pub documents: usize,
    /// Chunks appended by this build
    pub chunks: usize,
    /// Embeddings generated by this build
    pub embedded: usize,
    pub skipped: Vec<SkippedDocument>,
    pub enrich_failures: Vec<EnrichFailure>,
    pub duration_ms: u64,
}

/// Exclusive build lock: concurrent builds would interleave index writes
/// and break the 1:1 chunk-id correspondence.
struct BuildLock {
    path: PathBuf,
}

impl BuildLock {
    fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QuarryError::Io {
                source: e,
                context: format!("Failed to create data directory: {:?}", parent),
            })?;
        }

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                Ok(Self {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let pid = std::fs::read_to_string(path)
                    .ok()
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(0);
                Err(QuarryError::BuildInProgress { pid })
            }
            Err(e) => Err(QuarryError::Io {
                source: e,
                context: format!("Failed to acquire build lock: {}", path.display()),
            }),
        }
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

enum ChunkOutcome {
    Chunked { count: usize },
    Skipped(SkippedDocument),
}

/// Builds corpus versions from raw documents.
pub struct KnowledgeBaseBuilder {
    layout: CorpusLayout,
    config: Config,
    chunker: Arc<Chunker>,
    enricher: Arc<Enricher>,
    provider: Arc<dyn EmbeddingProvider>,
}

impl KnowledgeBaseBuilder {
    pub fn new(
        config: Config,
        summarizer: Arc<dyn Summarizer>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let data_dir = config.data_dir()?;

        Ok(Self {
            layout: CorpusLayout::new(data_dir),
            chunker: Arc::new(Chunker::new(&config.chunking)),
            enricher: Arc::new(Enricher::new(summarizer, &config.enrich)),
            provider,
            config,
        })
    }

    pub fn layout(&self) -> &CorpusLayout {
        &self.layout
    }

    /// Run a full build over a document batch.
    ///
    /// A version directory left behind by a failed build (tracked by the
    /// `PENDING` marker) is resumed instead of starting over; its durable
    /// stage outputs are reused.
    pub async fn build(
        &self,
        documents: Vec<DocumentInput>,
        mode: BuildMode,
    ) -> Result<BuildReport> {
        let started = std::time::Instant::now();
        let _lock = BuildLock::acquire(&self.layout.lock_path())?;

        let version = self.prepare_version(mode)?;
        let store = Arc::new(ChunkStore::open(&self.layout.store_path(&version))?);

        let mut report = BuildReport {
            version: version.clone(),
            documents: 0,
            chunks: 0,
            embedded: 0,
            skipped: Vec::new(),
            enrich_failures: Vec::new(),
            duration_ms: 0,
        };

        self.stage_chunk(&store, documents, &mut report).await?;
        self.stage_enrich(&store, &mut report).await?;
        let (dense_ids, sparse_ids) = self.stage_index(&store, &version, &mut report).await?;

        let manifest = Manifest {
            version: version.clone(),
            created_at: chrono::Utc::now(),
            model: self.provider.model_name().to_string(),
            dim: self.provider.dimension(),
            chunk_count: sparse_ids.len(),
            dense_chunk_ids: dense_ids.into_iter().collect(),
            sparse_chunk_ids: sparse_ids.into_iter().collect(),
        };
        manifest.save(&self.layout.manifest_path(&version))?;

        self.layout.set_current(&version)?;
        let _ = std::fs::remove_file(self.pending_path());

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            version = %version,
            documents = report.documents,
            chunks = report.chunks,
            embedded = report.embedded,
            skipped = report.skipped.len(),
            "Build complete in {}ms",
            report.duration_ms
        );

        Ok(report)
    }

    fn pending_path(&self) -> PathBuf {
        self.layout.data_dir().join("PENDING")
    }

    /// Pick the version directory to build into: a pending (failed) build is
    /// resumed; otherwise incremental copies the current version forward and
    /// rebuild starts fresh.
    fn prepare_version(&self, mode: BuildMode) -> Result<String> {
        let pending_path = self.pending_path();

        if pending_path.exists() {
            let version = std::fs::read_to_string(&pending_path)
                .map_err(|e| QuarryError::Io {
                    source: e,
                    context: "Failed to read PENDING marker".to_string(),
                })?
                .trim()
                .to_string();

            if self.layout.version_dir(&version).exists() {
                info!(version = %version, "Resuming pending build");
                return Ok(version);
            }
        }

        let version = CorpusLayout::new_version_id();
        let version_dir = self.layout.version_dir(&version);

        match mode {
            BuildMode::Rebuild => {
                std::fs::create_dir_all(&version_dir).map_err(|e| QuarryError::Io {
                    source: e,
                    context: format!("Failed to create version dir: {}", version_dir.display()),
                })?;
            }
            BuildMode::Incremental => {
                let previous = self
                    .layout
                    .current_version()?
                    .ok_or(QuarryError::NoCurrentCorpus)?;
                let previous_dir = self.layout.version_dir(&previous);
                if !previous_dir.exists() {
                    return Err(QuarryError::CorpusNotFound { version: previous });
                }
                info!(previous = %previous, next = %version, "Copying corpus forward for incremental build");
                copy_dir_recursive(&previous_dir, &version_dir)?;
            }
        }

        std::fs::write(&pending_path, &version).map_err(|e| QuarryError::Io {
            source: e,
            context: "Failed to write PENDING marker".to_string(),
        })?;

        Ok(version)
    }

    /// Stage 1: chunk documents with bounded worker parallelism. The chunk
    /// store serializes writes; each document's chunks are appended in one
    /// transaction.
    async fn stage_chunk(
        &self,
        store: &Arc<ChunkStore>,
        documents: Vec<DocumentInput>,
        report: &mut BuildReport,
    ) -> Result<()> {
        info!(documents = documents.len(), "Chunking stage started");

        let semaphore = Arc::new(Semaphore::new(self.config.build.doc_workers));
        let mut handles = Vec::with_capacity(documents.len());

        for doc in documents {
            let store = Arc::clone(store);
            let chunker = Arc::clone(&self.chunker);
            let semaphore = Arc::clone(&semaphore);

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| QuarryError::Config(e.to_string()))?;
                tokio::task::spawn_blocking(move || chunk_one(&store, &chunker, doc))
                    .await
                    .map_err(|e| QuarryError::Config(format!("Chunking task panicked: {}", e)))?
            }));
        }

        for handle in handles {
            match handle
                .await
                .map_err(|e| QuarryError::Config(format!("Chunking task failed: {}", e)))??
            {
                ChunkOutcome::Chunked { count } => {
                    report.documents += 1;
                    report.chunks += count;
                }
                ChunkOutcome::Skipped(skipped) => {
                    warn!(
                        document_id = %skipped.document_id,
                        reason = %skipped.reason,
                        "Skipped document"
                    );
                    report.skipped.push(skipped);
                }
            }
        }

        store.set_state(BuildState::Chunked)?;
        info!(
            documents = report.documents,
            chunks = report.chunks,
            "Chunking stage complete"
        );
        Ok(())
    }

    /// Stage 2: attach summaries, best-effort, bounded parallelism across
    /// documents. Only documents with unenriched chunks are processed, so
    /// incremental builds do not reprocess prior chunks.
    async fn stage_enrich(&self, store: &Arc<ChunkStore>, report: &mut BuildReport) -> Result<()> {
        let doc_ids = store.documents_needing_enrichment()?;
        info!(documents = doc_ids.len(), "Enrichment stage started");

        let semaphore = Arc::new(Semaphore::new(self.config.build.doc_workers));
        let mut handles = Vec::with_capacity(doc_ids.len());

        for document_id in doc_ids {
            let store = Arc::clone(store);
            let enricher = Arc::clone(&self.enricher);
            let semaphore = Arc::clone(&semaphore);

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| QuarryError::Config(e.to_string()))?;
                tokio::task::spawn_blocking(move || enrich_one(&store, &enricher, &document_id))
                    .await
                    .map_err(|e| QuarryError::Config(format!("Enrichment task panicked: {}", e)))?
            }));
        }

        for handle in handles {
            let failures = handle
                .await
                .map_err(|e| QuarryError::Config(format!("Enrichment task failed: {}", e)))??;
            report.enrich_failures.extend(failures);
        }

        store.set_state(BuildState::Enriched)?;
        info!(
            failures = report.enrich_failures.len(),
            "Enrichment stage complete"
        );
        Ok(())
    }

    /// Stage 3: embed whatever still lacks a vector, then (re)write the
    /// sparse index over all chunks. Sparse inserts are idempotent, so a
    /// resumed or incremental build converges to the same index contents.
    async fn stage_index(
        &self,
        store: &Arc<ChunkStore>,
        version: &str,
        report: &mut BuildReport,
    ) -> Result<(BTreeSet<String>, BTreeSet<String>)> {
        let pending = store.unembedded_chunks()?;
        info!(chunks = pending.len(), "Indexing stage started");

        // Dimension and model are fixed per corpus.
        let dim = self.provider.dimension();
        let model = self.provider.model_name().to_string();
        match store.meta("dim")? {
            Some(stored) if stored != dim.to_string() => {
                return Err(QuarryError::Config(format!(
                    "Embedding dimension changed from {} to {}; rebuild the corpus",
                    stored, dim
                )));
            }
            Some(_) => {}
            None => {
                store.set_meta("dim", &dim.to_string())?;
                store.set_meta("model", &model)?;
            }
        }

        let items: Vec<EmbeddingItem> = pending
            .iter()
            .map(|chunk| EmbeddingItem {
                chunk_id: chunk.id.clone(),
                text: chunk.embedding_text(),
            })
            .collect();

        let batcher = EmbeddingBatcher::new(
            Arc::clone(&self.provider),
            self.config.embedding.batch_size,
            self.config.embedding.max_concurrent_batches,
        );
        let embedded = batcher.embed_all(items).await?;

        for (chunk_id, vector) in &embedded {
            store.append_embedding(chunk_id, vector, &model)?;
        }
        report.embedded = embedded.len();

        let all_chunks = store.all_chunks()?;
        let mut sparse = SparseIndex::open(self.layout.sparse_dir(version))
            .map_err(|e| QuarryError::SparseIndex(e.to_string()))?;
        for chunk in &all_chunks {
            sparse
                .insert(&chunk.id, &chunk.embedding_text())
                .map_err(|e| QuarryError::SparseIndex(e.to_string()))?;
        }
        sparse
            .commit()
            .map_err(|e| QuarryError::SparseIndex(e.to_string()))?;

        // Both indexes must hold exactly the same chunk-id set.
        let dense_ids: BTreeSet<String> = store.embedded_chunk_ids()?.into_iter().collect();
        let sparse_ids: BTreeSet<String> = all_chunks.iter().map(|c| c.id.clone()).collect();
        if dense_ids != sparse_ids {
            return Err(QuarryError::IndexInconsistent {
                version: version.to_string(),
            });
        }

        store.set_state(BuildState::Indexed)?;
        info!(
            embedded = report.embedded,
            indexed = sparse_ids.len(),
            "Indexing stage complete"
        );
        Ok((dense_ids, sparse_ids))
    }
}

fn chunk_one(store: &ChunkStore, chunker: &Chunker, doc: DocumentInput) -> Result<ChunkOutcome> {
    let hash = blake3::hash(doc.text.as_bytes()).to_hex().to_string();

    match store.document_raw_hash(&doc.document_id)? {
        Some(existing) if existing == hash => {
            if store.document_chunk_count(&doc.document_id)? > 0 {
                return Ok(ChunkOutcome::Skipped(SkippedDocument {
                    document_id: doc.document_id,
                    source_path: doc.source_path,
                    reason: "unchanged since last build".to_string(),
                }));
            }
            // Same content but no chunks: a prior run stored the document
            // and failed before chunking; fall through and chunk it now.
        }
        Some(_) => {
            return Ok(ChunkOutcome::Skipped(SkippedDocument {
                document_id: doc.document_id,
                source_path: doc.source_path,
                reason: "content changed since last build; run a rebuild".to_string(),
            }));
        }
        None => {
            store.upsert_document(&doc.document_id, &doc.source_path, &doc.text)?;
        }
    }

    let chunks: Vec<Chunk> = chunker
        .chunk(&doc.text)
        .enumerate()
        .map(|(seq, text)| Chunk {
            id: Chunk::make_id(&doc.document_id, seq),
            document_id: doc.document_id.clone(),
            text: text.to_string(),
            word_count: count_words(text),
            token_count: estimate_tokens(text),
            doc_summary: None,
            chunk_summary: None,
            source_path: doc.source_path.clone(),
        })
        .collect();

    if chunks.is_empty() {
        return Ok(ChunkOutcome::Skipped(SkippedDocument {
            document_id: doc.document_id,
            source_path: doc.source_path,
            reason: "empty or unparseable document".to_string(),
        }));
    }

    let count = chunks.len();
    store.append_chunks(&chunks)?;
    Ok(ChunkOutcome::Chunked { count })
}

fn enrich_one(
    store: &ChunkStore,
    enricher: &Enricher,
    document_id: &str,
) -> Result<Vec<EnrichFailure>> {
    let mut chunks = store.chunks_for_document(document_id)?;
    let failures = enricher.enrich_document(&mut chunks);

    for chunk in &chunks {
        store.update_summaries(
            &chunk.id,
            chunk.doc_summary.as_deref(),
            chunk.chunk_summary.as_deref(),
        )?;
    }

    Ok(failures)
}

fn copy_dir_recursive(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to).map_err(|e| QuarryError::Io {
        source: e,
        context: format!("Failed to create directory: {}", to.display()),
    })?;

    for entry in std::fs::read_dir(from).map_err(|e| QuarryError::Io {
        source: e,
        context: format!("Failed to read directory: {}", from.display()),
    })? {
        let entry = entry.map_err(|e| QuarryError::Io {
            source: e,
            context: "Failed to read directory entry".to_string(),
        })?;
        let target = to.join(entry.file_name());

        if entry.path().is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| QuarryError::Io {
                source: e,
                context: format!("Failed to copy {:?}", entry.path()),
            })?;
        }
    }

    Ok(())
}
