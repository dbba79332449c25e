/// Tantivy keyword index for sparse (BM25) relevance search
use std::path::PathBuf;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError, Term};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SparseIndexError {
    #[error("Index initialization failed: {0}")]
    Initialization(String),

    #[error("Index not found: {0}")]
    NotFound(String),

    #[error("Insert failed: {0}")]
    Insert(String),

    #[error("Search failed: {0}")]
    Search(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tantivy error: {0}")]
    Tantivy(#[from] TantivyError),

    #[error("Query parsing error: {0}")]
    QueryParse(String),
}

/// Search result with chunk id and BM25 relevance score
#[derive(Debug, Clone)]
pub struct SparseHit {
    pub chunk_id: String,
    pub score: f32,
}

/// Tantivy index wrapper with BM25 ranking over assembled chunk text.
///
/// Opened read-write by the builder (single writer per corpus version) or
/// read-only by the retriever, which must not contend on tantivy's writer
/// lock.
pub struct SparseIndex {
    index: Index,
    reader: IndexReader,
    writer: Option<IndexWriter>,
    chunk_id_field: Field,
    body_field: Field,
    #[allow(dead_code)]
    index_path: PathBuf,
}

impl SparseIndex {
    /// Open the index read-write at `index_path`, creating it if absent.
    pub fn open(index_path: PathBuf) -> Result<Self, SparseIndexError> {
        if index_path.exists() && index_path.join("meta.json").exists() {
            Self::load(index_path, true)
        } else {
            Self::create(index_path)
        }
    }

    /// Open an existing index without a writer, for query-time use.
    pub fn open_readonly(index_path: PathBuf) -> Result<Self, SparseIndexError> {
        Self::load(index_path, false)
    }

    fn create(index_path: PathBuf) -> Result<Self, SparseIndexError> {
        std::fs::create_dir_all(&index_path)?;

        let mut schema_builder = Schema::builder();
        let chunk_id_field = schema_builder.add_text_field("chunk_id", STRING | STORED);
        let body_field = schema_builder.add_text_field("body", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_dir(&index_path, schema)
            .map_err(|e| SparseIndexError::Initialization(e.to_string()))?;

        Self::with_index(index, index_path, true)
    }

    fn load(index_path: PathBuf, writable: bool) -> Result<Self, SparseIndexError> {
        if !index_path.exists() {
            return Err(SparseIndexError::NotFound(index_path.display().to_string()));
        }

        let index = Index::open_in_dir(&index_path)
            .map_err(|e| SparseIndexError::Initialization(e.to_string()))?;

        Self::with_index(index, index_path, writable)
    }

    fn with_index(
        index: Index,
        index_path: PathBuf,
        writable: bool,
    ) -> Result<Self, SparseIndexError> {
        let schema = index.schema();

        let chunk_id_field = schema.get_field("chunk_id").map_err(|_| {
            SparseIndexError::Initialization("Missing 'chunk_id' field in schema".to_string())
        })?;
        let body_field = schema.get_field("body").map_err(|_| {
            SparseIndexError::Initialization("Missing 'body' field in schema".to_string())
        })?;

        let writer = if writable {
            Some(
                index
                    .writer(50_000_000)
                    .map_err(|e| SparseIndexError::Initialization(e.to_string()))?,
            )
        } else {
            None
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e: TantivyError| SparseIndexError::Initialization(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer,
            chunk_id_field,
            body_field,
            index_path,
        })
    }

    fn writer_mut(&mut self) -> Result<&mut IndexWriter, SparseIndexError> {
        self.writer
            .as_mut()
            .ok_or_else(|| SparseIndexError::Insert("Index opened read-only".to_string()))
    }

    /// Insert a chunk's assembled text. Idempotent: a prior document with
    /// the same chunk id is deleted first, so retried builds never produce
    /// duplicate postings.
    pub fn insert(&mut self, chunk_id: &str, body: &str) -> Result<(), SparseIndexError> {
        let term = Term::from_field_text(self.chunk_id_field, chunk_id);
        let chunk_id_field = self.chunk_id_field;
        let body_field = self.body_field;

        let writer = self.writer_mut()?;
        writer.delete_term(term);
        writer
            .add_document(doc!(
                chunk_id_field => chunk_id,
                body_field => body,
            ))
            .map_err(|e| SparseIndexError::Insert(e.to_string()))?;

        Ok(())
    }

    /// Commit pending changes and wait for the reader to catch up.
    pub fn commit(&mut self) -> Result<(), SparseIndexError> {
        self.writer_mut()?
            .commit()
            .map_err(|e| SparseIndexError::Insert(e.to_string()))?;

        self.reader
            .reload()
            .map_err(|e| SparseIndexError::Search(e.to_string()))?;

        Ok(())
    }

    /// Top-`limit` BM25 hits for a raw query string.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SparseHit>, SparseIndexError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.body_field]);
        let query = query_parser
            .parse_query(query)
            .map_err(|e| SparseIndexError::QueryParse(e.to_string()))?;

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .map_err(|e| SparseIndexError::Search(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved: tantivy::TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| SparseIndexError::Search(e.to_string()))?;

            let chunk_id = retrieved
                .get_first(self.chunk_id_field)
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    SparseIndexError::Search("Missing chunk_id field in document".to_string())
                })?
                .to_string();

            results.push(SparseHit { chunk_id, score });
        }

        Ok(results)
    }

    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
