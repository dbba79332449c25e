//! SQLite chunk store with migrations
//!
//! The durable artifact of a build: an append-only, ordered sequence of
//! chunk records plus one embedding per chunk, with raw document text
//! retained content-addressed (BLAKE3) and zstd-compressed above a size
//! threshold. Writes are serialized through the connection pool; readers
//! never mutate.

use crate::corpus::{BuildState, Chunk};
use crate::error::{QuarryError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

/// Raw document text larger than this is zstd-compressed before storage.
const COMPRESSION_THRESHOLD: usize = 1024;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Chunk store backing one corpus version
pub struct ChunkStore {
    pool: DbPool,
}

impl ChunkStore {
    /// Open (or create) the store at the given path
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QuarryError::Io {
                source: e,
                context: format!("Failed to create store directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| QuarryError::Config(format!("Failed to create connection pool: {}", e)))?;

        {
            let conn = pool
                .get()
                .map_err(|e| QuarryError::Config(format!("Failed to get connection: {}", e)))?;

            // Enable WAL mode for better concurrency
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let store = Self { pool };
        store.migrate()?;

        if store.meta("state")?.is_none() {
            store.set_state(BuildState::Empty)?;
        }

        Ok(store)
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| QuarryError::Config(format!("Failed to get connection: {}", e)))
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying corpus store migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    // --- metadata -------------------------------------------------------

    pub fn meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn state(&self) -> Result<BuildState> {
        match self.meta("state")? {
            Some(s) => BuildState::parse(&s),
            None => Ok(BuildState::Empty),
        }
    }

    pub fn set_state(&self, state: BuildState) -> Result<()> {
        self.set_meta("state", state.as_str())
    }

    // --- documents ------------------------------------------------------

    /// Store a document's raw text. Returns `false` when a document with the
    /// same id and identical content hash is already present (incremental
    /// builds skip those).
    pub fn upsert_document(
        &self,
        document_id: &str,
        source_path: &str,
        raw_text: &str,
    ) -> Result<bool> {
        let hash = blake3::hash(raw_text.as_bytes()).to_hex().to_string();

        if let Some(existing) = self.document_raw_hash(document_id)? {
            if existing == hash {
                return Ok(false);
            }
        }

        let compressed = raw_text.len() >= COMPRESSION_THRESHOLD;
        let blob = if compressed {
            zstd::encode_all(raw_text.as_bytes(), 3).map_err(|e| QuarryError::Io {
                source: e,
                context: format!("Failed to compress document: {}", document_id),
            })?
        } else {
            raw_text.as_bytes().to_vec()
        };

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO documents (document_id, source_path, raw_hash, raw_text, compressed, chunk_count, added_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, strftime('%s','now'))
             ON CONFLICT(document_id) DO UPDATE SET
                 source_path = excluded.source_path,
                 raw_hash = excluded.raw_hash,
                 raw_text = excluded.raw_text,
                 compressed = excluded.compressed",
            params![document_id, source_path, hash, blob, compressed],
        )?;

        Ok(true)
    }

    pub fn document_raw_hash(&self, document_id: &str) -> Result<Option<String>> {
        let conn = self.get_conn()?;
        let hash = conn
            .query_row(
                "SELECT raw_hash FROM documents WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    pub fn document_text(&self, document_id: &str) -> Result<Option<String>> {
        let conn = self.get_conn()?;
        let row: Option<(Vec<u8>, bool)> = conn
            .query_row(
                "SELECT raw_text, compressed FROM documents WHERE document_id = ?1",
                params![document_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((blob, compressed)) => {
                let bytes = if compressed {
                    zstd::decode_all(&blob[..]).map_err(|e| QuarryError::Io {
                        source: e,
                        context: format!("Failed to decompress document: {}", document_id),
                    })?
                } else {
                    blob
                };
                String::from_utf8(bytes)
                    .map(Some)
                    .map_err(|e| QuarryError::Config(format!("Invalid UTF-8 in document: {}", e)))
            }
        }
    }

    pub fn document_ids(&self) -> Result<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT document_id FROM documents ORDER BY added_at, document_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn document_chunk_count(&self, document_id: &str) -> Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE document_id = ?1",
            params![document_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Documents with chunks that have not been enriched yet (fresh chunks
    /// or a prior run's document-summary failure).
    pub fn documents_needing_enrichment(&self) -> Result<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT document_id FROM chunks WHERE doc_summary IS NULL ORDER BY document_id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    // --- chunks ---------------------------------------------------------

    /// Append chunk records in order. Chunk ids are UNIQUE: appending a
    /// duplicate id fails rather than silently replacing a record.
    pub fn append_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunks (chunk_id, document_id, text, word_count, token_count, doc_summary, chunk_summary, source_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    chunk.id,
                    chunk.document_id,
                    chunk.text,
                    chunk.word_count as i64,
                    chunk.token_count as i64,
                    chunk.doc_summary,
                    chunk.chunk_summary,
                    chunk.source_path,
                ],
            )?;
        }

        if let Some(first) = chunks.first() {
            tx.execute(
                "UPDATE documents SET chunk_count = (SELECT COUNT(*) FROM chunks WHERE document_id = ?1)
                 WHERE document_id = ?1",
                params![first.document_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT chunk_id, document_id, text, word_count, token_count, doc_summary, chunk_summary, source_path
             FROM chunks WHERE document_id = ?1 ORDER BY seq",
        )?;
        let chunks = stmt
            .query_map(params![document_id], row_to_chunk)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(chunks)
    }

    /// All chunks in corpus (append) order.
    pub fn all_chunks(&self) -> Result<Vec<Chunk>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT chunk_id, document_id, text, word_count, token_count, doc_summary, chunk_summary, source_path
             FROM chunks ORDER BY seq",
        )?;
        let chunks = stmt
            .query_map([], row_to_chunk)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(chunks)
    }

    /// Hydrate chunks for a set of ids (result order follows `ids`).
    pub fn chunks_by_ids(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT chunk_id, document_id, text, word_count, token_count, doc_summary, chunk_summary, source_path
             FROM chunks WHERE chunk_id = ?1",
        )?;

        let mut chunks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(chunk) = stmt.query_row(params![id], row_to_chunk).optional()? {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    /// Overwrite both summaries on a chunk (enrichment is idempotent).
    pub fn update_summaries(
        &self,
        chunk_id: &str,
        doc_summary: Option<&str>,
        chunk_summary: Option<&str>,
    ) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE chunks SET doc_summary = ?2, chunk_summary = ?3 WHERE chunk_id = ?1",
            params![chunk_id, doc_summary, chunk_summary],
        )?;
        Ok(())
    }

    // --- embeddings -----------------------------------------------------

    /// Append one embedding record for a chunk. Vectors are written once and
    /// never mutated; re-embedding means a rebuild.
    pub fn append_embedding(&self, chunk_id: &str, vector: &[f32], model: &str) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO embeddings (chunk_seq, vector, dim, model, created_at)
             SELECT seq, ?2, ?3, ?4, strftime('%s','now') FROM chunks WHERE chunk_id = ?1",
            params![chunk_id, vector_to_blob(vector), vector.len() as i64, model],
        )?;
        Ok(())
    }

    /// All embeddings in corpus order, as (chunk_id, vector) pairs.
    pub fn embeddings(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.chunk_id, e.vector FROM embeddings e
             JOIN chunks c ON c.seq = e.chunk_seq ORDER BY e.chunk_seq",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((id, blob))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, blob)| Ok((id, blob_to_vector(&blob)?)))
            .collect()
    }

    /// Chunk ids that have embeddings, in corpus order.
    pub fn embedded_chunk_ids(&self) -> Result<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.chunk_id FROM embeddings e JOIN chunks c ON c.seq = e.chunk_seq ORDER BY e.chunk_seq",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Chunks that do not yet have an embedding (resume support).
    pub fn unembedded_chunks(&self) -> Result<Vec<Chunk>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.chunk_id, c.document_id, c.text, c.word_count, c.token_count, c.doc_summary, c.chunk_summary, c.source_path
             FROM chunks c LEFT JOIN embeddings e ON e.chunk_seq = c.seq
             WHERE e.chunk_seq IS NULL ORDER BY c.seq",
        )?;
        let chunks = stmt
            .query_map([], row_to_chunk)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(chunks)
    }

    /// Get store statistics
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.get_conn()?;

        let document_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        let chunk_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        let embedding_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;

        Ok(StoreStats {
            document_count: document_count as usize,
            chunk_count: chunk_count as usize,
            embedding_count: embedding_count as usize,
            state: self.state()?,
        })
    }
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> std::result::Result<Chunk, rusqlite::Error> {
    Ok(Chunk {
        id: row.get(0)?,
        document_id: row.get(1)?,
        text: row.get(2)?,
        word_count: row.get::<_, i64>(3)? as usize,
        token_count: row.get::<_, i64>(4)? as usize,
        doc_summary: row.get(5)?,
        chunk_summary: row.get(6)?,
        source_path: row.get(7)?,
    })
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(QuarryError::Config(format!(
            "Embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Store statistics
#[derive(Debug)]
pub struct StoreStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub embedding_count: usize,
    pub state: BuildState,
}

/// Store migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Corpus metadata (build state, embedding model, dimension)
    CREATE TABLE meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    -- Source documents, raw text retained content-addressed
    CREATE TABLE documents (
        document_id TEXT PRIMARY KEY,
        source_path TEXT NOT NULL,
        raw_hash TEXT NOT NULL,
        raw_text BLOB NOT NULL,
        compressed BOOLEAN NOT NULL,
        chunk_count INTEGER NOT NULL DEFAULT 0,
        added_at INTEGER NOT NULL
    );

    CREATE INDEX idx_documents_hash ON documents(raw_hash);

    -- Chunk records; seq is the corpus order
    CREATE TABLE chunks (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        chunk_id TEXT NOT NULL UNIQUE,
        document_id TEXT NOT NULL,
        text TEXT NOT NULL,
        word_count INTEGER NOT NULL,
        token_count INTEGER NOT NULL,
        doc_summary TEXT,
        chunk_summary TEXT,
        source_path TEXT NOT NULL,
        FOREIGN KEY (document_id) REFERENCES documents(document_id) ON DELETE CASCADE
    );

    CREATE INDEX idx_chunks_document ON chunks(document_id);

    -- One embedding per chunk, written once
    CREATE TABLE embeddings (
        chunk_seq INTEGER PRIMARY KEY,
        vector BLOB NOT NULL,
        dim INTEGER NOT NULL,
        model TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        FOREIGN KEY (chunk_seq) REFERENCES chunks(seq) ON DELETE CASCADE
    );
    "#,
];
