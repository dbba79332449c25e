//! Corpus data model and on-disk layout
//!
//! A corpus version is an immutable snapshot: chunk records and embeddings in
//! `corpus.sqlite`, the sparse index directory, and a `manifest.json`
//! declaring the chunk-id sets both indexes hold. Mutation means building a
//! new version and atomically repointing the `CURRENT` file; readers keep
//! using the version they opened.

pub mod store;

use crate::error::{QuarryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use store::{ChunkStore, StoreStats};

/// A bounded passage of a document: the retrieval unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Globally unique id, namespaced by document: `<document_id>#<seq>`
    pub id: String,

    /// Id of the source document
    pub document_id: String,

    /// Raw passage text (contiguous slice of the document)
    pub text: String,

    /// Whitespace-delimited word count of `text`
    pub word_count: usize,

    /// Estimated token count of `text`
    pub token_count: usize,

    /// Document-level summary attached by enrichment
    pub doc_summary: Option<String>,

    /// Chunk-level context summary attached by enrichment
    pub chunk_summary: Option<String>,

    /// Path the document was ingested from
    pub source_path: String,
}

impl Chunk {
    /// Namespaced chunk id for the `seq`-th chunk of a document.
    pub fn make_id(document_id: &str, seq: usize) -> String {
        format!("{}#{:04}", document_id, seq)
    }

    /// The text both indexes actually index: summaries and passage in a
    /// fixed labeled layout, so summary terms participate in matching.
    pub fn embedding_text(&self) -> String {
        let doc = self
            .doc_summary
            .as_deref()
            .unwrap_or("No document summary available");
        let ctx = self
            .chunk_summary
            .as_deref()
            .unwrap_or("No context summary available");

        format!(
            "Document Summary\n{}\n\nDocument Context Summary\n{}\n\nRetrieved Document\n{}",
            doc, ctx, self.text
        )
    }
}

/// Dedup key for near-duplicate chunk text: blake3 of the lowercased,
/// whitespace-collapsed text.
pub fn normalized_text_key(text: &str) -> String {
    let normalized = text
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    blake3::hash(normalized.as_bytes()).to_hex().to_string()
}

/// Build pipeline state, persisted in corpus metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Empty,
    Chunked,
    Enriched,
    Indexed,
}

impl BuildState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildState::Empty => "empty",
            BuildState::Chunked => "chunked",
            BuildState::Enriched => "enriched",
            BuildState::Indexed => "indexed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "empty" => Ok(BuildState::Empty),
            "chunked" => Ok(BuildState::Chunked),
            "enriched" => Ok(BuildState::Enriched),
            "indexed" => Ok(BuildState::Indexed),
            other => Err(QuarryError::InvalidBuildState {
                expected: "empty|chunked|enriched|indexed".to_string(),
                found: other.to_string(),
            }),
        }
    }
}

/// Declared contents of a corpus version, written last during a build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub model: String,
    pub dim: usize,
    pub chunk_count: usize,
    /// Sorted chunk ids the dense index holds
    pub dense_chunk_ids: Vec<String>,
    /// Sorted chunk ids the sparse index holds
    pub sparse_chunk_ids: Vec<String>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to read manifest: {}", path.display()),
        })?;
        serde_json::from_str(&data).map_err(|e| QuarryError::Json {
            source: e,
            context: format!("Failed to parse manifest: {}", path.display()),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self).map_err(|e| QuarryError::Json {
            source: e,
            context: "Failed to serialize manifest".to_string(),
        })?;
        std::fs::write(path, data).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to write manifest: {}", path.display()),
        })
    }
}

/// On-disk layout of a corpus data directory.
#[derive(Debug, Clone)]
pub struct CorpusLayout {
    data_dir: PathBuf,
}

impl CorpusLayout {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.data_dir.join("versions")
    }

    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.versions_dir().join(version)
    }

    pub fn store_path(&self, version: &str) -> PathBuf {
        self.version_dir(version).join("corpus.sqlite")
    }

    pub fn sparse_dir(&self, version: &str) -> PathBuf {
        self.version_dir(version).join("sparse")
    }

    pub fn manifest_path(&self, version: &str) -> PathBuf {
        self.version_dir(version).join("manifest.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("build.lock")
    }

    fn current_path(&self) -> PathBuf {
        self.data_dir.join("CURRENT")
    }

    /// Fresh version id: timestamp plus a short random suffix.
    pub fn new_version_id() -> String {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}_{}", stamp, &suffix[..8])
    }

    /// Version the `CURRENT` pointer names, if any.
    pub fn current_version(&self) -> Result<Option<String>> {
        let path = self.current_path();
        if !path.exists() {
            return Ok(None);
        }
        let version = std::fs::read_to_string(&path).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to read CURRENT pointer: {}", path.display()),
        })?;
        Ok(Some(version.trim().to_string()))
    }

    /// Atomically repoint `CURRENT` at a version (write-temp-then-rename, so
    /// concurrent readers see either the old or the new pointer).
    pub fn set_current(&self, version: &str) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to create data dir: {}", self.data_dir.display()),
        })?;
        let tmp = self.data_dir.join("CURRENT.tmp");
        std::fs::write(&tmp, version).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to write CURRENT.tmp: {}", tmp.display()),
        })?;
        std::fs::rename(&tmp, self.current_path()).map_err(|e| QuarryError::Io {
            source: e,
            context: "Failed to repoint CURRENT".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: "doc".to_string(),
            text: text.to_string(),
            word_count: crate::chunking::count_words(text),
            token_count: crate::chunking::estimate_tokens(text),
            doc_summary: None,
            chunk_summary: None,
            source_path: "doc.txt".to_string(),
        }
    }

    #[test]
    fn chunk_ids_are_namespaced() {
        assert_eq!(Chunk::make_id("report_2024", 3), "report_2024#0003");
        assert_ne!(Chunk::make_id("a", 1), Chunk::make_id("b", 1));
    }

    #[test]
    fn embedding_text_includes_summaries() {
        let mut c = chunk("d#0000", "The facility matures in 2027.");
        c.doc_summary = Some("Annual report".to_string());
        c.chunk_summary = Some("This chunk details debt.".to_string());

        let assembled = c.embedding_text();
        assert!(assembled.contains("Document Summary\nAnnual report"));
        assert!(assembled.contains("Document Context Summary\nThis chunk details debt."));
        assert!(assembled.contains("Retrieved Document\nThe facility matures in 2027."));
    }

    #[test]
    fn embedding_text_without_summaries_uses_placeholders() {
        let c = chunk("d#0000", "text");
        let assembled = c.embedding_text();
        assert!(assembled.contains("No document summary available"));
        assert!(assembled.contains("No context summary available"));
    }

    #[test]
    fn normalized_text_key_ignores_case_and_spacing() {
        let a = normalized_text_key("Debt  Maturity\nProfile");
        let b = normalized_text_key("debt maturity profile");
        let c = normalized_text_key("debt maturity profiles");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn current_pointer_roundtrip() {
        let temp = TempDir::new().unwrap();
        let layout = CorpusLayout::new(temp.path().to_path_buf());

        assert!(layout.current_version().unwrap().is_none());
        layout.set_current("20250101_000000_abcd1234").unwrap();
        assert_eq!(
            layout.current_version().unwrap().as_deref(),
            Some("20250101_000000_abcd1234")
        );

        layout.set_current("20250102_000000_ef567890").unwrap();
        assert_eq!(
            layout.current_version().unwrap().as_deref(),
            Some("20250102_000000_ef567890")
        );
    }

    #[test]
    fn manifest_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("manifest.json");

        let manifest = Manifest {
            version: "v1".to_string(),
            created_at: Utc::now(),
            model: "all-MiniLM-L6-v2".to_string(),
            dim: 384,
            chunk_count: 2,
            dense_chunk_ids: vec!["a#0000".to_string(), "b#0000".to_string()],
            sparse_chunk_ids: vec!["a#0000".to_string(), "b#0000".to_string()],
        };
        manifest.save(&path).unwrap();

        let loaded = Manifest::load(&path).unwrap();
        assert_eq!(loaded.version, "v1");
        assert_eq!(loaded.dense_chunk_ids, manifest.dense_chunk_ids);
    }

    #[test]
    fn build_state_parse_roundtrip() {
        for state in [
            BuildState::Empty,
            BuildState::Chunked,
            BuildState::Enriched,
            BuildState::Indexed,
        ] {
            assert_eq!(BuildState::parse(state.as_str()).unwrap(), state);
        }
        assert!(BuildState::parse("bogus").is_err());
    }
}
