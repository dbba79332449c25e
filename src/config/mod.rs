//! Configuration management
//!
//! TOML-backed configuration with one section per engine component,
//! validated as a whole before use.

use crate::error::{QuarryError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub enrich: EnrichConfig,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    pub retrieval: RetrievalConfig,
    pub build: BuildConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for corpus versions and the CURRENT pointer
    pub data_dir: PathBuf,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Minimum words per chunk (final chunk of a document excepted)
    pub min_words: usize,
    /// Maximum estimated tokens per chunk
    pub max_tokens: usize,
    /// Tokens to look back for a sentence end before a hard cut
    pub boundary_tolerance: usize,
}

/// Enrichment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    /// Words of concatenated chunk text fed to the document summary
    pub doc_input_words: usize,
    /// Words per section of the chunk-summary context window
    pub context_words: usize,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
    /// Concurrent embedding batches in flight
    pub max_concurrent_batches: usize,
}

/// Dense index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// HNSW construction parameter (higher = better recall, slower build)
    pub hnsw_ef_construction: usize,
    /// HNSW M parameter (number of connections per layer)
    pub hnsw_m: usize,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Candidate oversampling factor: each index is asked for oversample * k
    pub oversample: usize,
    /// HNSW search parameter (higher = better recall, slower search)
    pub ef_search: usize,
    /// Query deadline; on expiry partial results are discarded
    pub timeout_ms: u64,
    pub default_k: usize,
    pub default_alpha: f32,
}

/// Build pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Documents chunked/enriched concurrently
    pub doc_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.quarry"),
            },
            chunking: ChunkingConfig {
                min_words: 150,
                max_tokens: 512,
                boundary_tolerance: 64,
            },
            enrich: EnrichConfig {
                doc_input_words: 1000,
                context_words: 500,
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                batch_size: 32,
                max_concurrent_batches: 4,
            },
            indexing: IndexingConfig {
                hnsw_ef_construction: 200,
                hnsw_m: 16,
            },
            retrieval: RetrievalConfig {
                oversample: 2,
                ef_search: 50,
                timeout_ms: 30_000,
                default_k: 5,
                default_alpha: 0.7,
            },
            build: BuildConfig { doc_workers: 4 },
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(QuarryError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to read config file: {}", path.display()),
        })?;

        let config: Config = toml::from_str(&content)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QuarryError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to write config file: {}", path.display()),
        })
    }

    /// Default config path: `~/.config/quarry/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| QuarryError::Config("Cannot determine config directory".to_string()))?;
        Ok(config_dir.join("quarry").join("config.toml"))
    }

    /// Data directory with `~` expanded
    pub fn data_dir(&self) -> Result<PathBuf> {
        expand_path(&self.storage.data_dir)
    }
}

/// Expand a leading `~/` against the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| QuarryError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| QuarryError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
