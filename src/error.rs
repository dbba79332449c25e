use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the Quarry engine
#[derive(Error, Debug)]
pub enum QuarryError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Corpus version not found on disk
    #[error("Corpus version not found: {version}")]
    CorpusNotFound { version: String },

    /// No corpus has been built yet
    #[error("No current corpus version (run a build first)")]
    NoCurrentCorpus,

    /// Another build holds the corpus write lock
    #[error("A build is already in progress (PID: {pid})")]
    BuildInProgress { pid: u32 },

    /// Builder asked to run a stage out of order
    #[error("Invalid build state: expected {expected}, found {found}")]
    InvalidBuildState { expected: String, found: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Corpus store errors
    #[error("Corpus store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Embedding errors surfaced by the build pipeline
    #[error(transparent)]
    Embedding(#[from] crate::embedding::EmbedError),

    /// Retrieval errors surfaced through the CLI
    #[error(transparent)]
    Retrieve(#[from] crate::retrieval::RetrieveError),

    /// Build-time violation of the dense/sparse 1:1 correspondence
    #[error("Index chunk-id sets diverge for corpus version {version}")]
    IndexInconsistent { version: String },

    /// Sparse index errors surfaced by the build pipeline
    #[error("Sparse index error: {0}")]
    SparseIndex(String),

    /// Dense index errors surfaced by the build pipeline
    #[error("Dense index error: {0}")]
    DenseIndex(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for Quarry operations
pub type Result<T> = std::result::Result<T, QuarryError>;
