//! Embedding generation
//!
//! Architecture:
//! - `EmbeddingProvider` trait for abstraction over embedding backends
//! - `FastEmbedProvider` for local, deterministic embedding generation
//! - `EmbeddingBatcher` for ordered, concurrency-bounded batch embedding
//!   with bisecting retry to isolate an unembeddable chunk

mod batch;
mod provider;

pub use batch::{EmbeddingBatcher, EmbeddingItem};
pub use provider::{EmbedError, EmbeddingProvider, FastEmbedProvider};
