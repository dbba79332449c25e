//! Quarry - Hybrid Retrieval Knowledge-Base Engine
//!
//! Builds chunked, summary-enriched, dually-indexed corpora from raw document
//! text, then answers queries by fusing dense (vector) and sparse (keyword)
//! retrieval signals into a single ranked, deduplicated context.

pub mod builder;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod enrich;
pub mod error;
pub mod index;
pub mod retrieval;

pub use error::{QuarryError, Result};
