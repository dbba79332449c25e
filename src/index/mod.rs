//! Dense (vector) and sparse (keyword) index adapters
//!
//! Both indexes are built over the same chunk-id set per corpus version; the
//! retriever verifies that correspondence before scoring.

mod dense;
mod sparse;

pub use dense::{DenseHit, DenseIndex, DenseIndexError};
pub use sparse::{SparseHit, SparseIndex, SparseIndexError};
