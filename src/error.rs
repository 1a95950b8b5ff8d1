//! Error types for the askdoc core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the indexing, retrieval, and answering pipeline.
///
/// Structural errors (`InvalidArgument`, `EmptyInput`, `DimensionMismatch`,
/// `NotFound`, `Corrupt`) abort the operation that raised them. `Generation`
/// is recovered locally by [`ChatSession`](crate::session::ChatSession) into
/// a degraded answer and never ends a session.
#[derive(Debug, Error)]
pub enum RagError {
    /// A caller-supplied parameter was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An index build was attempted with zero chunks.
    ///
    /// A zero-chunk index cannot answer any search and is treated as
    /// invalid state rather than a valid empty index.
    #[error("cannot build an index from zero chunks")]
    EmptyInput,

    /// A query vector's dimensionality disagrees with the index.
    #[error("dimension mismatch: index holds {expected}-dim vectors, query has {actual}")]
    DimensionMismatch {
        /// Dimensionality of the stored vectors.
        expected: usize,
        /// Dimensionality of the query vector.
        actual: usize,
    },

    /// A persisted index artifact is missing.
    #[error("index artifact not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Persisted index artifacts exist but are inconsistent or truncated.
    #[error("index is corrupt: {0}")]
    Corrupt(String),

    /// The external embedding capability failed.
    #[error("embedding failed ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The external answer-generation capability failed or timed out.
    #[error("generation failed ({provider}): {message}")]
    Generation {
        /// The generation provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// Filesystem error while persisting or loading an index.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A convenience result type for askdoc operations.
pub type Result<T> = std::result::Result<T, RagError>;
