use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the indexing and retrieval pipeline
#[derive(Debug, Error)]
pub enum RagError {
    /// Bad chunking, dimension or search parameters supplied by the caller
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The embedding backend could not be reached or failed to answer
    #[error("embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// A collaborator call did not finish within its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// A vector length does not match the index dimension
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The stored index was built with a different embedding model
    #[error("model mismatch: index built with '{stored}', configured embedder is '{configured}'")]
    ModelMismatch { stored: String, configured: String },

    #[error("not found: {0}")]
    NotFound(String),

    /// The document produced no text to index
    #[error("document '{0}' has no indexable text")]
    EmptyDocument(String),

    #[error("document acquisition failed: {0}")]
    Acquisition(String),

    #[error("answer generation failed: {0}")]
    Generation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    /// Whether the caller may retry the operation with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingUnavailable(_) | RagError::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
