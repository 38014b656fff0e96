use thiserror::Error;

/// Errors surfaced by indexing and retrieval.
///
/// Configuration errors are raised before any I/O and are never worth
/// retrying. `Transient` is the only retryable class; retry policy belongs to
/// the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Metadata field '{0}' is reserved by the index engine")]
    ReservedFieldConflict(String),

    #[error("Index '{0}' already exists")]
    IndexAlreadyExists(String),

    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Dense retrieval needs a query embedding or an embedder")]
    EmbeddingRequired,

    #[error("Unsupported retrieval mode: {0}")]
    UnsupportedMode(String),

    #[error("Embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Transient index engine failure: {0}")]
    Transient(String),

    #[error("Index engine error: {0:#}")]
    Engine(#[from] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation failed: {0}")]
    Operation(String),
}

impl Error {
    /// Whether the same call may succeed if repeated unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_) | Error::ReservedFieldConflict(_) | Error::IndexAlreadyExists(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
