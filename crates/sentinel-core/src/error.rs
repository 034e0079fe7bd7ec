use thiserror::Error;

/// Top-level error type for the Sentinel system.
///
/// The first four variants form the pipeline's failure taxonomy. Callers at
/// the ingestion and detection boundaries convert them into neutral results
/// (a failed `IngestResult`, an empty candidate set) instead of propagating.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SentinelError {
    /// Extraction produced no usable text.
    #[error("No usable text extracted: {0}")]
    ExtractionEmpty(String),

    /// The semantic model is unavailable; a hash fallback is in use.
    #[error("Embedding degraded: {0}")]
    EmbeddingDegraded(String),

    /// The similarity structure is not initialised or its lock is poisoned.
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    /// A bounded wait was exceeded.
    #[error("Query timed out after {elapsed_ms} ms")]
    QueryTimeout { elapsed_ms: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SentinelError {
    /// Short machine-readable kind, used in ingestion payloads and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SentinelError::ExtractionEmpty(_) => "extraction_empty",
            SentinelError::EmbeddingDegraded(_) => "embedding_degraded",
            SentinelError::IndexUnavailable(_) => "index_unavailable",
            SentinelError::QueryTimeout { .. } => "query_timeout",
            SentinelError::Config(_) => "config",
            SentinelError::Embedding(_) => "embedding",
            SentinelError::DimensionMismatch { .. } => "dimension_mismatch",
            SentinelError::Storage(_) => "storage",
            SentinelError::Io(_) => "io",
            SentinelError::Serialization(_) => "serialization",
        }
    }
}

impl From<toml::de::Error> for SentinelError {
    fn from(err: toml::de::Error) -> Self {
        SentinelError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SentinelError {
    fn from(err: toml::ser::Error) -> Self {
        SentinelError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SentinelError {
    fn from(err: serde_json::Error) -> Self {
        SentinelError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Sentinel operations.
pub type Result<T> = std::result::Result<T, SentinelError>;
