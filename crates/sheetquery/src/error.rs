// Error types for engine operations

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Invalid dataset id: {0}")]
    InvalidDatasetId(String),

    #[error("Dataset not found: {0}")]
    NotFound(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        EngineError::Validation(message.into())
    }

    pub fn backend_unavailable<S: Into<String>>(message: S) -> Self {
        EngineError::BackendUnavailable(message.into())
    }

    /// True for errors caused by the caller's input rather than the backend
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_) | EngineError::InvalidDatasetId(_) | EngineError::NotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures inside a cache tier. These never reach the read path.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Cache value serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache tier unavailable: {0}")]
    Unavailable(String),
}
