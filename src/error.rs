//! Error types for the load stage

/// Error type for load operations
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Failed to connect to the warehouse
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query or statement execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Object storage operation failed
    #[error("Storage operation failed: {0}")]
    StorageFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid input data (malformed export, bad job directory, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A cell could not be coerced to the column's declared type
    #[error("Cannot coerce {table}.{column} at row {row}: {message}")]
    Coercion {
        table: String,
        column: String,
        row: usize,
        message: String,
    },

    /// The stored marker changed underneath this run
    #[error("Marker version conflict: expected version {expected}, found {found}")]
    MarkerConflict { expected: u64, found: u64 },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        LoadError::IoError(e.to_string())
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(e: serde_json::Error) -> Self {
        LoadError::SerializationError(e.to_string())
    }
}

/// Result type for load operations
pub type LoadResult<T> = Result<T, LoadError>;
