use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Write-time referential pre-check failed. Usually means the parent
    /// row exists upstream but has not replicated to this device yet.
    #[error("referenced {table} id '{id}' not found locally - pull updates first")]
    MissingReference { table: String, id: String },

    #[error("{table} row '{id}' not found")]
    RowNotFound { table: String, id: String },

    #[error("malformed {column} on {table} row '{id}': {reason}")]
    MalformedPayload {
        table: String,
        id: String,
        column: String,
        reason: String,
    },

    #[error("point '{id}' has {have} on hand, cannot remove {want}")]
    InsufficientStock { id: String, have: i64, want: i64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
