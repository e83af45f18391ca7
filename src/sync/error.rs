use thiserror::Error;

use crate::db::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Could not reach the remote at all (DNS, connect, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote answered 5xx. Its problem, worth retrying.
    #[error("server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// The remote answered 4xx. Our problem, retrying will not help.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Local store contention.
    #[error("local store busy: {0}")]
    Busy(String),

    /// The remote answered something this version cannot make sense of.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("replica not initialized")]
    NotInitialized,

    /// Terminal wrapper added by the retry policy: the operation label and
    /// how many attempts were spent before giving up.
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Failed {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Transient failures may clear on their own and are worth retrying.
    /// Everything else fails the operation on the spot.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Transport(_) | SyncError::ServerError { .. } | SyncError::Busy(_) => true,
            SyncError::Store(StoreError::Database(err)) => {
                let message = err.to_string();
                message.contains("locked") || message.contains("busy")
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Store(StoreError::Database(err))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
