//! Error types for snapshot synchronization
//!
//! Categories follow how a run reacts to them:
//! - configuration errors abort before any network call
//! - transient transport errors are retried by the client, then propagate
//! - stalled pagination and page ceilings are fatal for the run
//! - data-shape anomalies never reach this type (they are logged and skipped)

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Errors from a synchronization run
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Timeout, connection reset, TLS failure and friends
    #[error("Transport error: {message}")]
    Transport { message: String, transient: bool },

    /// Non-success HTTP status. `message` carries the response body so
    /// vendor soft-errors remain inspectable.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("No ledger migration answered a snapshot-timestamp probe")]
    NoEpochFound,

    #[error("Migration {0} returned no snapshot record time")]
    NoSnapshotTime(u64),

    #[error("Pagination stalled at cursor {cursor} after {pages} pages")]
    StalledPagination { cursor: String, pages: u64 },

    #[error("Page ceiling of {0} pages exceeded")]
    PageLimitExceeded(u64),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Snapshot run {0} is already in progress")]
    AlreadyInProgress(String),

    #[error("Scheduled task failed: {0}")]
    Task(String),
}

impl SyncError {
    /// Whether the page-level retry budget may be spent on this error.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Transport { transient, .. } => *transient,
            SyncError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        let transient = e.is_timeout() || e.is_connect() || e.is_request();
        SyncError::Transport {
            message: e.to_string(),
            transient,
        }
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Task(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let server = SyncError::Http { status: 503, message: "unavailable".into() };
        let throttled = SyncError::Http { status: 429, message: "slow down".into() };
        let client = SyncError::Http { status: 400, message: "bad request".into() };
        let timeout = SyncError::Transport { message: "timed out".into(), transient: true };

        assert!(server.is_transient());
        assert!(throttled.is_transient());
        assert!(!client.is_transient());
        assert!(timeout.is_transient());
        assert!(!SyncError::NoEpochFound.is_transient());
    }

    #[test]
    fn test_http_error_message_keeps_body() {
        let err = SyncError::Http { status: 400, message: "range (500 to 1000)".into() };
        assert!(err.to_string().contains("range (500 to 1000)"));
    }
}
