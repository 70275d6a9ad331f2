//! Error types for Engram sync

use thiserror::Error;

use crate::types::{ErrorInfo, ErrorKind, MethodKind};

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for Engram sync
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{method} sync unavailable: {reason}")]
    Availability { method: MethodKind, reason: String },

    #[error("Upload failed for {file}{}: {message}", part_suffix(.part))]
    Upload {
        file: String,
        part: Option<u32>,
        message: String,
    },

    #[error("Payload too large for {file}: {size} bytes exceeds limit of {limit} bytes")]
    SizeExceeded { file: String, size: u64, limit: u64 },

    #[error("All sync methods failed: {}", join_failures(.0))]
    AllMethodsFailed(Vec<MethodFailure>),

    /// A single transfer attempt failed; the retry loop decides what happens next
    #[error("Transfer error: {message}")]
    Transfer { message: String, retryable: bool },

    #[error("Cloud storage error: {0}")]
    CloudStorage(String),

    #[error("State database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A method's failure recorded by the orchestrator
#[derive(Debug)]
pub struct MethodFailure {
    pub method: MethodKind,
    pub error: SyncError,
}

impl std::fmt::Display for MethodFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.method, self.error)
    }
}

fn part_suffix(part: &Option<u32>) -> String {
    part.map(|p| format!(" (part {})", p)).unwrap_or_default()
}

fn join_failures(failures: &[MethodFailure]) -> String {
    if failures.is_empty() {
        return "no methods configured".to_string();
    }
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl SyncError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transfer { retryable, .. } => *retryable,
            SyncError::CloudStorage(_) => true,
            SyncError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().map(|s| s.is_server_error()).unwrap_or(false)
            }
            _ => false,
        }
    }

    /// Taxonomy tag for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Config(_) => ErrorKind::Configuration,
            SyncError::InvalidInput(_) => ErrorKind::InvalidInput,
            SyncError::Availability { .. } => ErrorKind::Availability,
            SyncError::Upload { .. }
            | SyncError::Transfer { .. }
            | SyncError::CloudStorage(_)
            | SyncError::Http(_) => ErrorKind::Upload,
            SyncError::SizeExceeded { .. } => ErrorKind::SizeExceeded,
            SyncError::AllMethodsFailed(_) => ErrorKind::AllMethodsFailed,
            SyncError::Database(_) | SyncError::Io(_) | SyncError::Serialization(_) => {
                ErrorKind::Storage
            }
            SyncError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Summary for results and status records
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind(),
            message: self.to_string(),
        }
    }

    /// Per-method failures of an aggregate error
    pub fn failures(&self) -> &[MethodFailure] {
        match self {
            SyncError::AllMethodsFailed(failures) => failures,
            _ => &[],
        }
    }

    /// Method whose failure ended the run, if known
    pub fn last_method(&self) -> Option<MethodKind> {
        match self {
            SyncError::AllMethodsFailed(failures) => failures.last().map(|f| f.method),
            SyncError::Availability { method, .. } => Some(*method),
            _ => None,
        }
    }
}
