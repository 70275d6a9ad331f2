//! Hybrid artifact sync
//!
//! Snapshots are pushed to object storage when it is configured and
//! reachable, falling back to the direct HTTP ingestion endpoint otherwise.
//!
//! # Feature Flags
//!
//! The S3 backend requires the `cloud` feature. Everything else, including
//! the cloud transfer itself against any [`ObjectStore`], is always available.

mod checksum;
mod chunker;
mod cloud;
mod direct;
mod orchestrator;
mod retry;
#[cfg(feature = "cloud")]
mod s3;
mod store;
mod worker;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Result, SyncError};
use crate::types::{MethodKind, SyncResult, MANIFEST_NAME};

pub use checksum::{bytes_checksum, file_checksum};
pub use chunker::{expected_chunk_count, Chunk, ChunkReader};
pub use cloud::CloudTransfer;
pub use direct::DirectTransfer;
pub use orchestrator::{OrchestratorState, SyncOrchestrator};
pub use retry::{with_retry, RetryPolicy};
#[cfg(feature = "cloud")]
pub use s3::S3ObjectStore;
pub use store::{CompletedPart, ObjectStore};
pub use worker::{SyncWorker, TriggerOutcome};

/// A transfer strategy the orchestrator can try
#[async_trait]
pub trait SyncMethod: Send + Sync {
    fn kind(&self) -> MethodKind;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Bounded availability check; must return within `timeout`
    async fn probe(&self, timeout: Duration) -> Result<()>;

    async fn is_available(&self, timeout: Duration) -> bool {
        self.probe(timeout).await.is_ok()
    }

    /// Transfer the files, all or nothing
    async fn attempt_sync(&self, files: &[PathBuf]) -> Result<SyncResult>;
}

/// A validated input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    /// File name, used as the object name at the destination
    pub logical_name: String,
    pub size_bytes: u64,
}

impl LocalFile {
    fn from_path(path: &Path) -> Result<Self> {
        if !path.is_absolute() {
            return Err(SyncError::InvalidInput(format!(
                "Path must be absolute: {}",
                path.display()
            )));
        }

        let metadata = std::fs::metadata(path).map_err(|e| {
            SyncError::InvalidInput(format!("Cannot read {}: {}", path.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(SyncError::InvalidInput(format!(
                "Not a regular file: {}",
                path.display()
            )));
        }

        let logical_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                SyncError::InvalidInput(format!(
                    "File name is not valid UTF-8: {}",
                    path.display()
                ))
            })?
            .to_string();

        Ok(Self {
            path: path.to_path_buf(),
            logical_name,
            size_bytes: metadata.len(),
        })
    }
}

/// Validate a batch of input paths
pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<LocalFile>> {
    if paths.is_empty() {
        return Err(SyncError::InvalidInput("No files to sync".to_string()));
    }

    let mut seen = HashSet::new();
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let file = LocalFile::from_path(path)?;
        if file.logical_name == MANIFEST_NAME {
            return Err(SyncError::InvalidInput(format!(
                "{} is reserved for the batch manifest: {}",
                MANIFEST_NAME,
                path.display()
            )));
        }
        if !seen.insert(file.logical_name.clone()) {
            return Err(SyncError::InvalidInput(format!(
                "Duplicate logical name in batch: {}",
                file.logical_name
            )));
        }
        files.push(file);
    }
    Ok(files)
}

/// Completion event for logging/notifications
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub system_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub result: SyncResult,
}

impl SyncEvent {
    pub fn success(&self) -> bool {
        self.result.success
    }
}
