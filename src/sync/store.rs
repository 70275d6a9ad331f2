//! Object storage abstraction used by the cloud transfer

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ChunkDescriptor;

/// A part accepted by the backend, needed to complete the upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// S3-style object storage
///
/// Transient backend failures should be reported as retryable errors
/// (`SyncError::CloudStorage`); the caller owns the retry loop.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lightweight reachability check; must finish within `timeout`
    async fn probe(&self, timeout: Duration) -> Result<()>;

    /// Store a small object in one request
    async fn put_object(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Start a multipart upload, returning its upload id
    async fn create_multipart(&self, key: &str) -> Result<String>;

    /// Upload one part of a multipart upload
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        descriptor: &ChunkDescriptor,
        data: &[u8],
    ) -> Result<CompletedPart>;

    /// Assemble the uploaded parts into the final object
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()>;
}
