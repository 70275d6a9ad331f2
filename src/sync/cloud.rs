//! Cloud transfer: chunked, compressed, deduplicated uploads to object storage
//!
//! Objects land under `{prefix}/systems/{system_id}/{logical_name}` and the
//! batch manifest under `{prefix}/systems/{system_id}/manifest.json`. The
//! manifest is always the last write of a batch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use super::checksum::file_checksum;
use super::chunker::{Chunk, ChunkReader};
use super::retry::{with_retry, RetryPolicy};
use super::store::ObjectStore;
use super::{collect_files, LocalFile, SyncMethod};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::state::PriorStateStore;
use crate::types::{
    ManifestFile, MethodKind, PriorRecord, SyncResult, UploadManifest, MANIFEST_NAME,
};

/// Object storage transfer method
pub struct CloudTransfer {
    config: Arc<SyncConfig>,
    store: Option<Arc<dyn ObjectStore>>,
    state: Arc<dyn PriorStateStore>,
    retry: RetryPolicy,
}

/// A file that went over the wire
struct UploadedFile {
    entry: ManifestFile,
    bytes: u64,
}

impl CloudTransfer {
    /// Create with an explicit store; `None` makes the method unavailable
    pub fn new(
        config: Arc<SyncConfig>,
        store: Option<Arc<dyn ObjectStore>>,
        state: Arc<dyn PriorStateStore>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            config,
            store,
            state,
            retry,
        }
    }

    /// Create with the default S3 backend for the configured destination
    pub fn from_config(config: Arc<SyncConfig>, state: Arc<dyn PriorStateStore>) -> Self {
        let store = Self::default_store(&config);
        Self::new(config, store, state)
    }

    #[cfg(feature = "cloud")]
    fn default_store(config: &SyncConfig) -> Option<Arc<dyn ObjectStore>> {
        let destination = config.cloud_destination()?;
        let store =
            super::s3::S3ObjectStore::new(destination, config.cloud_endpoint().map(String::from));
        store.check_part_size(config.chunk_size_bytes());
        Some(Arc::new(store))
    }

    #[cfg(not(feature = "cloud"))]
    fn default_store(config: &SyncConfig) -> Option<Arc<dyn ObjectStore>> {
        if config.cloud_destination().is_some() {
            tracing::warn!("Cloud bucket configured but the `cloud` feature is disabled");
        }
        None
    }

    /// Destination key for a logical file
    pub fn object_key(&self, logical_name: &str) -> String {
        format!("{}/{}", self.system_root(), logical_name)
    }

    /// Destination key of the batch manifest
    pub fn manifest_key(&self) -> String {
        self.object_key(MANIFEST_NAME)
    }

    fn system_root(&self) -> String {
        let prefix = self
            .config
            .cloud_destination()
            .map(|d| d.prefix.as_str())
            .unwrap_or("");
        if prefix.is_empty() {
            format!("systems/{}", self.config.system_id())
        } else {
            format!("{}/systems/{}", prefix, self.config.system_id())
        }
    }

    fn store(&self) -> Result<&Arc<dyn ObjectStore>> {
        self.store.as_ref().ok_or_else(|| SyncError::Availability {
            method: MethodKind::Cloud,
            reason: "no cloud bucket configured".to_string(),
        })
    }

    /// Stream one file to the store as a multipart upload
    async fn upload_file(
        &self,
        store: &Arc<dyn ObjectStore>,
        file: &LocalFile,
        checksum: &str,
    ) -> Result<UploadedFile> {
        let key = self.object_key(&file.logical_name);
        let compressed = self.config.enable_compression();
        let compression = compressed.then(|| self.config.compression_level());
        let chunk_size = self.config.chunk_size_bytes() as usize;
        let upload_error = |part: Option<u32>, err: SyncError| SyncError::Upload {
            file: file.logical_name.clone(),
            part,
            message: err.to_string(),
        };

        let path = file.path.clone();
        let reader =
            tokio::task::spawn_blocking(move || ChunkReader::open(&path, chunk_size, compression))
                .await
                .map_err(|e| SyncError::Internal(format!("chunk reader task failed: {}", e)))?
                .map_err(|e| upload_error(None, e.into()))?;

        let (mut reader, first) = read_chunk(reader)
            .await
            .map_err(|e| upload_error(None, e))?;

        let Some(first) = first else {
            // Only an uncompressed empty file yields no parts
            with_retry(&self.retry, "put_object", |_| {
                store.put_object(&key, Vec::new())
            })
            .await
            .map_err(|e| upload_error(None, e))?;

            return Ok(UploadedFile {
                entry: ManifestFile {
                    logical_name: file.logical_name.clone(),
                    size_bytes: file.size_bytes,
                    checksum: checksum.to_string(),
                    chunk_count: 0,
                    compressed,
                },
                bytes: 0,
            });
        };

        let upload_id = with_retry(&self.retry, "create_multipart", |_| {
            store.create_multipart(&key)
        })
        .await
        .map_err(|e| upload_error(None, e))?;

        let mut parts = Vec::new();
        let mut bytes = 0u64;
        let mut pending = Some(first);

        while let Some(chunk) = pending.take() {
            let part_number = chunk.descriptor.part_number;
            tracing::debug!(
                file = %file.logical_name,
                part = part_number,
                offset = chunk.descriptor.offset,
                length = chunk.descriptor.length,
                sha256 = %chunk.descriptor.sha256,
                "Uploading part"
            );

            let completed = with_retry(&self.retry, "upload_part", |_| {
                store.upload_part(&key, &upload_id, &chunk.descriptor, &chunk.data)
            })
            .await
            .map_err(|e| upload_error(Some(part_number), e))?;

            bytes += chunk.descriptor.length;
            parts.push(completed);
            drop(chunk);

            let (next_reader, next) = read_chunk(reader)
                .await
                .map_err(|e| upload_error(Some(part_number + 1), e))?;
            reader = next_reader;
            pending = next;
        }

        let chunk_count = parts.len() as u32;
        with_retry(&self.retry, "complete_multipart", |_| {
            store.complete_multipart(&key, &upload_id, parts.clone())
        })
        .await
        .map_err(|e| upload_error(None, e))?;

        tracing::info!(
            file = %file.logical_name,
            size_bytes = file.size_bytes,
            stored_bytes = bytes,
            chunk_count,
            compressed,
            "Uploaded file to object storage"
        );

        Ok(UploadedFile {
            entry: ManifestFile {
                logical_name: file.logical_name.clone(),
                size_bytes: file.size_bytes,
                checksum: checksum.to_string(),
                chunk_count,
                compressed,
            },
            bytes,
        })
    }
}

/// Read the next chunk without blocking the reactor
async fn read_chunk(mut reader: ChunkReader) -> Result<(ChunkReader, Option<Chunk>)> {
    tokio::task::spawn_blocking(move || -> Result<(ChunkReader, Option<Chunk>)> {
        let chunk = reader.next_chunk()?;
        Ok((reader, chunk))
    })
    .await
    .map_err(|e| SyncError::Internal(format!("chunk reader task failed: {}", e)))?
}

#[async_trait]
impl SyncMethod for CloudTransfer {
    fn kind(&self) -> MethodKind {
        MethodKind::Cloud
    }

    async fn probe(&self, timeout: Duration) -> Result<()> {
        let store = self.store()?;
        match tokio::time::timeout(timeout, store.probe(timeout)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e @ SyncError::Availability { .. })) => Err(e),
            Ok(Err(e)) => Err(SyncError::Availability {
                method: MethodKind::Cloud,
                reason: e.to_string(),
            }),
            Err(_) => Err(SyncError::Availability {
                method: MethodKind::Cloud,
                reason: format!("probe timed out after {:?}", timeout),
            }),
        }
    }

    async fn attempt_sync(&self, paths: &[PathBuf]) -> Result<SyncResult> {
        let started = Instant::now();
        let store = self.store()?;
        let files = collect_files(paths)?;
        let system_id = self.config.system_id();
        let compressed = self.config.enable_compression();

        let mut entries = Vec::with_capacity(files.len());
        let mut records = Vec::new();
        let mut uploaded_files = Vec::new();
        let mut skipped_files = Vec::new();
        let mut bytes_transferred = 0u64;

        for file in &files {
            let checksum =
                file_checksum(&file.path)
                    .await
                    .map_err(|e| SyncError::Upload {
                        file: file.logical_name.clone(),
                        part: None,
                        message: e.to_string(),
                    })?;

            if self.config.enable_deduplication() {
                if let Some(prior) = self.state.get(system_id, &file.logical_name)? {
                    if prior.checksum == checksum && prior.compressed == compressed {
                        tracing::info!(
                            system_id,
                            file = %file.logical_name,
                            "Unchanged since last upload, skipping"
                        );
                        entries.push(prior.to_manifest_file());
                        skipped_files.push(file.logical_name.clone());
                        continue;
                    }
                }
            }

            let uploaded = self.upload_file(store, file, &checksum).await?;
            bytes_transferred += uploaded.bytes;
            records.push(PriorRecord {
                system_id: system_id.to_string(),
                logical_name: uploaded.entry.logical_name.clone(),
                checksum: uploaded.entry.checksum.clone(),
                size_bytes: uploaded.entry.size_bytes,
                chunk_count: uploaded.entry.chunk_count,
                compressed: uploaded.entry.compressed,
                uploaded_at: Utc::now(),
            });
            uploaded_files.push(file.logical_name.clone());
            entries.push(uploaded.entry);
        }

        let manifest = UploadManifest::new(system_id, entries);
        let body = serde_json::to_vec_pretty(&manifest)?;
        let manifest_key = self.manifest_key();
        with_retry(&self.retry, "put_manifest", |_| {
            store.put_object(&manifest_key, body.clone())
        })
        .await
        .map_err(|e| SyncError::Upload {
            file: MANIFEST_NAME.to_string(),
            part: None,
            message: e.to_string(),
        })?;

        // The batch is committed; a failed state write only costs a re-upload
        let mut warnings = Vec::new();
        if let Err(e) = self.state.put_all(&records) {
            tracing::error!(system_id, error = %e, "Failed to record uploaded checksums");
            warnings.push(format!(
                "Uploaded checksums were not recorded, the next run re-uploads: {}",
                e
            ));
        }

        tracing::info!(
            system_id,
            upload_id = %manifest.upload_id,
            uploaded = uploaded_files.len(),
            skipped = skipped_files.len(),
            bytes = bytes_transferred,
            "Cloud sync committed"
        );

        Ok(SyncResult {
            method: MethodKind::Cloud,
            success: true,
            uploaded_files,
            skipped_files,
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
            bytes_transferred,
            upload_id: Some(manifest.upload_id),
            warnings,
        })
    }
}
