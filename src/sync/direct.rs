//! Direct transfer: one bounded multipart POST to the ingestion endpoint
//!
//! The simple path. No chunking, no deduplication, no manifest object; the
//! request carries a small JSON manifest field next to the file parts so the
//! receiver can verify what it got.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::json;

use super::checksum::bytes_checksum;
use super::retry::{with_retry, RetryPolicy};
use super::{collect_files, SyncMethod};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::types::{MethodKind, SyncResult};

/// Header carrying the system identifier
pub const SYSTEM_ID_HEADER: &str = "X-Engram-System-Id";

/// HTTP ingestion transfer method
pub struct DirectTransfer {
    config: Arc<SyncConfig>,
    client: Client,
    retry: RetryPolicy,
}

/// File contents held for the duration of one request
struct Payload {
    logical_name: String,
    checksum: String,
    data: Vec<u8>,
}

impl DirectTransfer {
    pub fn new(config: Arc<SyncConfig>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout())
            .build()?;
        let retry = RetryPolicy::from_config(&config);
        Ok(Self {
            config,
            client,
            retry,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.config.http_endpoint()
    }

    fn build_form(&self, payloads: &[Payload]) -> Result<Form> {
        let manifest = json!({
            "systemId": self.config.system_id(),
            "files": payloads
                .iter()
                .map(|p| json!({
                    "logicalName": p.logical_name,
                    "sizeBytes": p.data.len(),
                    "checksum": p.checksum,
                }))
                .collect::<Vec<_>>(),
        });

        let mut form = Form::new()
            .text("system_id", self.config.system_id().to_string())
            .text("manifest", manifest.to_string());

        for payload in payloads {
            let part = Part::bytes(payload.data.clone())
                .file_name(payload.logical_name.clone())
                .mime_str("application/octet-stream")?;
            form = form.part("file", part);
        }
        Ok(form)
    }

    /// One POST; classifies the outcome for the retry loop
    async fn send_once(&self, payloads: &[Payload]) -> Result<()> {
        let form = self.build_form(payloads)?;
        let response = self
            .client
            .post(self.endpoint())
            .header(SYSTEM_ID_HEADER, self.config.system_id())
            .multipart(form)
            .send()
            .await
            .map_err(|e| SyncError::Transfer {
                retryable: e.is_timeout() || e.is_connect() || e.is_request(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(SyncError::Transfer {
            message: format!("ingestion endpoint returned {}: {}", status, body.trim()),
            retryable: status.is_server_error(),
        })
    }
}

#[async_trait]
impl SyncMethod for DirectTransfer {
    fn kind(&self) -> MethodKind {
        MethodKind::Http
    }

    /// Any HTTP response to a HEAD counts as reachable
    async fn probe(&self, timeout: Duration) -> Result<()> {
        let request = self.client.head(self.endpoint()).timeout(timeout).send();
        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(response)) => {
                tracing::debug!(status = %response.status(), "Ingestion endpoint reachable");
                Ok(())
            }
            Ok(Err(e)) => Err(SyncError::Availability {
                method: MethodKind::Http,
                reason: e.to_string(),
            }),
            Err(_) => Err(SyncError::Availability {
                method: MethodKind::Http,
                reason: format!("probe timed out after {:?}", timeout),
            }),
        }
    }

    async fn attempt_sync(&self, paths: &[PathBuf]) -> Result<SyncResult> {
        let started = Instant::now();
        let files = collect_files(paths)?;
        let limit = self.config.max_payload_bytes();

        // Fail fast before reading anything
        let mut total = 0u64;
        for file in &files {
            if file.size_bytes > limit {
                return Err(SyncError::SizeExceeded {
                    file: file.logical_name.clone(),
                    size: file.size_bytes,
                    limit,
                });
            }
            total = total.saturating_add(file.size_bytes);
        }
        if total > limit {
            return Err(SyncError::SizeExceeded {
                file: format!("batch of {} files", files.len()),
                size: total,
                limit,
            });
        }

        let mut payloads = Vec::with_capacity(files.len());
        for file in &files {
            let data = tokio::fs::read(&file.path).await?;
            payloads.push(Payload {
                logical_name: file.logical_name.clone(),
                checksum: bytes_checksum(&data),
                data,
            });
        }
        let bytes_transferred = payloads.iter().map(|p| p.data.len() as u64).sum();

        with_retry(&self.retry, "http_upload", |_| self.send_once(&payloads))
            .await
            .map_err(|e| SyncError::Upload {
                file: files
                    .iter()
                    .map(|f| f.logical_name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                part: None,
                message: e.to_string(),
            })?;

        tracing::info!(
            system_id = self.config.system_id(),
            endpoint = self.endpoint(),
            files = files.len(),
            bytes = bytes_transferred,
            "Direct upload completed"
        );

        Ok(SyncResult {
            method: MethodKind::Http,
            success: true,
            uploaded_files: files.into_iter().map(|f| f.logical_name).collect(),
            skipped_files: Vec::new(),
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
            bytes_transferred,
            upload_id: None,
            warnings: Vec::new(),
        })
    }
}
