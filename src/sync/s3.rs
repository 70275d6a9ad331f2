//! S3-compatible object store (S3, R2, GCS interop, MinIO over TLS)

use std::time::Duration;

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client as S3Client;
use tokio::sync::OnceCell;

use super::store::{CompletedPart, ObjectStore};
use crate::config::CloudDestination;
use crate::error::{Result, SyncError};
use crate::types::{ChunkDescriptor, MethodKind};

/// Smallest part size S3 accepts for every part but the last
const S3_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Object store backed by the AWS SDK
///
/// The client is loaded lazily on first use so that building an engine never
/// touches the credential chain or the network.
pub struct S3ObjectStore {
    bucket: String,
    region: String,
    endpoint_override: Option<String>,
    client: OnceCell<S3Client>,
}

impl S3ObjectStore {
    pub fn new(destination: &CloudDestination, endpoint_override: Option<String>) -> Self {
        Self {
            bucket: destination.bucket.clone(),
            region: destination.region.clone(),
            endpoint_override,
            client: OnceCell::new(),
        }
    }

    /// Warn when the chunk size would be rejected by S3 on multi-part files
    pub fn check_part_size(&self, chunk_size: u64) {
        if chunk_size < S3_MIN_PART_SIZE {
            tracing::warn!(
                chunk_size,
                min = S3_MIN_PART_SIZE,
                "Chunk size is below the S3 minimum part size; multi-part uploads may be rejected"
            );
        }
    }

    async fn client(&self) -> &S3Client {
        self.client
            .get_or_init(|| async {
                // Retries are owned by the transfer's backoff policy
                let sdk_config = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(self.region.clone()))
                    .retry_config(RetryConfig::disabled())
                    .load()
                    .await;

                let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
                if let Some(ref endpoint) = self.endpoint_override {
                    builder = builder.endpoint_url(endpoint).force_path_style(true);
                }

                S3Client::from_conf(builder.build())
            })
            .await
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn probe(&self, timeout: Duration) -> Result<()> {
        let check = async {
            self.client()
                .await
                .head_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .map_err(|e| SyncError::Availability {
                    method: MethodKind::Cloud,
                    reason: format!("head bucket {} failed: {}", self.bucket, DisplayErrorContext(&e)),
                })
        };

        match tokio::time::timeout(timeout, check).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(SyncError::Availability {
                method: MethodKind::Cloud,
                reason: format!("head bucket {} timed out after {:?}", self.bucket, timeout),
            }),
        }
    }

    async fn put_object(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let size = data.len();
        self.client()
            .await
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                SyncError::CloudStorage(format!("put {} failed: {}", key, DisplayErrorContext(&e)))
            })?;

        tracing::debug!("Uploaded {} bytes to s3://{}/{}", size, self.bucket, key);
        Ok(())
    }

    async fn create_multipart(&self, key: &str) -> Result<String> {
        let response = self
            .client()
            .await
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                SyncError::CloudStorage(format!(
                    "create multipart upload for {} failed: {}",
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        response
            .upload_id()
            .map(String::from)
            .ok_or_else(|| SyncError::CloudStorage(format!("no upload id returned for {}", key)))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        descriptor: &ChunkDescriptor,
        data: &[u8],
    ) -> Result<CompletedPart> {
        let part_number = i32::try_from(descriptor.part_number).map_err(|_| SyncError::Upload {
            file: key.to_string(),
            part: Some(descriptor.part_number),
            message: "part number out of range".to_string(),
        })?;

        let response = self
            .client()
            .await
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| {
                SyncError::CloudStorage(format!(
                    "upload part {} of {} failed: {}",
                    descriptor.part_number,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        let etag = response.e_tag().map(String::from).ok_or_else(|| {
            SyncError::CloudStorage(format!(
                "no etag returned for part {} of {}",
                descriptor.part_number, key
            ))
        })?;

        Ok(CompletedPart {
            part_number: descriptor.part_number,
            etag,
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        let parts = parts
            .into_iter()
            .map(|p| {
                S3CompletedPart::builder()
                    .part_number(p.part_number as i32)
                    .e_tag(p.etag)
                    .build()
            })
            .collect();

        self.client()
            .await
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                SyncError::CloudStorage(format!(
                    "complete multipart upload for {} failed: {}",
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        tracing::debug!("Completed multipart upload s3://{}/{}", self.bucket, key);
        Ok(())
    }
}
