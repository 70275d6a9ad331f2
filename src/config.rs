//! Sync configuration
//!
//! [`SyncSettings`] is the raw, serde-friendly configuration surface.
//! [`SyncConfig`] is the validated, immutable value the engine runs on; it is
//! built once and shared behind an `Arc`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::types::ForceMethod;

/// Default chunk size (5 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Largest accepted chunk size, the S3 part size ceiling (5 GiB)
pub const MAX_CHUNK_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Default payload limit for the direct transfer (50 MiB)
pub const DEFAULT_MAX_PAYLOAD: u64 = 50 * 1024 * 1024;

/// Default direct ingestion endpoint (local Engram server)
pub const DEFAULT_HTTP_ENDPOINT: &str = "http://127.0.0.1:8080/v1/artifacts/upload";

/// Raw configuration surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// Object storage bucket; unset disables the cloud method
    pub cloud_bucket: Option<String>,
    /// Key prefix inside the bucket
    #[serde(default)]
    pub cloud_prefix: Option<String>,
    /// S3-compatible endpoint override (must be https)
    pub cloud_endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub cloud_region: String,
    /// Stable identifier of the uploading host
    #[serde(default)]
    pub system_id: String,
    #[serde(default = "default_http_endpoint")]
    pub http_endpoint: String,
    #[serde(default = "default_true")]
    pub enable_fallback: bool,
    #[serde(default = "default_true")]
    pub enable_compression: bool,
    #[serde(default = "default_true")]
    pub enable_deduplication: bool,
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_availability_timeout")]
    pub availability_timeout_ms: u64,
    #[serde(default = "default_max_payload")]
    pub max_payload_bytes: u64,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_ms: u64,
    /// gzip level, 0-9
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
    #[serde(default)]
    pub force_method: String,
    /// SQLite database holding prior upload checksums
    #[serde(default = "default_state_path")]
    pub state_path: String,
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_http_endpoint() -> String {
    DEFAULT_HTTP_ENDPOINT.to_string()
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    2000
}

fn default_availability_timeout() -> u64 {
    1000
}

fn default_max_payload() -> u64 {
    DEFAULT_MAX_PAYLOAD
}

fn default_http_timeout() -> u64 {
    30_000
}

fn default_compression_level() -> u32 {
    6
}

fn default_state_path() -> String {
    "~/.local/share/engram/sync-state.db".to_string()
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            cloud_bucket: None,
            cloud_prefix: None,
            cloud_endpoint: None,
            cloud_region: default_region(),
            system_id: String::new(),
            http_endpoint: default_http_endpoint(),
            enable_fallback: true,
            enable_compression: true,
            enable_deduplication: true,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            availability_timeout_ms: default_availability_timeout(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD,
            http_timeout_ms: default_http_timeout(),
            compression_level: default_compression_level(),
            force_method: String::new(),
            state_path: default_state_path(),
        }
    }
}

impl SyncSettings {
    /// Settings for a system with everything else defaulted
    pub fn for_system(system_id: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
            ..Default::default()
        }
    }

    /// Load settings from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let settings = serde_json::from_str(&content)?;
        Ok(settings)
    }
}

/// Object storage location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudDestination {
    pub bucket: String,
    /// Key prefix without leading or trailing slashes, may be empty
    pub prefix: String,
    pub region: String,
}

/// Validated, immutable sync configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    cloud_destination: Option<CloudDestination>,
    cloud_endpoint: Option<String>,
    http_endpoint: String,
    system_id: String,
    enable_fallback: bool,
    enable_compression: bool,
    enable_deduplication: bool,
    chunk_size_bytes: u64,
    max_retries: u32,
    retry_base_delay: Duration,
    availability_timeout: Duration,
    max_payload_bytes: u64,
    http_timeout: Duration,
    compression_level: u32,
    force_method: ForceMethod,
    state_path: String,
}

impl SyncConfig {
    /// Validate settings into a configuration
    pub fn from_settings(settings: SyncSettings) -> Result<Self> {
        let system_id = settings.system_id.trim().to_string();
        validate_system_id(&system_id)?;

        let cloud_endpoint = match settings.cloud_endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => {
                let url = reqwest::Url::parse(endpoint).map_err(|e| {
                    SyncError::Config(format!("Invalid cloud endpoint {}: {}", endpoint, e))
                })?;
                if url.scheme() != "https" {
                    return Err(SyncError::Config(format!(
                        "Cloud endpoint must use https, got {}",
                        url.scheme()
                    )));
                }
                Some(endpoint.to_string())
            }
            _ => None,
        };

        let http_endpoint = settings.http_endpoint.trim().to_string();
        let url = reqwest::Url::parse(&http_endpoint).map_err(|e| {
            SyncError::Config(format!("Invalid HTTP endpoint {}: {}", http_endpoint, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::Config(format!(
                "HTTP endpoint must use http or https, got {}",
                url.scheme()
            )));
        }

        if settings.chunk_size_bytes == 0 {
            return Err(SyncError::Config(
                "chunkSizeBytes must be greater than 0".to_string(),
            ));
        }
        if settings.chunk_size_bytes > MAX_CHUNK_SIZE {
            return Err(SyncError::Config(format!(
                "chunkSizeBytes {} exceeds the maximum part size of {} bytes",
                settings.chunk_size_bytes, MAX_CHUNK_SIZE
            )));
        }
        if usize::try_from(settings.chunk_size_bytes).is_err() {
            return Err(SyncError::Config(format!(
                "chunkSizeBytes {} does not fit in memory on this platform",
                settings.chunk_size_bytes
            )));
        }
        if settings.availability_timeout_ms == 0 {
            return Err(SyncError::Config(
                "availabilityTimeoutMs must be greater than 0".to_string(),
            ));
        }
        if settings.max_payload_bytes == 0 {
            return Err(SyncError::Config(
                "maxPayloadBytes must be greater than 0".to_string(),
            ));
        }
        if settings.compression_level > 9 {
            return Err(SyncError::Config(format!(
                "compressionLevel must be between 0 and 9, got {}",
                settings.compression_level
            )));
        }

        let force_method = match settings.force_method.trim() {
            "" => ForceMethod::Auto,
            other => other.parse::<ForceMethod>().map_err(SyncError::Config)?,
        };

        let cloud_destination = settings
            .cloud_bucket
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(|bucket| CloudDestination {
                bucket: bucket.to_string(),
                prefix: settings
                    .cloud_prefix
                    .as_deref()
                    .unwrap_or("")
                    .trim_matches('/')
                    .to_string(),
                region: settings.cloud_region.clone(),
            });

        let state_path = if settings.state_path == ":memory:" {
            settings.state_path
        } else {
            shellexpand::tilde(&settings.state_path).to_string()
        };

        Ok(Self {
            cloud_destination,
            cloud_endpoint,
            http_endpoint,
            system_id,
            enable_fallback: settings.enable_fallback,
            enable_compression: settings.enable_compression,
            enable_deduplication: settings.enable_deduplication,
            chunk_size_bytes: settings.chunk_size_bytes,
            max_retries: settings.max_retries,
            retry_base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            availability_timeout: Duration::from_millis(settings.availability_timeout_ms),
            max_payload_bytes: settings.max_payload_bytes,
            http_timeout: Duration::from_millis(settings.http_timeout_ms),
            compression_level: settings.compression_level,
            force_method,
            state_path,
        })
    }

    pub fn cloud_destination(&self) -> Option<&CloudDestination> {
        self.cloud_destination.as_ref()
    }

    pub fn cloud_endpoint(&self) -> Option<&str> {
        self.cloud_endpoint.as_deref()
    }

    pub fn http_endpoint(&self) -> &str {
        &self.http_endpoint
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    pub fn enable_fallback(&self) -> bool {
        self.enable_fallback
    }

    pub fn enable_compression(&self) -> bool {
        self.enable_compression
    }

    pub fn enable_deduplication(&self) -> bool {
        self.enable_deduplication
    }

    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size_bytes
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_base_delay(&self) -> Duration {
        self.retry_base_delay
    }

    pub fn availability_timeout(&self) -> Duration {
        self.availability_timeout
    }

    pub fn max_payload_bytes(&self) -> u64 {
        self.max_payload_bytes
    }

    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    pub fn compression_level(&self) -> u32 {
        self.compression_level
    }

    pub fn force_method(&self) -> ForceMethod {
        self.force_method
    }

    pub fn state_path(&self) -> &str {
        &self.state_path
    }
}

fn validate_system_id(system_id: &str) -> Result<()> {
    if system_id.is_empty() {
        return Err(SyncError::Config("systemId is required".to_string()));
    }
    if system_id.contains('/') || system_id.contains('\\') || system_id.contains("..") {
        return Err(SyncError::Config(format!(
            "systemId must not contain path separators: {}",
            system_id
        )));
    }
    if system_id.chars().any(|c| c.is_control()) {
        return Err(SyncError::Config(
            "systemId must not contain control characters".to_string(),
        ));
    }
    Ok(())
}
