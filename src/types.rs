//! Core types for Engram sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current manifest schema version
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Prefix used for every content checksum string
pub const CHECKSUM_PREFIX: &str = "sha256:";

/// Object name of the batch manifest; reserved, never a data file name
pub const MANIFEST_NAME: &str = "manifest.json";

/// Identity of a transfer method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    /// Chunked upload to object storage
    Cloud,
    /// Single request to the direct ingestion endpoint
    Http,
}

impl MethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodKind::Cloud => "cloud",
            MethodKind::Http => "http",
        }
    }
}

impl std::fmt::Display for MethodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MethodKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cloud" => Ok(MethodKind::Cloud),
            "http" => Ok(MethodKind::Http),
            _ => Err(format!("Unknown sync method: {}", s)),
        }
    }
}

/// Method selection requested by the caller
///
/// `Auto` probes every method and walks the fallback chain. Any other value
/// bypasses probing and fallback entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ForceMethod {
    #[default]
    Auto,
    Cloud,
    Http,
}

impl ForceMethod {
    /// The forced method, if any
    pub fn method(&self) -> Option<MethodKind> {
        match self {
            ForceMethod::Auto => None,
            ForceMethod::Cloud => Some(MethodKind::Cloud),
            ForceMethod::Http => Some(MethodKind::Http),
        }
    }
}

impl std::fmt::Display for ForceMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForceMethod::Auto => write!(f, "auto"),
            ForceMethod::Cloud => write!(f, "cloud"),
            ForceMethod::Http => write!(f, "http"),
        }
    }
}

impl std::str::FromStr for ForceMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ForceMethod::Auto),
            "cloud" => Ok(ForceMethod::Cloud),
            "http" => Ok(ForceMethod::Http),
            _ => Err(format!("Unknown force method: {}", s)),
        }
    }
}

/// Serializable tag for each class of sync failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    InvalidInput,
    Availability,
    Upload,
    SizeExceeded,
    AllMethodsFailed,
    Storage,
    Internal,
}

/// Error summary carried by results and status records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of one sync invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// Method that produced this result
    pub method: MethodKind,
    pub success: bool,
    /// Logical names of files transferred in this run
    #[serde(default)]
    pub uploaded_files: Vec<String>,
    /// Logical names skipped because their checksum was unchanged
    #[serde(default)]
    pub skipped_files: Vec<String>,
    pub error: Option<ErrorInfo>,
    pub duration_ms: u64,
    /// Bytes sent over the wire (post-compression for cloud)
    #[serde(default)]
    pub bytes_transferred: u64,
    /// Manifest upload id, cloud only
    pub upload_id: Option<String>,
    /// Non-fatal problems of a successful run
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl SyncResult {
    /// Failed result for status reporting
    pub fn failure(method: MethodKind, error: ErrorInfo, duration_ms: u64) -> Self {
        Self {
            method,
            success: false,
            uploaded_files: Vec::new(),
            skipped_files: Vec::new(),
            error: Some(error),
            duration_ms,
            bytes_transferred: 0,
            upload_id: None,
            warnings: Vec::new(),
        }
    }
}

/// Descriptor committing one cloud upload batch
///
/// Written after every object of the batch, so its presence marks the batch
/// as complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadManifest {
    pub upload_id: String,
    pub system_id: String,
    pub created_at: DateTime<Utc>,
    pub schema_version: u32,
    pub files: Vec<ManifestFile>,
}

impl UploadManifest {
    pub fn new(system_id: impl Into<String>, files: Vec<ManifestFile>) -> Self {
        Self {
            upload_id: uuid::Uuid::new_v4().to_string(),
            system_id: system_id.into(),
            created_at: Utc::now(),
            schema_version: MANIFEST_SCHEMA_VERSION,
            files,
        }
    }
}

/// One file entry in an upload manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFile {
    pub logical_name: String,
    /// Original (uncompressed) size on disk
    pub size_bytes: u64,
    /// `sha256:<hex>` of the original content
    pub checksum: String,
    /// Number of parts of the stored stream
    pub chunk_count: u32,
    pub compressed: bool,
}

/// Per-part transfer state, never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// 1-based part number
    pub part_number: u32,
    /// Offset into the stored stream
    pub offset: u64,
    pub length: u64,
    /// Hex SHA-256 of the part bytes
    pub sha256: String,
}

/// Last successful upload of a logical file for a system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorRecord {
    pub system_id: String,
    pub logical_name: String,
    pub checksum: String,
    pub size_bytes: u64,
    pub chunk_count: u32,
    pub compressed: bool,
    pub uploaded_at: DateTime<Utc>,
}

impl PriorRecord {
    /// Manifest entry describing the stored object
    pub fn to_manifest_file(&self) -> ManifestFile {
        ManifestFile {
            logical_name: self.logical_name.clone(),
            size_bytes: self.size_bytes,
            checksum: self.checksum.clone(),
            chunk_count: self.chunk_count,
            compressed: self.compressed,
        }
    }
}

/// Background sync status for one system identifier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorInfo>,
    pub last_result: Option<SyncResult>,
    /// Runs started by triggers
    pub runs: u64,
    /// Triggers dropped because a run was already in flight
    pub coalesced: u64,
}
