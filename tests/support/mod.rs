//! Shared test helpers: in-memory object store, scripted sync methods and
//! fixture files.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use engram_sync::error::{Result, SyncError};
use engram_sync::sync::{CompletedPart, ObjectStore, SyncMethod};
use engram_sync::types::{ChunkDescriptor, MethodKind, SyncResult};
use engram_sync::{SyncConfig, SyncSettings};

/// Validated config, panicking on invalid settings
pub fn config(settings: SyncSettings) -> Arc<SyncConfig> {
    Arc::new(SyncConfig::from_settings(settings).expect("valid settings"))
}

/// Settings with a bucket and fast retries
pub fn cloud_settings(system_id: &str) -> SyncSettings {
    SyncSettings {
        cloud_bucket: Some("engram-backups".to_string()),
        retry_base_delay_ms: 20,
        ..SyncSettings::for_system(system_id)
    }
}

/// Deterministic, poorly compressible bytes
pub fn noise(len: usize) -> Vec<u8> {
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).expect("write fixture");
    path
}

// ============================================================================
// IN-MEMORY OBJECT STORE
// ============================================================================

struct Multipart {
    key: String,
    parts: BTreeMap<u32, Vec<u8>>,
}

/// Part failure injection
#[derive(Debug, Clone, Copy)]
pub struct PartFault {
    pub part_number: u32,
    /// Failing attempts before the part is accepted; `u32::MAX` never accepts
    pub failures: u32,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    uploads: Mutex<HashMap<String, Multipart>>,
    /// Keys in the order their objects became visible
    commits: Mutex<Vec<String>>,
    part_attempts: Mutex<HashMap<u32, Vec<Instant>>>,
    part_calls: AtomicUsize,
    next_upload: AtomicU32,
    fault: Mutex<Option<PartFault>>,
    fail_manifest: Mutex<bool>,
    unavailable: Mutex<bool>,
}

impl MemoryObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_part(&self, part_number: u32, failures: u32) {
        *self.fault.lock() = Some(PartFault {
            part_number,
            failures,
        });
    }

    pub fn fail_manifest(&self) {
        *self.fail_manifest.lock() = true;
    }

    pub fn set_unavailable(&self) {
        *self.unavailable.lock() = true;
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(key).cloned()
    }

    pub fn commits(&self) -> Vec<String> {
        self.commits.lock().clone()
    }

    pub fn part_calls(&self) -> usize {
        self.part_calls.load(Ordering::SeqCst)
    }

    /// Instants of every attempt at the given part number
    pub fn attempts_for(&self, part_number: u32) -> Vec<Instant> {
        self.part_attempts
            .lock()
            .get(&part_number)
            .cloned()
            .unwrap_or_default()
    }

    fn commit(&self, key: &str, data: Vec<u8>) {
        self.objects.lock().insert(key.to_string(), data);
        self.commits.lock().push(key.to_string());
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn probe(&self, _timeout: Duration) -> Result<()> {
        if *self.unavailable.lock() {
            return Err(SyncError::CloudStorage("bucket unreachable".to_string()));
        }
        Ok(())
    }

    async fn put_object(&self, key: &str, data: Vec<u8>) -> Result<()> {
        if key.ends_with("manifest.json") && *self.fail_manifest.lock() {
            return Err(SyncError::Transfer {
                message: "access denied".to_string(),
                retryable: false,
            });
        }
        self.commit(key, data);
        Ok(())
    }

    async fn create_multipart(&self, key: &str) -> Result<String> {
        let upload_id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst));
        self.uploads.lock().insert(
            upload_id.clone(),
            Multipart {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        descriptor: &ChunkDescriptor,
        data: &[u8],
    ) -> Result<CompletedPart> {
        self.part_calls.fetch_add(1, Ordering::SeqCst);
        let attempt = {
            let mut attempts = self.part_attempts.lock();
            let times = attempts.entry(descriptor.part_number).or_default();
            times.push(Instant::now());
            times.len() as u32
        };

        if let Some(fault) = *self.fault.lock() {
            if fault.part_number == descriptor.part_number && attempt <= fault.failures {
                return Err(SyncError::CloudStorage(format!(
                    "injected failure on part {} attempt {}",
                    descriptor.part_number, attempt
                )));
            }
        }

        assert_eq!(descriptor.length as usize, data.len());
        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get_mut(upload_id)
            .ok_or_else(|| SyncError::CloudStorage(format!("no such upload {}", upload_id)))?;
        upload.parts.insert(descriptor.part_number, data.to_vec());

        Ok(CompletedPart {
            part_number: descriptor.part_number,
            etag: format!("\"{}\"", descriptor.sha256),
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        let upload = self
            .uploads
            .lock()
            .remove(upload_id)
            .ok_or_else(|| SyncError::CloudStorage(format!("no such upload {}", upload_id)))?;
        assert_eq!(upload.key, key);
        assert_eq!(
            parts.iter().map(|p| p.part_number).collect::<Vec<_>>(),
            upload.parts.keys().copied().collect::<Vec<_>>()
        );

        let data = upload.parts.into_values().flatten().collect();
        self.commit(key, data);
        Ok(())
    }
}

// ============================================================================
// SCRIPTED SYNC METHOD
// ============================================================================

/// A sync method with canned probe and attempt behavior
pub struct ScriptedMethod {
    kind: MethodKind,
    available: bool,
    probe_delay: Duration,
    succeed: bool,
    gate: Option<Arc<Notify>>,
    panics: bool,
    attempts: AtomicU32,
    probes: AtomicU32,
}

impl ScriptedMethod {
    pub fn succeeding(kind: MethodKind) -> Arc<Self> {
        Arc::new(Self::build(kind, true, true))
    }

    pub fn failing(kind: MethodKind) -> Arc<Self> {
        Arc::new(Self::build(kind, true, false))
    }

    pub fn unavailable(kind: MethodKind) -> Arc<Self> {
        Arc::new(Self::build(kind, false, true))
    }

    /// Probe hangs for `delay` before reporting available
    pub fn slow_probe(kind: MethodKind, delay: Duration) -> Arc<Self> {
        let mut method = Self::build(kind, true, true);
        method.probe_delay = delay;
        Arc::new(method)
    }

    /// Attempts block until `gate` is notified
    pub fn gated(kind: MethodKind, gate: Arc<Notify>) -> Arc<Self> {
        let mut method = Self::build(kind, true, true);
        method.gate = Some(gate);
        Arc::new(method)
    }

    /// Attempts panic instead of returning
    pub fn panicking(kind: MethodKind) -> Arc<Self> {
        let mut method = Self::build(kind, true, true);
        method.panics = true;
        Arc::new(method)
    }

    fn build(kind: MethodKind, available: bool, succeed: bool) -> Self {
        Self {
            kind,
            available,
            probe_delay: Duration::ZERO,
            succeed,
            gate: None,
            panics: false,
            attempts: AtomicU32::new(0),
            probes: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncMethod for ScriptedMethod {
    fn kind(&self) -> MethodKind {
        self.kind
    }

    async fn probe(&self, _timeout: Duration) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if !self.probe_delay.is_zero() {
            tokio::time::sleep(self.probe_delay).await;
        }
        if self.available {
            Ok(())
        } else {
            Err(SyncError::Availability {
                method: self.kind,
                reason: "scripted outage".to_string(),
            })
        }
    }

    async fn attempt_sync(&self, files: &[PathBuf]) -> Result<SyncResult> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.panics {
            panic!("scripted panic in {} attempt", self.kind);
        }
        if !self.succeed {
            return Err(SyncError::Upload {
                file: "scripted".to_string(),
                part: None,
                message: "scripted failure".to_string(),
            });
        }

        let names = files
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(String::from))
            .collect();
        Ok(SyncResult {
            method: self.kind,
            success: true,
            uploaded_files: names,
            skipped_files: Vec::new(),
            error: None,
            duration_ms: 0,
            bytes_transferred: 0,
            upload_id: None,
            warnings: Vec::new(),
        })
    }
}
