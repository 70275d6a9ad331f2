//! Cloud transfer against an in-memory object store
//!
//! Run with: cargo test --test cloud_transfer_tests

mod support;

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;

use engram_sync::error::SyncError;
use engram_sync::state::{MemoryStateStore, PriorStateStore};
use engram_sync::sync::{expected_chunk_count, file_checksum, CloudTransfer, ObjectStore, SyncMethod};
use engram_sync::types::{ErrorKind, MethodKind, PriorRecord, UploadManifest};
use engram_sync::SyncSettings;
use support::{cloud_settings, config, noise, write_file, MemoryObjectStore};

const CHUNK: u64 = 64 * 1024;
const MANIFEST_KEY: &str = "systems/laptop-01/manifest.json";

struct Harness {
    transfer: CloudTransfer,
    store: Arc<MemoryObjectStore>,
    state: Arc<MemoryStateStore>,
}

fn harness(settings: SyncSettings) -> Harness {
    let store = MemoryObjectStore::new();
    let state = Arc::new(MemoryStateStore::new());
    let transfer = CloudTransfer::new(
        config(settings),
        Some(store.clone() as Arc<dyn ObjectStore>),
        state.clone(),
    );
    Harness {
        transfer,
        store,
        state,
    }
}

fn raw_settings() -> SyncSettings {
    SyncSettings {
        chunk_size_bytes: CHUNK,
        enable_compression: false,
        ..cloud_settings("laptop-01")
    }
}

fn manifest(store: &MemoryObjectStore) -> UploadManifest {
    let body = store.object(MANIFEST_KEY).expect("manifest written");
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_second_run_of_unchanged_file_uploads_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "memories.db", &noise(200_000));
    let h = harness(raw_settings());

    let first = h.transfer.attempt_sync(&[file.clone()]).await.unwrap();
    assert_eq!(first.method, MethodKind::Cloud);
    assert_eq!(first.uploaded_files, vec!["memories.db"]);
    assert_eq!(h.store.part_calls(), 4);

    let second = h.transfer.attempt_sync(&[file]).await.unwrap();
    assert!(second.success);
    assert!(second.uploaded_files.is_empty());
    assert_eq!(second.skipped_files, vec!["memories.db"]);
    assert_eq!(second.bytes_transferred, 0);
    assert_eq!(h.store.part_calls(), 4, "no parts on the second run");

    // The skipped file is still described by the new manifest
    let m = manifest(&h.store);
    assert_eq!(Some(m.upload_id.clone()), second.upload_id);
    assert_ne!(first.upload_id, second.upload_id);
    assert_eq!(m.files.len(), 1);
    assert_eq!(m.files[0].chunk_count, 4);
}

#[tokio::test]
async fn test_changed_file_is_uploaded_again() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(raw_settings());

    let file = write_file(dir.path(), "memories.db", b"version one");
    h.transfer.attempt_sync(&[file.clone()]).await.unwrap();

    write_file(dir.path(), "memories.db", b"version two");
    let result = h.transfer.attempt_sync(&[file.clone()]).await.unwrap();
    assert_eq!(result.uploaded_files, vec!["memories.db"]);
    assert_eq!(
        h.store.object("systems/laptop-01/memories.db").unwrap(),
        b"version two"
    );

    let record = h.state.get("laptop-01", "memories.db").unwrap().unwrap();
    assert_eq!(record.checksum, file_checksum(&file).await.unwrap());
}

#[tokio::test]
async fn test_deduplication_disabled_always_uploads() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "memories.db", b"same bytes");
    let h = harness(SyncSettings {
        enable_deduplication: false,
        ..raw_settings()
    });

    h.transfer.attempt_sync(&[file.clone()]).await.unwrap();
    let second = h.transfer.attempt_sync(&[file]).await.unwrap();
    assert_eq!(second.uploaded_files, vec!["memories.db"]);
    assert!(second.skipped_files.is_empty());
    assert_eq!(h.store.part_calls(), 2);
}

#[tokio::test]
async fn test_uncompressed_chunk_count_is_ceiling_of_size() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(raw_settings());

    for (name, size) in [("tail.db", 3 * CHUNK + 1), ("exact.db", 2 * CHUNK), ("tiny.db", 10)] {
        let file = write_file(dir.path(), name, &noise(size as usize));
        h.transfer.attempt_sync(&[file]).await.unwrap();

        let m = manifest(&h.store);
        assert_eq!(m.files[0].size_bytes, size);
        assert_eq!(
            m.files[0].chunk_count as u64,
            expected_chunk_count(size, CHUNK),
            "{}",
            name
        );
    }
}

#[tokio::test]
async fn test_compressed_parts_cover_the_gzip_stream() {
    let dir = tempfile::tempdir().unwrap();
    let original = noise(300_000);
    let file = write_file(dir.path(), "memories.db", &original);
    let h = harness(SyncSettings {
        chunk_size_bytes: CHUNK,
        ..cloud_settings("laptop-01")
    });

    let result = h.transfer.attempt_sync(&[file]).await.unwrap();
    let stored = h.store.object("systems/laptop-01/memories.db").unwrap();

    let m = manifest(&h.store);
    let entry = &m.files[0];
    assert!(entry.compressed);
    assert_eq!(entry.size_bytes, original.len() as u64);
    assert_eq!(
        entry.chunk_count as u64,
        expected_chunk_count(stored.len() as u64, CHUNK)
    );
    assert_eq!(h.store.part_calls(), entry.chunk_count as usize);
    assert_eq!(result.bytes_transferred, stored.len() as u64);

    let mut restored = Vec::new();
    GzDecoder::new(&stored[..])
        .read_to_end(&mut restored)
        .unwrap();
    assert_eq!(restored, original);
}

#[tokio::test]
async fn test_compressible_file_needs_fewer_parts() {
    let dir = tempfile::tempdir().unwrap();
    let size = 1024 * 1024u64;
    let file = write_file(dir.path(), "zeros.db", &vec![0u8; size as usize]);
    let h = harness(SyncSettings {
        chunk_size_bytes: CHUNK,
        ..cloud_settings("laptop-01")
    });

    h.transfer.attempt_sync(&[file]).await.unwrap();
    let m = manifest(&h.store);
    assert_eq!(m.files[0].size_bytes, size);
    assert!((m.files[0].chunk_count as u64) < expected_chunk_count(size, CHUNK));
}

#[tokio::test]
async fn test_toggling_compression_forces_reupload() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "memories.db", b"unchanged content");
    let store = MemoryObjectStore::new();
    let state = Arc::new(MemoryStateStore::new());

    for compress in [false, true] {
        let transfer = CloudTransfer::new(
            config(SyncSettings {
                enable_compression: compress,
                ..raw_settings()
            }),
            Some(store.clone() as Arc<dyn ObjectStore>),
            state.clone(),
        );
        let result = transfer.attempt_sync(&[file.clone()]).await.unwrap();
        assert_eq!(result.uploaded_files, vec!["memories.db"]);
    }
    assert!(state.get("laptop-01", "memories.db").unwrap().unwrap().compressed);
}

#[tokio::test]
async fn test_empty_file_is_a_single_put() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "empty.db", b"");
    let h = harness(raw_settings());

    h.transfer.attempt_sync(&[file]).await.unwrap();
    assert_eq!(h.store.part_calls(), 0);
    assert_eq!(h.store.object("systems/laptop-01/empty.db").unwrap(), b"");
    assert_eq!(manifest(&h.store).files[0].chunk_count, 0);
}

#[tokio::test]
async fn test_manifest_is_the_last_write() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_file(dir.path(), "memories.db", &noise(150_000));
    let b = write_file(dir.path(), "export.json", b"{\"memories\":[]}");
    let h = harness(raw_settings());

    h.transfer.attempt_sync(&[a.clone(), b.clone()]).await.unwrap();

    let commits = h.store.commits();
    assert_eq!(commits.len(), 3);
    assert_eq!(commits.last().unwrap(), MANIFEST_KEY);

    let m = manifest(&h.store);
    assert_eq!(m.system_id, "laptop-01");
    assert_eq!(m.schema_version, 1);
    let names: Vec<_> = m.files.iter().map(|f| f.logical_name.as_str()).collect();
    assert_eq!(names, vec!["memories.db", "export.json"]);
    assert_eq!(m.files[0].checksum, file_checksum(&a).await.unwrap());
    assert_eq!(m.files[1].checksum, file_checksum(&b).await.unwrap());
}

#[tokio::test]
async fn test_part_retry_backs_off_then_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "memories.db", &noise(3 * CHUNK as usize));
    let h = harness(raw_settings());
    h.store.fail_part(2, 2);

    let result = h.transfer.attempt_sync(&[file]).await.unwrap();
    assert!(result.success);

    let attempts = h.store.attempts_for(2);
    assert_eq!(attempts.len(), 3);
    assert!(attempts[1] - attempts[0] >= Duration::from_millis(20));
    assert!(attempts[2] - attempts[1] >= Duration::from_millis(40));

    // Neighbouring parts are not retried
    assert_eq!(h.store.attempts_for(1).len(), 1);
    assert_eq!(h.store.attempts_for(3).len(), 1);
}

#[tokio::test]
async fn test_exhausted_part_retries_fail_without_commit() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "memories.db", &noise(2 * CHUNK as usize));
    let h = harness(SyncSettings {
        max_retries: 2,
        ..raw_settings()
    });
    h.store.fail_part(1, u32::MAX);

    let err = h.transfer.attempt_sync(&[file]).await.unwrap_err();
    match err {
        SyncError::Upload { file, part, .. } => {
            assert_eq!(file, "memories.db");
            assert_eq!(part, Some(1));
        }
        other => panic!("expected Upload, got {:?}", other),
    }

    assert_eq!(h.store.attempts_for(1).len(), 3);
    assert!(h.store.attempts_for(2).is_empty());
    assert!(h.store.object(MANIFEST_KEY).is_none());
    assert!(h.state.list("laptop-01").unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_manifest_leaves_prior_state_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "memories.db", b"snapshot");
    let h = harness(raw_settings());
    h.store.fail_manifest();

    let err = h.transfer.attempt_sync(&[file]).await.unwrap_err();
    assert!(err.to_string().contains("manifest.json"));

    // The object landed but the batch was never committed
    assert!(h.store.object("systems/laptop-01/memories.db").is_some());
    assert!(h.store.object(MANIFEST_KEY).is_none());
    assert!(h.state.list("laptop-01").unwrap().is_empty());
}

#[tokio::test]
async fn test_probe_maps_store_errors_to_unavailable() {
    let h = harness(raw_settings());
    assert!(h.transfer.is_available(Duration::from_secs(1)).await);

    h.store.set_unavailable();
    let err = h.transfer.probe(Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Availability {
            method: MethodKind::Cloud,
            ..
        }
    ));
}

#[tokio::test]
async fn test_file_named_like_the_manifest_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let user_manifest = write_file(dir.path(), "manifest.json", b"{\"user\": true}");
    let data = write_file(dir.path(), "memories.db", &noise(2 * CHUNK as usize));
    let h = harness(raw_settings());
    h.store.fail_part(2, u32::MAX);

    let err = h
        .transfer
        .attempt_sync(&[user_manifest.clone(), data])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    // Rejected before anything reached the store
    assert!(h.store.commits().is_empty());
    assert_eq!(h.store.part_calls(), 0);
    assert!(h.store.object(MANIFEST_KEY).is_none());

    // A lone file of that name is rejected too, on every run
    for _ in 0..2 {
        let err = h
            .transfer
            .attempt_sync(&[user_manifest.clone()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
    assert!(h.store.commits().is_empty());
    assert!(h.state.list("laptop-01").unwrap().is_empty());
}

/// Reads succeed, writes always fail
struct ReadOnlyStateStore;

impl PriorStateStore for ReadOnlyStateStore {
    fn get(
        &self,
        _system_id: &str,
        _logical_name: &str,
    ) -> engram_sync::Result<Option<PriorRecord>> {
        Ok(None)
    }

    fn put_all(&self, _records: &[PriorRecord]) -> engram_sync::Result<()> {
        Err(SyncError::Internal("database is locked".to_string()))
    }

    fn list(&self, _system_id: &str) -> engram_sync::Result<Vec<PriorRecord>> {
        Ok(Vec::new())
    }

    fn clear(&self, _system_id: &str) -> engram_sync::Result<usize> {
        Ok(0)
    }
}

#[tokio::test]
async fn test_unrecorded_state_is_reported_as_warning() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "memories.db", b"snapshot");
    let store = MemoryObjectStore::new();
    let transfer = CloudTransfer::new(
        config(raw_settings()),
        Some(store.clone() as Arc<dyn ObjectStore>),
        Arc::new(ReadOnlyStateStore),
    );

    let result = transfer.attempt_sync(&[file.clone()]).await.unwrap();
    assert!(result.success);
    assert_eq!(result.uploaded_files, vec!["memories.db"]);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("database is locked"));
    assert!(store.object(MANIFEST_KEY).is_some());

    // Nothing was remembered, so the next run uploads again
    let again = transfer.attempt_sync(&[file]).await.unwrap();
    assert_eq!(again.uploaded_files, vec!["memories.db"]);
    assert!(again.skipped_files.is_empty());
}

#[tokio::test]
async fn test_recorded_state_leaves_no_warning() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "memories.db", b"snapshot");
    let h = harness(raw_settings());

    let result = h.transfer.attempt_sync(&[file]).await.unwrap();
    assert!(result.warnings.is_empty());
}
