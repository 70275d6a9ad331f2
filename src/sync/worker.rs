//! Background sync runner
//!
//! Triggers return immediately. Each run executes on the tokio runtime, at
//! most one at a time per system identifier; a trigger that arrives while a
//! run is in flight is dropped, not queued. Outcomes are only visible through
//! [`SyncWorker::status`] and the event channel. A run that panics is
//! reported there as an internal failure.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use super::SyncEvent;
use crate::engine::SyncEngine;
use crate::error::{Result, SyncError};
use crate::types::{ForceMethod, MethodKind, SyncResult, SyncStatus};

const EVENT_CAPACITY: usize = 64;

/// What a trigger did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new run was spawned
    Started,
    /// A run for the same system was already in flight
    Coalesced,
}

/// Non-blocking sync runner shared by all systems of a process
pub struct SyncWorker {
    handle: Handle,
    in_flight: Arc<DashMap<String, ()>>,
    status: Arc<DashMap<String, SyncStatus>>,
    events: broadcast::Sender<SyncEvent>,
}

/// Releases the in-flight slot when the run task ends, however it ends
struct InFlightGuard {
    system_id: String,
    in_flight: Arc<DashMap<String, ()>>,
    status: Arc<DashMap<String, SyncStatus>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(mut status) = self.status.get_mut(&self.system_id) {
            status.is_syncing = false;
        }
        self.in_flight.remove(&self.system_id);
    }
}

impl SyncWorker {
    /// Create on the current tokio runtime
    pub fn new() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| SyncError::Config(format!("Sync worker needs a tokio runtime: {}", e)))?;
        Ok(Self::with_handle(handle))
    }

    pub fn with_handle(handle: Handle) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            handle,
            in_flight: Arc::new(DashMap::new()),
            status: Arc::new(DashMap::new()),
            events,
        }
    }

    /// Start a background sync unless one is already running for the system
    pub fn trigger(
        &self,
        engine: Arc<SyncEngine>,
        files: Vec<PathBuf>,
        force: ForceMethod,
    ) -> TriggerOutcome {
        let system_id = engine.system_id().to_string();

        match self.in_flight.entry(system_id.clone()) {
            Entry::Occupied(_) => {
                self.status.entry(system_id.clone()).or_default().coalesced += 1;
                tracing::info!(system_id = %system_id, "Sync already in flight, coalescing trigger");
                return TriggerOutcome::Coalesced;
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        {
            let mut status = self.status.entry(system_id.clone()).or_default();
            status.is_syncing = true;
            status.runs += 1;
        }

        let guard = InFlightGuard {
            system_id: system_id.clone(),
            in_flight: self.in_flight.clone(),
            status: self.status.clone(),
        };
        let status = self.status.clone();
        let events = self.events.clone();
        let runner = self.handle.clone();

        self.handle.spawn(async move {
            let started_at = Utc::now();
            let started = Instant::now();

            // A panicking run surfaces as a JoinError instead of unwinding this task
            let run = runner.spawn({
                let engine = engine.clone();
                async move { engine.sync_now(&files, force).await }
            });
            let outcome = match run.await {
                Ok(outcome) => outcome,
                Err(e) => Err(SyncError::Internal(format!("Sync run aborted: {}", e))),
            };

            let result = match outcome {
                Ok(result) => {
                    tracing::info!(
                        system_id = %system_id,
                        method = %result.method,
                        uploaded = result.uploaded_files.len(),
                        skipped = result.skipped_files.len(),
                        warnings = result.warnings.len(),
                        duration_ms = result.duration_ms,
                        "Background sync completed"
                    );
                    result
                }
                Err(e) => {
                    tracing::error!(system_id = %system_id, error = %e, "Background sync failed");
                    let method = e
                        .last_method()
                        .or(force.method())
                        .or_else(|| engine.orchestrator().method_kinds().first().copied())
                        .unwrap_or(MethodKind::Http);
                    SyncResult::failure(method, e.info(), started.elapsed().as_millis() as u64)
                }
            };

            let completed_at = Utc::now();
            {
                let mut entry = status.entry(system_id.clone()).or_default();
                if result.success {
                    entry.last_sync = Some(completed_at);
                    entry.last_error = None;
                } else {
                    entry.last_error = result.error.clone();
                }
                entry.last_result = Some(result.clone());
            }

            // Free the slot before announcing completion
            drop(guard);

            let _ = events.send(SyncEvent {
                system_id,
                started_at,
                completed_at,
                result,
            });
        });

        TriggerOutcome::Started
    }

    pub fn is_syncing(&self, system_id: &str) -> bool {
        self.in_flight.contains_key(system_id)
    }

    /// Latest status for a system, if it was ever triggered
    pub fn status(&self, system_id: &str) -> Option<SyncStatus> {
        self.status.get(system_id).map(|s| s.clone())
    }

    /// Completion events for every system
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }
}
