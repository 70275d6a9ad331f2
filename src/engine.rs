//! Sync engine: configuration, fallback chain and prior state wired together

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::state::{PriorStateStore, SqliteStateStore};
use crate::sync::{CloudTransfer, DirectTransfer, SyncMethod, SyncOrchestrator};
use crate::types::{ForceMethod, MethodKind, PriorRecord, SyncResult};

/// Entry point for manual and background syncs of one system
pub struct SyncEngine {
    config: Arc<SyncConfig>,
    orchestrator: SyncOrchestrator,
    state: Arc<dyn PriorStateStore>,
}

impl SyncEngine {
    /// Open with the state database at the configured path and the default
    /// `[cloud, http]` chain
    pub fn open(config: SyncConfig) -> Result<Self> {
        let state: Arc<dyn PriorStateStore> =
            Arc::new(SqliteStateStore::open(config.state_path())?);
        Self::with_state(Arc::new(config), state)
    }

    /// Default `[cloud, http]` chain over the given state store
    pub fn with_state(config: Arc<SyncConfig>, state: Arc<dyn PriorStateStore>) -> Result<Self> {
        let methods: Vec<Arc<dyn SyncMethod>> = vec![
            Arc::new(CloudTransfer::from_config(config.clone(), state.clone())),
            Arc::new(DirectTransfer::new(config.clone())?),
        ];
        let orchestrator = SyncOrchestrator::from_config(&config, methods)?;
        Ok(Self::with_parts(config, orchestrator, state))
    }

    /// Assemble from explicit parts
    pub fn with_parts(
        config: Arc<SyncConfig>,
        orchestrator: SyncOrchestrator,
        state: Arc<dyn PriorStateStore>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            state,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn system_id(&self) -> &str {
        self.config.system_id()
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    /// Sync with the configured method selection
    pub async fn sync(&self, files: &[PathBuf]) -> Result<SyncResult> {
        self.sync_now(files, self.config.force_method()).await
    }

    /// Sync and wait for the outcome
    pub async fn sync_now(&self, files: &[PathBuf], force: ForceMethod) -> Result<SyncResult> {
        tracing::info!(
            system_id = self.system_id(),
            files = files.len(),
            force = %force,
            "Starting sync"
        );
        self.orchestrator.run(files, force).await
    }

    /// Availability of every method, in priority order
    pub async fn probe(&self) -> Vec<(MethodKind, Result<()>)> {
        self.orchestrator.probe_all().await
    }

    /// Recorded checksums for this system
    pub fn prior_state(&self) -> Result<Vec<PriorRecord>> {
        self.state.list(self.system_id())
    }

    /// Forget recorded checksums so the next cloud sync re-uploads everything
    pub fn forget(&self) -> Result<usize> {
        let removed = self.state.clear(self.system_id())?;
        tracing::info!(system_id = self.system_id(), removed, "Cleared prior state");
        Ok(removed)
    }
}
