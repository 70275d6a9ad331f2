//! Ordered fallback across transfer methods
//!
//! `Idle -> Probing -> Attempting -> Succeeded | AllFailed`
//!
//! Methods are tried strictly in the order given at construction. A forced
//! method skips probing and fallback. With fallback disabled only the
//! primary method is ever considered.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use super::{collect_files, SyncMethod};
use crate::config::SyncConfig;
use crate::error::{MethodFailure, Result, SyncError};
use crate::types::{ForceMethod, MethodKind, SyncResult};

/// Orchestrator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Probing,
    Attempting,
    Succeeded,
    AllFailed,
}

/// Tagged outcome of one method attempt
enum MethodOutcome {
    Succeeded(SyncResult),
    Failed(SyncError),
}

/// Runs the fallback chain over a fixed, ordered list of methods
pub struct SyncOrchestrator {
    methods: Vec<Arc<dyn SyncMethod>>,
    enable_fallback: bool,
    availability_timeout: Duration,
}

impl SyncOrchestrator {
    /// Create with methods in priority order
    pub fn new(
        methods: Vec<Arc<dyn SyncMethod>>,
        enable_fallback: bool,
        availability_timeout: Duration,
    ) -> Result<Self> {
        if methods.is_empty() {
            return Err(SyncError::Config(
                "At least one sync method is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for method in &methods {
            if !seen.insert(method.kind()) {
                return Err(SyncError::Config(format!(
                    "Sync method {} registered twice",
                    method.kind()
                )));
            }
        }

        Ok(Self {
            methods,
            enable_fallback,
            availability_timeout,
        })
    }

    /// Create with fallback and timeout taken from the configuration
    pub fn from_config(config: &SyncConfig, methods: Vec<Arc<dyn SyncMethod>>) -> Result<Self> {
        Self::new(
            methods,
            config.enable_fallback(),
            config.availability_timeout(),
        )
    }

    /// Method kinds in priority order
    pub fn method_kinds(&self) -> Vec<MethodKind> {
        self.methods.iter().map(|m| m.kind()).collect()
    }

    /// Probe every method concurrently, in priority order
    pub async fn probe_all(&self) -> Vec<(MethodKind, Result<()>)> {
        self.probe(&self.methods).await
    }

    async fn probe(&self, methods: &[Arc<dyn SyncMethod>]) -> Vec<(MethodKind, Result<()>)> {
        let timeout = self.availability_timeout;
        let probes = methods.iter().map(|method| async move {
            let kind = method.kind();
            let result = match tokio::time::timeout(timeout, method.probe(timeout)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Availability {
                    method: kind,
                    reason: format!("probe timed out after {:?}", timeout),
                }),
            };
            (kind, result)
        });
        join_all(probes).await
    }

    async fn attempt(&self, method: &Arc<dyn SyncMethod>, files: &[PathBuf]) -> MethodOutcome {
        tracing::info!(method = method.name(), files = files.len(), "Attempting sync");
        match method.attempt_sync(files).await {
            Ok(result) => MethodOutcome::Succeeded(result),
            Err(e) => MethodOutcome::Failed(e),
        }
    }

    fn transition(&self, from: OrchestratorState, to: OrchestratorState) -> OrchestratorState {
        tracing::debug!(?from, ?to, "Orchestrator state change");
        to
    }

    /// Run one sync invocation
    pub async fn run(&self, files: &[PathBuf], force: ForceMethod) -> Result<SyncResult> {
        // Bad input surfaces directly; no method could succeed with it
        collect_files(files)?;

        let mut state = OrchestratorState::Idle;
        let mut failures = Vec::new();

        let candidates: Vec<Arc<dyn SyncMethod>> = match force.method() {
            Some(kind) => {
                let method = self
                    .methods
                    .iter()
                    .find(|m| m.kind() == kind)
                    .cloned()
                    .ok_or_else(|| {
                        SyncError::Config(format!("Forced method {} is not configured", kind))
                    })?;
                tracing::info!(method = %kind, "Method forced, skipping probe and fallback");
                vec![method]
            }
            None => {
                state = self.transition(state, OrchestratorState::Probing);
                let considered = if self.enable_fallback {
                    &self.methods[..]
                } else {
                    &self.methods[..1]
                };

                let mut available = Vec::new();
                for (method, (kind, result)) in
                    considered.iter().zip(self.probe(considered).await)
                {
                    match result {
                        Ok(()) => available.push(method.clone()),
                        Err(error) => {
                            tracing::warn!(method = %kind, error = %error, "Sync method unavailable");
                            failures.push(MethodFailure { method: kind, error });
                        }
                    }
                }
                available
            }
        };

        state = self.transition(state, OrchestratorState::Attempting);
        let fallback = self.enable_fallback && force == ForceMethod::Auto;

        for method in &candidates {
            match self.attempt(method, files).await {
                MethodOutcome::Succeeded(result) => {
                    self.transition(state, OrchestratorState::Succeeded);
                    if !failures.is_empty() {
                        tracing::info!(
                            method = method.name(),
                            skipped = failures.len(),
                            "Sync succeeded via fallback"
                        );
                    }
                    return Ok(result);
                }
                MethodOutcome::Failed(error) => {
                    tracing::warn!(method = method.name(), error = %error, "Sync method failed");
                    failures.push(MethodFailure {
                        method: method.kind(),
                        error,
                    });
                    if !fallback {
                        break;
                    }
                }
            }
        }

        self.transition(state, OrchestratorState::AllFailed);
        tracing::error!(failures = failures.len(), "All sync methods failed");
        Err(SyncError::AllMethodsFailed(failures))
    }
}
