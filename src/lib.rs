//! Engram Sync - hybrid artifact sync
//!
//! Pushes local snapshot files (memory databases, exports) to chunked,
//! deduplicated object storage when it is reachable, and falls back to a
//! single bounded HTTP upload otherwise.

pub mod config;
pub mod engine;
pub mod error;
pub mod state;
pub mod sync;
pub mod types;

pub use config::{SyncConfig, SyncSettings};
pub use engine::SyncEngine;
pub use error::{Result, SyncError};
pub use sync::{SyncMethod, SyncOrchestrator, SyncWorker, TriggerOutcome};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
