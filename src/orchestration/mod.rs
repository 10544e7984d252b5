//! Orchestration layer for release backfilling
//!
//! This module provides the per-run driver and the summary it produces.

pub mod summary;
pub mod sync_orchestrator;

// Re-export main types for convenience
pub use summary::{
    CheckReport, CheckState, FailureReason, RunAbort, RunSummary, SyncOutcome, VersionReport,
    check_exit_code, check_table,
};
pub use sync_orchestrator::{CancellationFlag, SyncOrchestrator, check_releases};
