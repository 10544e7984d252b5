pub mod core;
pub mod hosting;
pub mod index;
pub mod orchestration;
pub mod security;

#[cfg(test)]
mod test_support;

pub use crate::core::*;
pub use hosting::GitHubPublisher;
pub use index::PypiFetcher;
pub use orchestration::{
    CancellationFlag, FailureReason, RunAbort, RunSummary, SyncOrchestrator, SyncOutcome, VersionReport,
};
pub use security::SecureTokenManager;
