//! Package index collaborators
//!
//! Implementations of [`crate::core::ArtifactFetcher`].

pub mod pypi;

pub use pypi::PypiFetcher;
