//! Release host collaborators
//!
//! Implementations of [`crate::core::ReleasePublisher`].

pub mod github;

pub use github::GitHubPublisher;
