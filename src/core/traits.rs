//! Core traits and types for release backfilling
//!
//! This module defines the two collaborator seams of a sync run, the
//! package index side ([`ArtifactFetcher`]) and the release host side
//! ([`ReleasePublisher`]), together with the values that flow between them.

use crate::core::config::PackageIdentifier;
use crate::core::error::SyncError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ============================================================================
// Artifacts
// ============================================================================

/// A single file published for a version, staged on local disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// File name exactly as published on the index
    pub name: String,
    /// Location inside the version's staging area
    pub path: PathBuf,
    pub size: u64,
    /// Hex sha256 digest, when the index provides one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Every file the index returned for one exact version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSet {
    pub version: String,
    pub artifacts: Vec<Artifact>,
}

impl ArtifactSet {
    pub fn new(version: impl Into<String>, artifacts: Vec<Artifact>) -> Self {
        Self {
            version: version.into(),
            artifacts,
        }
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// File names in index order
    pub fn names(&self) -> Vec<String> {
        self.artifacts.iter().map(|a| a.name.clone()).collect()
    }

    pub fn total_size(&self) -> u64 {
        self.artifacts.iter().map(|a| a.size).sum()
    }

    /// Check whether a release carries exactly these files
    ///
    /// Compares names and sizes as a multiset; ordering on the release host
    /// is not meaningful.
    pub fn matches_assets(&self, assets: &[ReleaseAsset]) -> bool {
        if assets.len() != self.artifacts.len() {
            return false;
        }

        let mut expected: HashMap<(&str, u64), usize> = HashMap::new();
        for artifact in &self.artifacts {
            *expected.entry((artifact.name.as_str(), artifact.size)).or_default() += 1;
        }

        for asset in assets {
            match expected.get_mut(&(asset.name.as_str(), asset.size)) {
                Some(count) if *count > 0 => *count -= 1,
                _ => return false,
            }
        }

        true
    }
}

// ============================================================================
// Releases
// ============================================================================

/// A file attached to a remote release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub size: u64,
}

/// Remote release entity; its existence is what makes re-runs idempotent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub id: u64,
    pub tag: String,
    pub title: String,
    pub notes: String,
    pub assets: Vec<ReleaseAsset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Metadata for a release about to be created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub tag: String,
    pub title: String,
    pub notes: String,
    /// Marks alpha/beta/rc/dev versions as pre-releases on the host
    #[serde(default)]
    pub prerelease: bool,
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Package index side of a sync run
///
/// Implementations must resolve the exact version string they are given,
/// never "latest" or a range.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Service name used in logs and errors (e.g., "pypi")
    fn name(&self) -> &str;

    /// Download every file of `package` at `version` into `destination`
    ///
    /// # Errors
    ///
    /// * [`SyncError::NotFound`] if the index does not know the version
    /// * a transient error (see [`SyncError::is_transient`]) on network
    ///   failures, rate limits, timeouts or checksum mismatches
    async fn fetch(
        &self,
        package: &PackageIdentifier,
        version: &str,
        destination: &Path,
    ) -> Result<ArtifactSet, SyncError>;
}

/// Release host side of a sync run
#[async_trait]
pub trait ReleasePublisher: Send + Sync {
    /// Service name used in logs and errors (e.g., "github")
    fn name(&self) -> &str;

    /// Lightweight existence query for a single tag
    async fn release_exists(&self, tag: &str) -> Result<bool, SyncError> {
        Ok(self.find_release(tag).await?.is_some())
    }

    /// Check access to the target before any version is processed
    ///
    /// Authentication problems surface here as fatal errors instead of as
    /// one failure per version.
    async fn preflight(&self) -> Result<(), SyncError> {
        Ok(())
    }

    /// Fetch the release for `tag` with its attached assets
    async fn find_release(&self, tag: &str) -> Result<Option<ReleaseRecord>, SyncError>;

    /// Create the release, then upload each artifact individually
    ///
    /// # Errors
    ///
    /// * [`SyncError::TagExists`] if a release for the tag appeared since
    ///   the existence check
    /// * [`SyncError::PartialUpload`] if the release was created but not
    ///   every asset could be attached; nothing is rolled back
    async fn publish(
        &self,
        request: &ReleaseRequest,
        artifacts: &ArtifactSet,
    ) -> Result<ReleaseRecord, SyncError>;
}
