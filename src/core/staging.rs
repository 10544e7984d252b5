//! Scoped staging directories for downloaded artifacts
//!
//! A [`StagingRoot`] is created once per run. Each version borrows a
//! [`StagingArea`] below it for exactly the duration of its processing; the
//! area is a [`TempDir`], so it is removed on drop even if the version's
//! processing bails out early or panics.

use crate::core::error::SyncError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, warn};

const ROOT_PREFIX: &str = "release-backfill-";

/// Shared staging root; holds at most one version's artifacts at a time
#[derive(Debug)]
pub struct StagingRoot {
    dir: TempDir,
}

impl StagingRoot {
    /// Create a fresh root, below `parent` if given, else in the system temp dir
    ///
    /// The root itself is always a new directory owned by this run, so
    /// clearing it can never touch files the operator put next to it.
    pub fn create(parent: Option<&Path>) -> Result<Self, SyncError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(ROOT_PREFIX);

        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };

        debug!(path = %dir.path().display(), "created staging root");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Check that no version's artifacts are left behind
    pub fn is_empty(&self) -> Result<bool, SyncError> {
        Ok(std::fs::read_dir(self.path())?.next().is_none())
    }

    /// Acquire a dedicated area for one version
    ///
    /// Anything still present under the root is removed first, so a version
    /// never sees another version's files.
    pub fn acquire(&self, label: &str) -> Result<StagingArea, SyncError> {
        let purged = self.purge()?;
        if purged > 0 {
            warn!(
                root = %self.path().display(),
                entries = purged,
                "staging root was not empty, removed leftover entries"
            );
        }

        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", sanitize(label)))
            .tempdir_in(self.path())?;

        debug!(path = %dir.path().display(), "acquired staging area");
        Ok(StagingArea { dir })
    }

    /// Remove every entry below the root, returning how many there were
    fn purge(&self) -> Result<usize, SyncError> {
        let mut removed = 0;

        for entry in std::fs::read_dir(self.path())? {
            let path = entry?.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
            removed += 1;
        }

        Ok(removed)
    }

    /// Delete the root now, surfacing I/O errors instead of ignoring them on drop
    pub fn close(self) -> Result<(), SyncError> {
        self.dir.close()?;
        Ok(())
    }
}

/// Staging directory owned by a single version's processing
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Empty the area so a retried fetch starts from scratch
    pub async fn reset(&self) -> Result<(), SyncError> {
        let mut entries = fs::read_dir(self.path()).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path: PathBuf = entry.path();
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await?;
            } else {
                fs::remove_file(&path).await?;
            }
        }

        Ok(())
    }

    /// Delete the area now; dropping it does the same but swallows errors
    pub fn close(self) -> Result<(), SyncError> {
        self.dir.close()?;
        Ok(())
    }
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
