//! PyPI fetcher - resolves an exact release through the PyPI JSON API
//!
//! `GET {index}/pypi/{package}/{version}/json` lists every file uploaded for
//! that release, with its download URL and sha256 digest. Each file is
//! downloaded, verified, and written into the version's staging area.

use crate::core::config::PackageIdentifier;
use crate::core::error::SyncError;
use crate::core::traits::{Artifact, ArtifactFetcher, ArtifactSet};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

const SERVICE: &str = "pypi";

/// Release document returned by the per-version JSON endpoint
#[derive(Debug, Deserialize)]
struct PypiRelease {
    info: PypiInfo,
    #[serde(default)]
    urls: Vec<PypiFile>,
}

#[derive(Debug, Deserialize)]
struct PypiInfo {
    version: String,
}

/// One uploaded distribution file
#[derive(Debug, Clone, Deserialize)]
struct PypiFile {
    filename: String,
    url: String,
    #[serde(default)]
    digests: PypiDigests,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    yanked: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PypiDigests {
    sha256: Option<String>,
}

/// Package index fetcher for PyPI and PyPI-compatible JSON APIs
pub struct PypiFetcher {
    client: Client,
    index_url: String,
}

impl PypiFetcher {
    /// Create a new fetcher
    ///
    /// # Arguments
    ///
    /// * `index_url` - Base URL without trailing slash (e.g., "https://pypi.org")
    /// * `timeout` - Applied to every request, including file downloads
    pub fn new(index_url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("release-backfill/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Network {
                service: SERVICE.to_string(),
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            index_url: index_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn release_url(&self, package: &PackageIdentifier, version: &str) -> String {
        format!("{}/pypi/{}/{}/json", self.index_url, package, version)
    }

    /// Fetch the file listing for an exact version
    async fn fetch_release(
        &self,
        package: &PackageIdentifier,
        version: &str,
    ) -> Result<PypiRelease, SyncError> {
        let url = self.release_url(package, version);
        debug!(%url, "querying index");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| SyncError::from_transport(SERVICE, &e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(not_found(package, version));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SyncError::from_transport(SERVICE, &e))?;
        parse_release(&body)
    }

    /// Download one file and return its verified bytes
    async fn download(&self, file: &PypiFile) -> Result<Vec<u8>, SyncError> {
        let response = self
            .client
            .get(&file.url)
            .send()
            .await
            .map_err(|e| SyncError::from_transport(SERVICE, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::from_transport(SERVICE, &e))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ArtifactFetcher for PypiFetcher {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn fetch(
        &self,
        package: &PackageIdentifier,
        version: &str,
        destination: &Path,
    ) -> Result<ArtifactSet, SyncError> {
        let release = self.fetch_release(package, version).await?;

        if release.info.version != version {
            warn!(
                requested = version,
                returned = %release.info.version,
                "index returned a differently spelled version, keeping the requested one"
            );
        }
        if release.urls.is_empty() {
            // A release without files has nothing to reproduce
            return Err(not_found(package, version));
        }

        let mut artifacts = Vec::with_capacity(release.urls.len());
        for file in &release.urls {
            validate_filename(&file.filename)?;
            if file.yanked {
                warn!(file = %file.filename, "file is yanked on the index, copying it anyway");
            }

            let bytes = self.download(file).await?;
            let sha256 = verify_download(file, &bytes)?;

            let path = destination.join(&file.filename);
            fs::write(&path, &bytes).await?;

            debug!(file = %file.filename, size = bytes.len(), "staged artifact");
            artifacts.push(Artifact {
                name: file.filename.clone(),
                path,
                size: bytes.len() as u64,
                sha256: Some(sha256),
            });
        }

        let set = ArtifactSet::new(version, artifacts);
        info!(
            %package,
            version,
            files = set.len(),
            bytes = set.total_size(),
            "fetched artifacts"
        );
        Ok(set)
    }
}

fn not_found(package: &PackageIdentifier, version: &str) -> SyncError {
    SyncError::NotFound {
        service: SERVICE.to_string(),
        package: package.to_string(),
        version: version.to_string(),
    }
}

/// Map a non-success status to the error taxonomy
fn status_error(status: StatusCode, body: &str) -> SyncError {
    let message = format!("HTTP {}: {}", status, truncate(body, 200));

    if status == StatusCode::TOO_MANY_REQUESTS {
        SyncError::RateLimited {
            service: SERVICE.to_string(),
            message,
        }
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        SyncError::Network {
            service: SERVICE.to_string(),
            message,
        }
    } else {
        SyncError::UnexpectedResponse {
            service: SERVICE.to_string(),
            message,
        }
    }
}

fn parse_release(body: &str) -> Result<PypiRelease, SyncError> {
    serde_json::from_str(body).map_err(|e| SyncError::UnexpectedResponse {
        service: SERVICE.to_string(),
        message: format!("malformed release document: {}", e),
    })
}

/// Reject names that would escape the staging area
fn validate_filename(name: &str) -> Result<(), SyncError> {
    let unsafe_name = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');

    if unsafe_name {
        return Err(SyncError::UnexpectedResponse {
            service: SERVICE.to_string(),
            message: format!("refusing unsafe artifact file name {:?}", name),
        });
    }

    Ok(())
}

/// Check size and digest against what the index advertised
///
/// Returns the hex sha256 of the downloaded bytes.
fn verify_download(file: &PypiFile, bytes: &[u8]) -> Result<String, SyncError> {
    let actual = hex::encode(Sha256::digest(bytes));

    if let Some(expected) = &file.digests.sha256 {
        if !expected.eq_ignore_ascii_case(&actual) {
            return Err(SyncError::ChecksumMismatch {
                file: file.filename.clone(),
                expected: expected.to_lowercase(),
                actual,
            });
        }
    } else if let Some(expected_size) = file.size {
        if expected_size != bytes.len() as u64 {
            return Err(SyncError::ChecksumMismatch {
                file: file.filename.clone(),
                expected: format!("{} bytes", expected_size),
                actual: format!("{} bytes", bytes.len()),
            });
        }
    }

    Ok(actual)
}

fn truncate(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
