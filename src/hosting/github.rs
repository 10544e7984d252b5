//! GitHub publisher - creates releases and attaches assets via the REST API
//!
//! Endpoints used:
//!
//! * `GET  {api}/repos/{owner}/{repo}` for the preflight access check
//! * `GET  {api}/repos/{owner}/{repo}/releases/tags/{tag}` to look up a release
//! * `POST {api}/repos/{owner}/{repo}/releases` to create one
//! * `POST {uploads}/repos/{owner}/{repo}/releases/{id}/assets?name=...` per asset

use crate::core::config::RepositorySlug;
use crate::core::error::SyncError;
use crate::core::retry::{RetryManager, RetryOptions};
use crate::core::traits::{
    Artifact, ArtifactSet, ReleaseAsset, ReleasePublisher, ReleaseRecord, ReleaseRequest,
};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap};
use reqwest::{Client, IntoUrl, Method, RequestBuilder, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

const SERVICE: &str = "github";
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    id: u64,
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

impl From<GitHubRelease> for ReleaseRecord {
    fn from(release: GitHubRelease) -> Self {
        Self {
            id: release.id,
            title: release.name.unwrap_or_else(|| release.tag_name.clone()),
            tag: release.tag_name,
            notes: release.body.unwrap_or_default(),
            assets: release.assets.into_iter().map(ReleaseAsset::from).collect(),
            url: release.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    name: String,
    size: u64,
}

impl From<GitHubAsset> for ReleaseAsset {
    fn from(asset: GitHubAsset) -> Self {
        Self {
            name: asset.name,
            size: asset.size,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateRelease<'a> {
    tag_name: &'a str,
    name: &'a str,
    body: &'a str,
    draft: bool,
    prerelease: bool,
}

#[derive(Debug, Deserialize)]
struct GitHubRepository {
    full_name: String,
    #[serde(default)]
    permissions: Option<GitHubPermissions>,
}

#[derive(Debug, Deserialize)]
struct GitHubPermissions {
    #[serde(default)]
    push: bool,
}

/// Error document returned alongside 4xx statuses
#[derive(Debug, Default, Deserialize)]
struct GitHubErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<GitHubErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GitHubErrorDetail {
    #[serde(default)]
    code: Option<String>,
}

impl GitHubErrorBody {
    fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    fn has_code(&self, code: &str) -> bool {
        self.errors
            .iter()
            .any(|detail| detail.code.as_deref() == Some(code))
    }

    fn summary(&self, raw: &str) -> String {
        match &self.message {
            Some(message) => message.clone(),
            None => truncate(raw, 200),
        }
    }
}

/// Release host publisher for GitHub and GitHub Enterprise
pub struct GitHubPublisher {
    client: Client,
    api_url: String,
    uploads_url: String,
    repository: RepositorySlug,
    token: SecretString,
    retry: RetryManager,
}

impl GitHubPublisher {
    /// Create a new publisher
    ///
    /// # Arguments
    ///
    /// * `api_url` - REST API base (e.g., "https://api.github.com")
    /// * `uploads_url` - Asset upload base (e.g., "https://uploads.github.com")
    /// * `retry` - Policy applied to each asset upload individually
    pub fn new(
        api_url: impl Into<String>,
        uploads_url: impl Into<String>,
        repository: RepositorySlug,
        token: SecretString,
        timeout: Duration,
        retry: RetryOptions,
    ) -> Result<Self, SyncError> {
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
            api_url: api_url.into().trim_end_matches('/').to_string(),
            uploads_url: uploads_url.into().trim_end_matches('/').to_string(),
            repository,
            token,
            retry: RetryManager::new(retry),
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.api_url, self.repository.owner, self.repository.name, path
        )
    }

    fn upload_url(&self, release_id: u64) -> String {
        format!(
            "{}/repos/{}/{}/releases/{}/assets",
            self.uploads_url, self.repository.owner, self.repository.name, release_id
        )
    }

    /// Release lookup URL with the tag as a single encoded path segment
    fn release_tag_url(&self, tag: &str) -> Result<Url, SyncError> {
        let base = self.repo_url("/releases/tags");
        let mut url = Url::parse(&base)
            .map_err(|e| SyncError::config(format!("invalid API URL {}: {}", base, e)))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::config(format!("invalid API URL {}", base)))?
            .push(tag);
        Ok(url)
    }

    fn request(&self, method: Method, url: impl IntoUrl) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header(
                AUTHORIZATION,
                format!("Bearer {}", self.token.expose_secret()),
            )
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, SyncError> {
        builder
            .send()
            .await
            .map_err(|e| SyncError::from_transport(SERVICE, &e))
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, SyncError> {
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::from_transport(SERVICE, &e))?;
        serde_json::from_str(&body).map_err(|e| SyncError::UnexpectedResponse {
            service: SERVICE.to_string(),
            message: format!("malformed response document: {}", e),
        })
    }

    async fn get_release(&self, tag: &str) -> Result<Option<GitHubRelease>, SyncError> {
        let url = self.release_tag_url(tag)?;
        debug!(%url, "looking up release");

        let response = self.send(self.request(Method::GET, url)).await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(Some(Self::read_json(response).await?))
    }

    async fn create_release(&self, request: &ReleaseRequest) -> Result<GitHubRelease, SyncError> {
        let payload = CreateRelease {
            tag_name: &request.tag,
            name: &request.title,
            body: &request.notes,
            draft: false,
            prerelease: request.prerelease,
        };

        let response = self
            .send(
                self.request(Method::POST, &self.repo_url("/releases"))
                    .json(&payload),
            )
            .await?;
        let status = response.status();

        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            let error = GitHubErrorBody::parse(&body);
            if error.has_code("already_exists") {
                return Err(SyncError::TagExists {
                    service: SERVICE.to_string(),
                    tag: request.tag.clone(),
                });
            }
            return Err(SyncError::UnexpectedResponse {
                service: SERVICE.to_string(),
                message: format!("release rejected: {}", error.summary(&body)),
            });
        }
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        Self::read_json(response).await
    }

    async fn upload_asset(
        &self,
        release_id: u64,
        artifact: &Artifact,
    ) -> Result<ReleaseAsset, SyncError> {
        let bytes = fs::read(&artifact.path).await?;

        let response = self
            .send(
                self.request(Method::POST, &self.upload_url(release_id))
                    .query(&[("name", artifact.name.as_str())])
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(bytes),
            )
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let asset: GitHubAsset = Self::read_json(response).await?;
        Ok(asset.into())
    }
}

#[async_trait]
impl ReleasePublisher for GitHubPublisher {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn preflight(&self) -> Result<(), SyncError> {
        let response = self.send(self.request(Method::GET, &self.repo_url(""))).await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(SyncError::config(format!(
                "repository {} does not exist or the token cannot see it",
                self.repository
            )));
        }
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        let repository: GitHubRepository = Self::read_json(response).await?;
        if let Some(permissions) = &repository.permissions {
            if !permissions.push {
                return Err(SyncError::Authentication {
                    service: SERVICE.to_string(),
                    message: format!("token cannot write releases on {}", repository.full_name),
                });
            }
        }

        debug!(repository = %repository.full_name, "release host access confirmed");
        Ok(())
    }

    async fn release_exists(&self, tag: &str) -> Result<bool, SyncError> {
        Ok(self.get_release(tag).await?.is_some())
    }

    async fn find_release(&self, tag: &str) -> Result<Option<ReleaseRecord>, SyncError> {
        Ok(self.get_release(tag).await?.map(ReleaseRecord::from))
    }

    async fn publish(
        &self,
        request: &ReleaseRequest,
        artifacts: &ArtifactSet,
    ) -> Result<ReleaseRecord, SyncError> {
        // Single attempt; a retry after a lost response only hits TagExists
        let release = self.create_release(request).await?;
        info!(
            tag = %request.tag,
            release_id = release.id,
            prerelease = request.prerelease,
            "created release"
        );

        let mut uploaded: Vec<ReleaseAsset> = Vec::with_capacity(artifacts.len());
        for (index, artifact) in artifacts.artifacts.iter().enumerate() {
            let label = format!("upload {}", artifact.name);
            match self
                .retry
                .retry(&label, || self.upload_asset(release.id, artifact))
                .await
            {
                Ok(asset) => {
                    debug!(asset = %asset.name, size = asset.size, "uploaded asset");
                    uploaded.push(asset);
                }
                Err(error) => {
                    let missing: Vec<String> = artifacts.artifacts[index..]
                        .iter()
                        .map(|a| a.name.clone())
                        .collect();
                    warn!(
                        tag = %request.tag,
                        failed = %artifact.name,
                        missing = missing.len(),
                        "asset upload failed, release left incomplete"
                    );
                    return Err(SyncError::PartialUpload {
                        service: SERVICE.to_string(),
                        tag: request.tag.clone(),
                        uploaded: uploaded.into_iter().map(|a| a.name).collect(),
                        missing,
                        message: error.to_string(),
                    });
                }
            }
        }

        let mut record = ReleaseRecord::from(release);
        record.assets = uploaded;
        Ok(record)
    }
}

/// Map a non-success response to the error taxonomy
async fn error_from_response(response: reqwest::Response) -> SyncError {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    classify_status(status, &headers, &body)
}

fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> SyncError {
    let error = GitHubErrorBody::parse(body);
    let message = format!("HTTP {}: {}", status, error.summary(body));

    let rate_limit_exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|remaining| remaining.trim() == "0");
    let rate_limit_message = error
        .message
        .as_deref()
        .is_some_and(|m| m.to_lowercase().contains("rate limit"));

    match status {
        StatusCode::TOO_MANY_REQUESTS => SyncError::RateLimited {
            service: SERVICE.to_string(),
            message,
        },
        StatusCode::FORBIDDEN if rate_limit_exhausted || rate_limit_message => {
            SyncError::RateLimited {
                service: SERVICE.to_string(),
                message,
            }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Authentication {
            service: SERVICE.to_string(),
            message,
        },
        StatusCode::REQUEST_TIMEOUT => SyncError::Network {
            service: SERVICE.to_string(),
            message,
        },
        status if status.is_server_error() => SyncError::Network {
            service: SERVICE.to_string(),
            message,
        },
        _ => SyncError::UnexpectedResponse {
            service: SERVICE.to_string(),
            message,
        },
    }
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
