//! Sync Orchestrator - drives the fetcher and the publisher per version
//!
//! For every entry of the version list, in order:
//! - skip if a release for the rendered tag already exists
//! - stage the index artifacts in a dedicated area (retried on transient errors)
//! - publish them, resolving tag races by comparing assets
//! - release the staging area on every exit path
//!
//! Per-version errors become [`SyncOutcome::Failed`]; only fatal errors
//! (configuration, credentials, authentication) abort the run.

use crate::core::config::{PackageIdentifier, ReleaseTemplate, SyncSettings, VersionList};
use crate::core::error::SyncError;
use crate::core::retry::RetryManager;
use crate::core::staging::{StagingArea, StagingRoot};
use crate::core::traits::{ArtifactFetcher, ArtifactSet, ReleasePublisher, ReleaseRequest};
use crate::orchestration::summary::{
    CheckReport, CheckState, RunAbort, RunSummary, SyncOutcome, VersionReport,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Shared interrupt flag, checked between versions
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Sequential release backfill over one package's version list
pub struct SyncOrchestrator {
    fetcher: Box<dyn ArtifactFetcher>,
    publisher: Box<dyn ReleasePublisher>,
    template: ReleaseTemplate,
    retry: RetryManager,
    staging: StagingRoot,
    cancellation: CancellationFlag,
}

impl SyncOrchestrator {
    pub fn new(
        fetcher: Box<dyn ArtifactFetcher>,
        publisher: Box<dyn ReleasePublisher>,
        template: ReleaseTemplate,
        retry: RetryManager,
        staging: StagingRoot,
    ) -> Self {
        Self {
            fetcher,
            publisher,
            template,
            retry,
            staging,
            cancellation: CancellationFlag::new(),
        }
    }

    /// Build an orchestrator with a fresh staging root from validated settings
    pub fn from_settings(
        settings: &SyncSettings,
        fetcher: Box<dyn ArtifactFetcher>,
        publisher: Box<dyn ReleasePublisher>,
    ) -> Result<Self, SyncError> {
        let staging = StagingRoot::create(settings.staging_dir.as_deref())?;

        Ok(Self::new(
            fetcher,
            publisher,
            settings.template.clone(),
            RetryManager::new(settings.retry.clone()),
            staging,
        ))
    }

    pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn staging_root(&self) -> &StagingRoot {
        &self.staging
    }

    /// Remove the staging root
    pub fn close(self) -> Result<(), SyncError> {
        self.staging.close()
    }

    /// Process every version in order and collect their outcomes
    ///
    /// # Errors
    ///
    /// Only a failed preflight is returned. A fatal error (see
    /// [`SyncError::is_fatal`]) while processing a version stops the run and
    /// is recorded in [`RunSummary::aborted`] next to the versions already
    /// finished; every other failure becomes that version's outcome.
    pub async fn run(
        &self,
        package: &PackageIdentifier,
        versions: &VersionList,
    ) -> Result<RunSummary, SyncError> {
        let mut summary = RunSummary::new(package.as_str());
        info!(
            run_id = %summary.run_id,
            %package,
            versions = versions.len(),
            index = self.fetcher.name(),
            host = self.publisher.name(),
            "starting backfill"
        );

        self.publisher.preflight().await?;

        for (position, version) in versions.iter().enumerate() {
            if self.cancellation.is_cancelled() {
                warn!(
                    remaining = versions.len() - position,
                    "interrupted: remaining versions were not processed; \
                     a release published while interrupting may be missing assets"
                );
                summary.interrupted = true;
                break;
            }

            match self.sync_version(package, version).await {
                Ok(report) => summary.push(report),
                Err(error) => {
                    warn!(
                        completed = summary.reports.len(),
                        remaining = versions.len() - position,
                        "run aborted; remaining versions were not processed"
                    );
                    summary.aborted = Some(RunAbort::new(version, &error));
                    break;
                }
            }
        }

        summary.finish();
        info!(
            run_id = %summary.run_id,
            succeeded = summary.succeeded(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            "backfill finished"
        );
        Ok(summary)
    }

    /// Report which versions already have a release, without writing anything
    pub async fn check(
        &self,
        package: &PackageIdentifier,
        versions: &VersionList,
    ) -> Result<Vec<CheckReport>, SyncError> {
        check_releases(
            self.publisher.as_ref(),
            &self.template,
            &self.retry,
            package,
            versions,
        )
        .await
    }

    async fn sync_version(
        &self,
        package: &PackageIdentifier,
        version: &str,
    ) -> Result<VersionReport, SyncError> {
        let started = Instant::now();
        let request = self.template.render(package, version);
        let mut attempts = 0;

        let outcome = match self.process(package, version, &request, &mut attempts).await {
            Ok(outcome) => outcome,
            Err(error) if error.is_fatal() => {
                error!(version, tag = %request.tag, "aborting run: {}", error);
                return Err(error);
            }
            Err(error) => {
                let reason = error.failure_reason();
                if matches!(error, SyncError::PartialUpload { .. }) {
                    error!(version, tag = %request.tag, "{}", error);
                } else {
                    warn!(version, tag = %request.tag, %reason, "version failed: {}", error);
                }
                SyncOutcome::Failed {
                    reason,
                    message: error.to_string(),
                }
            }
        };

        Ok(VersionReport {
            version: version.to_string(),
            tag: request.tag,
            outcome,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn process(
        &self,
        package: &PackageIdentifier,
        version: &str,
        request: &ReleaseRequest,
        attempts: &mut u32,
    ) -> Result<SyncOutcome, SyncError> {
        let lookup = self
            .retry
            .retry_counted("release lookup", || {
                self.publisher.release_exists(&request.tag)
            })
            .await;
        *attempts = lookup.attempts;

        if lookup.result? {
            info!(version, tag = %request.tag, "release exists, skipping");
            return Ok(SyncOutcome::Skipped);
        }

        let area = self.staging.acquire(version).map_err(|e| {
            SyncError::config(format!(
                "staging root {} is unusable: {}",
                self.staging.path().display(),
                e
            ))
        })?;

        let outcome = self
            .fetch_and_publish(package, version, request, &area, attempts)
            .await;

        self.release_area(area);
        outcome
    }

    async fn fetch_and_publish(
        &self,
        package: &PackageIdentifier,
        version: &str,
        request: &ReleaseRequest,
        area: &StagingArea,
        attempts: &mut u32,
    ) -> Result<SyncOutcome, SyncError> {
        let fetched = self
            .retry
            .retry_counted("fetch", || async {
                area.reset().await?;
                self.fetcher.fetch(package, version, area.path()).await
            })
            .await;
        *attempts = fetched.attempts;
        let artifacts = fetched.result?;

        match self.publisher.publish(request, &artifacts).await {
            Ok(release) => {
                info!(
                    version,
                    tag = %release.tag,
                    assets = release.assets.len(),
                    "release published"
                );
                Ok(SyncOutcome::Succeeded { release })
            }
            Err(SyncError::TagExists { .. }) => self.resolve_existing(request, &artifacts).await,
            Err(error) => Err(error),
        }
    }

    /// A release for the tag appeared after the existence check
    async fn resolve_existing(
        &self,
        request: &ReleaseRequest,
        artifacts: &ArtifactSet,
    ) -> Result<SyncOutcome, SyncError> {
        let existing = self
            .retry
            .retry("release lookup", || self.publisher.find_release(&request.tag))
            .await?;

        match existing {
            Some(release) if artifacts.matches_assets(&release.assets) => {
                info!(
                    tag = %request.tag,
                    "release was created concurrently with identical assets"
                );
                Ok(SyncOutcome::Succeeded { release })
            }
            Some(release) => {
                let remote: Vec<&str> = release.assets.iter().map(|a| a.name.as_str()).collect();
                Err(SyncError::Conflict {
                    service: self.publisher.name().to_string(),
                    tag: request.tag.clone(),
                    message: format!(
                        "remote has [{}], index has [{}]",
                        remote.join(", "),
                        artifacts.names().join(", ")
                    ),
                })
            }
            None => Err(SyncError::Conflict {
                service: self.publisher.name().to_string(),
                tag: request.tag.clone(),
                message: "tag is taken but no release could be read back".to_string(),
            }),
        }
    }

    fn release_area(&self, area: StagingArea) {
        if let Err(e) = area.close() {
            warn!("failed to remove staging area: {}", e);
        }

        match self.staging.is_empty() {
            Ok(true) => debug!("staging root is empty"),
            Ok(false) => warn!(
                root = %self.staging.path().display(),
                "staging root still has entries after cleanup"
            ),
            Err(e) => warn!("failed to inspect staging root: {}", e),
        }
    }
}

/// Look up every rendered tag on the release host
///
/// Transient lookup failures are retried, then reported per version;
/// fatal errors abort.
pub async fn check_releases(
    publisher: &dyn ReleasePublisher,
    template: &ReleaseTemplate,
    retry: &RetryManager,
    package: &PackageIdentifier,
    versions: &VersionList,
) -> Result<Vec<CheckReport>, SyncError> {
    publisher.preflight().await?;

    let mut reports = Vec::with_capacity(versions.len());
    for version in versions.iter() {
        let tag = template.render_tag(package.as_str(), version);
        let state = match retry
            .retry("release lookup", || publisher.release_exists(&tag))
            .await
        {
            Ok(true) => CheckState::Released,
            Ok(false) => CheckState::Missing,
            Err(error) if error.is_fatal() => return Err(error),
            Err(error) => CheckState::Unknown {
                message: error.to_string(),
            },
        };

        debug!(version, %tag, state = state.label(), "checked release");
        reports.push(CheckReport {
            version: version.to_string(),
            tag,
            state,
        });
    }

    Ok(reports)
}
