//! Configuration file loader for release-backfill
//!
//! This module provides configuration loading, merging and validation.

use super::config::*;
use crate::core::error::SyncError;
use crate::core::retry::RetryOptions;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

/// Configuration file name looked up in the working directory
pub const CONFIG_FILENAME: &str = ".backfill.yaml";

/// Configuration load options
#[derive(Debug, Clone, Default)]
pub struct ConfigLoadOptions {
    /// Explicit config file; it is an error if it does not exist
    pub config_path: Option<PathBuf>,

    /// Directory searched for `.backfill.yaml` when no explicit path is given
    pub working_dir: PathBuf,

    /// CLI arguments (highest priority)
    pub cli_args: Option<BackfillConfig>,

    /// Environment variables
    pub env: HashMap<String, String>,
}

/// Configuration file loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from multiple sources with priority
    ///
    /// Priority (high to low):
    /// 1. CLI arguments
    /// 2. Environment variables (`BACKFILL_*`)
    /// 3. Config file (`--config`, or `./.backfill.yaml`)
    /// 4. Default values
    pub async fn load(options: ConfigLoadOptions) -> Result<BackfillConfig, SyncError> {
        let mut configs: Vec<BackfillConfig> = Vec::new();

        // 3. Config file
        let file_config = match &options.config_path {
            Some(path) => Some(
                Self::load_config_file(path)
                    .await?
                    .ok_or_else(|| {
                        SyncError::config(format!("config file {} not found", path.display()))
                    })?,
            ),
            None => Self::load_config_file(&options.working_dir.join(CONFIG_FILENAME)).await?,
        };
        if let Some(file_config) = file_config {
            configs.push(file_config);
        }

        // 2. Environment variables
        if let Some(env_config) = Self::load_env_config(&options.env)? {
            debug!("applying BACKFILL_* environment overrides");
            configs.push(env_config);
        }

        // 1. CLI arguments (highest priority)
        if let Some(cli_config) = options.cli_args {
            configs.push(cli_config);
        }

        Ok(Self::merge_configs(configs))
    }

    /// Load and validate in one step
    pub async fn load_settings(options: ConfigLoadOptions) -> Result<SyncSettings, SyncError> {
        let config = Self::load(options).await?;
        Self::validate(config)
    }

    /// Load configuration from a YAML file, `None` if it does not exist
    async fn load_config_file(file_path: &Path) -> Result<Option<BackfillConfig>, SyncError> {
        if fs::metadata(file_path).await.is_err() {
            return Ok(None);
        }

        let content = fs::read_to_string(file_path).await.map_err(|e| {
            SyncError::config(format!("failed to read {}: {}", file_path.display(), e))
        })?;

        let config: BackfillConfig = serde_yaml::from_str(&content).map_err(|e| {
            SyncError::config(format!("failed to parse {}: {}", file_path.display(), e))
        })?;

        debug!(path = %file_path.display(), "loaded config file");
        Ok(Some(config))
    }

    /// Read a versions file: one version per line, `#` comments allowed
    pub async fn read_versions_file(file_path: &Path) -> Result<Vec<String>, SyncError> {
        let content = fs::read_to_string(file_path).await.map_err(|e| {
            SyncError::config(format!("failed to read {}: {}", file_path.display(), e))
        })?;

        Ok(VersionList::parse_lines(&content)?.as_slice().to_vec())
    }

    /// Load configuration from environment variables
    fn load_env_config(env: &HashMap<String, String>) -> Result<Option<BackfillConfig>, SyncError> {
        let mut config = BackfillConfig::default();
        let mut has_changes = false;

        let get = |key: &str| {
            env.get(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(package) = get("BACKFILL_PACKAGE") {
            config.package = Some(package);
            has_changes = true;
        }

        if let Some(versions) = get("BACKFILL_VERSIONS") {
            config.versions = Some(split_list(&versions));
            has_changes = true;
        }

        if let Some(repository) = get("BACKFILL_REPOSITORY") {
            config.repository = Some(repository);
            has_changes = true;
        }

        if let Some(index_url) = get("BACKFILL_INDEX_URL") {
            config.index_url = Some(index_url);
            has_changes = true;
        }

        if let Some(staging_dir) = get("BACKFILL_STAGING_DIR") {
            config.staging_dir = Some(PathBuf::from(staging_dir));
            has_changes = true;
        }

        if let Some(timeout) = get("BACKFILL_TIMEOUT_SECS") {
            let secs = timeout.parse::<u64>().map_err(|_| {
                SyncError::config(format!("BACKFILL_TIMEOUT_SECS={:?} is not a number", timeout))
            })?;
            config.timeout_secs = Some(secs);
            has_changes = true;
        }

        Ok(if has_changes { Some(config) } else { None })
    }

    /// Merge multiple configurations with priority
    fn merge_configs(configs: Vec<BackfillConfig>) -> BackfillConfig {
        let mut result = BackfillConfig::default();

        for config in configs {
            Self::merge_into(&mut result, config);
        }

        result
    }

    /// Merge source config into target
    fn merge_into(target: &mut BackfillConfig, source: BackfillConfig) {
        if source.package.is_some() {
            target.package = source.package;
        }
        // A later source replaces the list, it never appends to it
        if source.versions.is_some() {
            target.versions = source.versions;
        }
        if source.repository.is_some() {
            target.repository = source.repository;
        }
        if source.index_url.is_some() {
            target.index_url = source.index_url;
        }
        if source.api_url.is_some() {
            target.api_url = source.api_url;
        }
        if source.uploads_url.is_some() {
            target.uploads_url = source.uploads_url;
        }
        if source.staging_dir.is_some() {
            target.staging_dir = source.staging_dir;
        }
        if source.timeout_secs.is_some() {
            target.timeout_secs = source.timeout_secs;
        }

        if let Some(source_release) = source.release {
            let target_release = target.release.get_or_insert_with(ReleaseTemplateConfig::default);

            if source_release.tag_template.is_some() {
                target_release.tag_template = source_release.tag_template;
            }
            if source_release.title_template.is_some() {
                target_release.title_template = source_release.title_template;
            }
            if source_release.notes_template.is_some() {
                target_release.notes_template = source_release.notes_template;
            }
        }

        if source.retry.is_some() {
            target.retry = source.retry;
        }
    }

    /// Validate a merged configuration into immutable run settings
    pub fn validate(config: BackfillConfig) -> Result<SyncSettings, SyncError> {
        let package = PackageIdentifier::new(
            config
                .package
                .ok_or_else(|| SyncError::config("package is required"))?,
        )?;

        let versions = VersionList::new(config.versions.unwrap_or_default())?;

        let repository = RepositorySlug::parse(
            config
                .repository
                .as_deref()
                .ok_or_else(|| SyncError::config("repository is required (owner/name)"))?,
        )?;

        let index_url = validate_url("index_url", config.index_url, DEFAULT_INDEX_URL)?;
        let api_url = validate_url("api_url", config.api_url, DEFAULT_API_URL)?;
        let uploads_url = validate_url("uploads_url", config.uploads_url, DEFAULT_UPLOADS_URL)?;

        let timeout_secs = config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(SyncError::config("timeout_secs must be greater than zero"));
        }

        let template = ReleaseTemplate::new(config.release.unwrap_or_default())?;
        template.check_versions(&package, &versions)?;

        let retry = config.retry.unwrap_or_default();
        validate_retry(&retry)?;

        Ok(SyncSettings {
            package,
            versions,
            repository,
            index_url,
            api_url,
            uploads_url,
            staging_dir: config.staging_dir,
            timeout: Duration::from_secs(timeout_secs),
            template,
            retry,
        })
    }
}

/// Split a comma separated list, dropping empty entries
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn validate_url(field: &str, value: Option<String>, default: &str) -> Result<String, SyncError> {
    let url = value.unwrap_or_else(|| default.to_string());
    let url = url.trim().trim_end_matches('/');

    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(SyncError::config(format!(
            "{} {:?} must be an http(s) URL",
            field, url
        )));
    }

    Ok(url.to_string())
}

fn validate_retry(retry: &RetryOptions) -> Result<(), SyncError> {
    if retry.max_attempts < 2 {
        return Err(SyncError::config(
            "retry.max_attempts must be at least 2 (one attempt plus one retry)",
        ));
    }
    if retry.backoff_multiplier < 1.0 {
        return Err(SyncError::config("retry.backoff_multiplier must be at least 1.0"));
    }
    if retry.max_delay < retry.initial_delay {
        return Err(SyncError::config(
            "retry.max_delay_ms must not be smaller than retry.initial_delay_ms",
        ));
    }

    Ok(())
}
