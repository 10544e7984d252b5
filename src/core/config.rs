//! Configuration structures and types for release-backfill
//!
//! [`BackfillConfig`] is the raw, mergeable shape read from YAML files,
//! environment variables and CLI flags. [`SyncSettings`] is the validated,
//! immutable value handed to the orchestrator once per run.

use crate::core::error::SyncError;
use crate::core::retry::RetryOptions;
use crate::core::traits::ReleaseRequest;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

pub const DEFAULT_INDEX_URL: &str = "https://pypi.org";
pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_UPLOADS_URL: &str = "https://uploads.github.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_TAG_TEMPLATE: &str = "v{version}";
pub const DEFAULT_TITLE_TEMPLATE: &str = "{package} {version}";
pub const DEFAULT_NOTES_TEMPLATE: &str =
    "Release {version} of {package}, with the artifacts published to the package index.";

static PACKAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9._-]*[A-Za-z0-9])?$").expect("static pattern")
});

// Alphanumeric runs joined by single separators
static VERSION_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9A-Za-z]+([.+!_-][0-9A-Za-z]+)*$").expect("static pattern")
});

static PRERELEASE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[0-9.\-](a|alpha|b|beta|c|rc|pre|preview|dev)[0-9]*([.+\-]|$)")
        .expect("static pattern")
});

static REPOSITORY_SLUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9][A-Za-z0-9-]*)/([A-Za-z0-9._-]+)$").expect("static pattern")
});

// ============================================================================
// Raw configuration
// ============================================================================

/// Root configuration object, as read from `.backfill.yaml`
///
/// Every field is optional so that files, environment and CLI flags can be
/// layered on top of each other before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BackfillConfig {
    /// Package name on the index
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,

    /// Versions to backfill, in processing order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versions: Option<Vec<String>>,

    /// Target repository as `owner/name`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// Package index base URL (default: https://pypi.org)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_url: Option<String>,

    /// Release host API base URL (default: https://api.github.com)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Release host upload base URL (default: https://uploads.github.com)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploads_url: Option<String>,

    /// Staging root (default: a fresh temporary directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,

    /// Per-request timeout in seconds (default: 60)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Release naming templates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<ReleaseTemplateConfig>,

    /// Retry policy for transient failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryOptions>,
}

/// Release naming templates; `{package}` and `{version}` are substituted
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ReleaseTemplateConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_template: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_template: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes_template: Option<String>,
}

// ============================================================================
// Validated values
// ============================================================================

/// Package name on the index; non-empty and constant for a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageIdentifier(String);

impl PackageIdentifier {
    pub fn new(name: impl Into<String>) -> Result<Self, SyncError> {
        let name = name.into();
        let trimmed = name.trim();

        if trimmed.is_empty() {
            return Err(SyncError::config("package name is empty"));
        }
        if !PACKAGE_NAME.is_match(trimmed) {
            return Err(SyncError::config(format!(
                "package name {:?} contains characters the index does not allow",
                name
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PackageIdentifier {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PackageIdentifier> for String {
    fn from(value: PackageIdentifier) -> Self {
        value.0
    }
}

/// Ordered version strings; duplicates are kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionList(Vec<String>);

impl VersionList {
    pub fn new<I, S>(versions: I) -> Result<Self, SyncError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Vec::new();

        for (position, version) in versions.into_iter().enumerate() {
            let version = version.into();
            if !VERSION_TOKEN.is_match(&version) {
                return Err(SyncError::config(format!(
                    "version #{} ({:?}) is not a valid version token",
                    position + 1,
                    version
                )));
            }
            list.push(version);
        }

        if list.is_empty() {
            return Err(SyncError::config("version list is empty"));
        }

        Ok(Self(list))
    }

    /// Parse a versions file: one version per line, `#` starts a comment
    pub fn parse_lines(content: &str) -> Result<Self, SyncError> {
        Self::new(
            content
                .lines()
                .map(|line| line.split('#').next().unwrap_or_default().trim())
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// Target repository on the release host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositorySlug {
    pub owner: String,
    pub name: String,
}

impl RepositorySlug {
    pub fn parse(slug: &str) -> Result<Self, SyncError> {
        let captures = REPOSITORY_SLUG.captures(slug.trim()).ok_or_else(|| {
            SyncError::config(format!(
                "repository {:?} is not of the form owner/name",
                slug
            ))
        })?;

        Ok(Self {
            owner: captures[1].to_string(),
            name: captures[2].to_string(),
        })
    }
}

impl fmt::Display for RepositorySlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Renders tag, title and notes for a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseTemplate {
    pub tag: String,
    pub title: String,
    pub notes: String,
}

impl Default for ReleaseTemplate {
    fn default() -> Self {
        Self {
            tag: DEFAULT_TAG_TEMPLATE.to_string(),
            title: DEFAULT_TITLE_TEMPLATE.to_string(),
            notes: DEFAULT_NOTES_TEMPLATE.to_string(),
        }
    }
}

impl ReleaseTemplate {
    pub fn new(config: ReleaseTemplateConfig) -> Result<Self, SyncError> {
        let defaults = Self::default();
        let template = Self {
            tag: config.tag_template.unwrap_or(defaults.tag),
            title: config.title_template.unwrap_or(defaults.title),
            notes: config.notes_template.unwrap_or(defaults.notes),
        };

        if !template.tag.contains("{version}") {
            return Err(SyncError::config(format!(
                "tag template {:?} must contain {{version}}, otherwise every version maps to the same tag",
                template.tag
            )));
        }

        let sample = template.render_tag("sample", "0.0.0");
        if !is_valid_tag(&sample) {
            return Err(SyncError::config(format!(
                "tag template {:?} renders to {:?}, which is not a valid tag name",
                template.tag, sample
            )));
        }

        Ok(template)
    }

    /// Reject the first version whose rendered tag is not a valid tag name
    pub fn check_versions(
        &self,
        package: &PackageIdentifier,
        versions: &VersionList,
    ) -> Result<(), SyncError> {
        for version in versions.iter() {
            let tag = self.render_tag(package.as_str(), version);
            if !is_valid_tag(&tag) {
                return Err(SyncError::config(format!(
                    "version {:?} renders to tag {:?}, which is not a valid tag name",
                    version, tag
                )));
            }
        }
        Ok(())
    }

    pub fn render_tag(&self, package: &str, version: &str) -> String {
        substitute(&self.tag, package, version)
    }

    pub fn render(&self, package: &PackageIdentifier, version: &str) -> ReleaseRequest {
        ReleaseRequest {
            tag: self.render_tag(package.as_str(), version),
            title: substitute(&self.title, package.as_str(), version),
            notes: substitute(&self.notes, package.as_str(), version),
            prerelease: is_prerelease(version),
        }
    }
}

/// Detect PEP 440 and semver pre-release markers (`1.0rc1`, `2.0.0-beta.1`, `1.1.dev3`)
///
/// Only the public part is inspected; a `+local` segment never makes a
/// pre-release.
pub fn is_prerelease(version: &str) -> bool {
    let public = version.split('+').next().unwrap_or(version);
    PRERELEASE_MARKER.is_match(public)
}

fn substitute(template: &str, package: &str, version: &str) -> String {
    template
        .replace("{package}", package)
        .replace("{version}", version)
}

/// Git ref name rules relevant to release tags
fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && !tag.starts_with('-')
        && !tag.starts_with('/')
        && !tag.ends_with('/')
        && !tag.ends_with('.')
        && !tag.ends_with(".lock")
        && !tag.contains("..")
        && !tag.contains("@{")
        && !tag
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c))
}

/// Everything a run needs, validated once at startup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSettings {
    pub package: PackageIdentifier,
    pub versions: VersionList,
    pub repository: RepositorySlug,
    pub index_url: String,
    pub api_url: String,
    pub uploads_url: String,
    pub staging_dir: Option<PathBuf>,
    pub timeout: Duration,
    pub template: ReleaseTemplate,
    pub retry: RetryOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_identifier_accepts_index_names() {
        assert_eq!(PackageIdentifier::new("example-pkg").unwrap().as_str(), "example-pkg");
        assert_eq!(PackageIdentifier::new("zope.interface").unwrap().as_str(), "zope.interface");
        assert_eq!(PackageIdentifier::new("  padded ").unwrap().as_str(), "padded");
    }

    #[test]
    fn test_package_identifier_rejects_malformed_names() {
        for name in ["", "   ", "-leading", "trailing-", "has space", "slash/name"] {
            let error = PackageIdentifier::new(name).unwrap_err();
            assert_eq!(error.code(), "CONFIG_ERROR", "expected {:?} to be rejected", name);
        }
    }

    #[test]
    fn test_version_list_keeps_order_and_duplicates() {
        let list = VersionList::new(["1.0.1", "1.0.0", "1.0.1"]).unwrap();

        assert_eq!(list.iter().collect::<Vec<_>>(), vec!["1.0.1", "1.0.0", "1.0.1"]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_version_list_rejects_bad_tokens() {
        assert!(VersionList::new(Vec::<String>::new()).is_err());
        assert!(VersionList::new(["1.0.0", ""]).is_err());
        assert!(VersionList::new(["1.0 .0"]).is_err());
        assert!(VersionList::new([">=1.0"]).is_err());
        for malformed in ["1.0.", "1..0", "1.0-", "1.0+", "1.0.+1"] {
            assert!(
                VersionList::new([malformed]).is_err(),
                "expected {:?} to be rejected",
                malformed
            );
        }
        assert!(VersionList::new(["1.0.0rc1", "2!1.0", "1.0+local", "2.0.0-beta.1"]).is_ok());
    }

    #[test]
    fn test_release_template_checks_every_rendered_tag() {
        let package = PackageIdentifier::new("example-pkg").unwrap();
        let template = ReleaseTemplate::default();

        let fine = VersionList::new(["1.0.0", "1.0.1rc1"]).unwrap();
        assert!(template.check_versions(&package, &fine).is_ok());

        let lock = VersionList::new(["1.0.0", "1.0.lock"]).unwrap();
        let error = template.check_versions(&package, &lock).unwrap_err();
        assert!(error.to_string().contains("v1.0.lock"));
    }

    #[test]
    fn test_version_list_parse_lines() {
        let content = "# history\n0.9.0\n\n1.0.0  # first stable\n";
        let list = VersionList::parse_lines(content).unwrap();

        assert_eq!(list.as_slice(), &["0.9.0".to_string(), "1.0.0".to_string()]);
    }

    #[test]
    fn test_repository_slug() {
        let slug = RepositorySlug::parse("octo-org/example.pkg").unwrap();
        assert_eq!(slug.owner, "octo-org");
        assert_eq!(slug.name, "example.pkg");
        assert_eq!(slug.to_string(), "octo-org/example.pkg");

        assert!(RepositorySlug::parse("no-slash").is_err());
        assert!(RepositorySlug::parse("a/b/c").is_err());
    }

    #[test]
    fn test_release_template_defaults() {
        let template = ReleaseTemplate::new(ReleaseTemplateConfig::default()).unwrap();
        let package = PackageIdentifier::new("example-pkg").unwrap();
        let request = template.render(&package, "1.0.0");

        assert_eq!(request.tag, "v1.0.0");
        assert_eq!(request.title, "example-pkg 1.0.0");
        assert!(request.notes.contains("1.0.0"));
        assert!(!request.prerelease);
    }

    #[test]
    fn test_prerelease_detection() {
        for version in ["1.0.0rc1", "1.0a1", "2.0.0b3", "1.1.dev3", "2.0.0-beta.1", "3.0.0.RC2"] {
            assert!(is_prerelease(version), "expected {} to be a pre-release", version);
        }
        for version in [
            "1.0.0",
            "1.0.0.post1",
            "1.0.0+build.abc",
            "2!1.0",
            "10.2",
            "1.0+cpu.dev",
            "2.1.0+rc1",
        ] {
            assert!(!is_prerelease(version), "expected {} to be a final release", version);
        }
    }

    #[test]
    fn test_release_template_requires_version_placeholder() {
        let config = ReleaseTemplateConfig {
            tag_template: Some("latest".to_string()),
            ..Default::default()
        };

        assert!(ReleaseTemplate::new(config).is_err());
    }

    #[test]
    fn test_release_template_rejects_invalid_tag() {
        let config = ReleaseTemplateConfig {
            tag_template: Some("release {version}".to_string()),
            ..Default::default()
        };

        assert!(ReleaseTemplate::new(config).is_err());
    }

    #[test]
    fn test_deserialize_config_file() {
        let yaml = r#"
package: example-pkg
versions: ["1.0.0", "1.0.1"]
repository: octo/example
release:
  tag_template: "{package}-{version}"
retry:
  max_attempts: 4
"#;
        let config: BackfillConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.package.as_deref(), Some("example-pkg"));
        assert_eq!(config.versions.as_ref().map(Vec::len), Some(2));
        assert_eq!(
            config.release.unwrap().tag_template.as_deref(),
            Some("{package}-{version}")
        );
        assert_eq!(config.retry.unwrap().max_attempts, 4);
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let yaml = "package: example-pkg\nverisons: [\"1.0.0\"]\n";
        assert!(serde_yaml::from_str::<BackfillConfig>(yaml).is_err());
    }
}
