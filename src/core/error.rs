//! Error handling for release backfilling
//!
//! This module provides the error taxonomy shared by the fetcher, the
//! publisher and the orchestrator, using the thiserror crate. Each error
//! knows whether it is worth retrying, whether it must abort the whole run,
//! and which per-version failure reason it turns into.

use crate::orchestration::summary::FailureReason;
use thiserror::Error;

/// Main error type for backfill operations
#[derive(Error, Debug)]
pub enum SyncError {
    // Configuration errors
    #[error("invalid configuration: {message}")]
    Config { message: String },

    // Credential errors
    #[error("[{service}] no API token found (set {variable})")]
    TokenMissing { service: String, variable: String },

    #[error("[{service}] authentication failed: {message}")]
    Authentication { service: String, message: String },

    // Index errors
    #[error("[{service}] {package} {version} was not found on the index")]
    NotFound {
        service: String,
        package: String,
        version: String,
    },

    // Transient errors
    #[error("[{service}] network error: {message}")]
    Network { service: String, message: String },

    #[error("[{service}] request timed out")]
    Timeout { service: String },

    #[error("[{service}] rate limited: {message}")]
    RateLimited { service: String, message: String },

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    // Release host errors
    #[error("[{service}] release {tag} already exists")]
    TagExists { service: String, tag: String },

    #[error("[{service}] release {tag} exists with different assets: {message}")]
    Conflict {
        service: String,
        tag: String,
        message: String,
    },

    #[error(
        "[{service}] release {tag} is incomplete: uploaded [{}], missing [{}]: {message}",
        .uploaded.join(", "),
        .missing.join(", ")
    )]
    PartialUpload {
        service: String,
        tag: String,
        uploaded: Vec<String>,
        missing: Vec<String>,
        message: String,
    },

    #[error("[{service}] unexpected response: {message}")]
    UnexpectedResponse { service: String, message: String },

    // Local errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Check if this error may go away on retry
    ///
    /// Checksum mismatches count as transient: a corrupted transfer looks
    /// exactly the same as a bad artifact.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. }
                | Self::Timeout { .. }
                | Self::RateLimited { .. }
                | Self::ChecksumMismatch { .. }
        )
    }

    /// Check if this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::TokenMissing { .. } | Self::Authentication { .. }
        )
    }

    /// Map a per-version error to the reason recorded in the run summary
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::NotFound { .. } => FailureReason::NotFound,
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::RateLimited { .. }
            | Self::ChecksumMismatch { .. } => FailureReason::Transient,
            Self::TagExists { .. } | Self::Conflict { .. } => FailureReason::Conflict,
            Self::PartialUpload {
                uploaded, missing, ..
            } => FailureReason::PartialUpload {
                uploaded: uploaded.clone(),
                missing: missing.clone(),
            },
            Self::Config { .. }
            | Self::TokenMissing { .. }
            | Self::Authentication { .. }
            | Self::UnexpectedResponse { .. }
            | Self::Io(_) => FailureReason::Other,
        }
    }

    /// Get suggested actions for this error
    pub fn suggested_actions(&self) -> Vec<&'static str> {
        match self {
            Self::Config { .. } => vec![
                "Check the package name and version list",
                "Run with -v to see which configuration sources were loaded",
            ],
            Self::TokenMissing { .. } => {
                vec!["Export GITHUB_TOKEN (or GH_TOKEN) with permission to create releases"]
            }
            Self::Authentication { .. } => vec![
                "Check that the token has not expired",
                "Check that the token can write releases on the target repository",
            ],
            Self::NotFound { .. } => vec![
                "Check the version string for typos",
                "Confirm the version was published to the index",
            ],
            Self::Network { .. } | Self::Timeout { .. } => vec![
                "Check the network connection",
                "Re-run later; completed versions are skipped",
            ],
            Self::RateLimited { .. } => vec!["Wait for the rate limit window to reset and re-run"],
            Self::ChecksumMismatch { .. } => {
                vec!["Re-run; the download may have been corrupted in transit"]
            }
            Self::TagExists { .. } | Self::Conflict { .. } => vec![
                "Inspect the existing release on the release host",
                "Delete it manually if it should be recreated from the index",
            ],
            Self::PartialUpload { .. } => vec![
                "Upload the missing assets manually, or delete the release and re-run",
                "Re-running alone will skip this release because it already exists",
            ],
            Self::UnexpectedResponse { .. } => {
                vec!["Check the service status page and re-run"]
            }
            Self::Io(_) => vec!["Check free space and permissions of the staging directory"],
        }
    }

    /// Get error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "CONFIG_ERROR",
            Self::TokenMissing { .. } => "TOKEN_MISSING",
            Self::Authentication { .. } => "AUTHENTICATION_FAILED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Network { .. } => "NETWORK_ERROR",
            Self::Timeout { .. } => "TIMEOUT_ERROR",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            Self::TagExists { .. } => "TAG_EXISTS",
            Self::Conflict { .. } => "CONFLICT",
            Self::PartialUpload { .. } => "PARTIAL_UPLOAD",
            Self::UnexpectedResponse { .. } => "UNEXPECTED_RESPONSE",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Classify a reqwest transport error for the given service
    pub fn from_transport(service: &str, error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                service: service.to_string(),
            }
        } else if error.is_decode() {
            Self::UnexpectedResponse {
                service: service.to_string(),
                message: error.to_string(),
            }
        } else {
            Self::Network {
                service: service.to_string(),
                message: error.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_is_fatal() {
        let error = SyncError::config("package name is empty");

        assert!(error.is_fatal());
        assert!(!error.is_transient());
        assert_eq!(error.code(), "CONFIG_ERROR");
        assert!(error.to_string().contains("package name is empty"));
    }

    #[test]
    fn test_not_found_is_permanent_but_not_fatal() {
        let error = SyncError::NotFound {
            service: "pypi".to_string(),
            package: "example-pkg".to_string(),
            version: "9.9.9".to_string(),
        };

        assert!(!error.is_transient());
        assert!(!error.is_fatal());
        assert_eq!(error.failure_reason(), FailureReason::NotFound);
        assert!(error.to_string().contains("example-pkg 9.9.9"));
    }

    #[test]
    fn test_transient_kinds() {
        let errors = vec![
            SyncError::Network {
                service: "pypi".to_string(),
                message: "connection reset".to_string(),
            },
            SyncError::Timeout {
                service: "github".to_string(),
            },
            SyncError::RateLimited {
                service: "github".to_string(),
                message: "secondary rate limit".to_string(),
            },
            SyncError::ChecksumMismatch {
                file: "pkg-1.0.0.tar.gz".to_string(),
                expected: "aa".to_string(),
                actual: "bb".to_string(),
            },
        ];

        for error in errors {
            assert!(error.is_transient(), "expected {} to be transient", error.code());
            assert_eq!(error.failure_reason(), FailureReason::Transient);
        }
    }

    #[test]
    fn test_authentication_is_fatal() {
        let error = SyncError::Authentication {
            service: "github".to_string(),
            message: "Bad credentials".to_string(),
        };

        assert!(error.is_fatal());
        assert_eq!(error.code(), "AUTHENTICATION_FAILED");
    }

    #[test]
    fn test_partial_upload_lists_assets() {
        let error = SyncError::PartialUpload {
            service: "github".to_string(),
            tag: "v1.0.0".to_string(),
            uploaded: vec!["a.whl".to_string()],
            missing: vec!["b.tar.gz".to_string(), "c.whl".to_string()],
            message: "connection reset".to_string(),
        };

        let display = error.to_string();
        assert!(display.contains("uploaded [a.whl]"));
        assert!(display.contains("missing [b.tar.gz, c.whl]"));
        assert_eq!(
            error.failure_reason(),
            FailureReason::PartialUpload {
                uploaded: vec!["a.whl".to_string()],
                missing: vec!["b.tar.gz".to_string(), "c.whl".to_string()],
            }
        );
    }

    #[test]
    fn test_tag_exists_maps_to_conflict() {
        let error = SyncError::TagExists {
            service: "github".to_string(),
            tag: "v1.0.0".to_string(),
        };

        assert_eq!(error.failure_reason(), FailureReason::Conflict);
        assert!(!error.suggested_actions().is_empty());
    }

    #[test]
    fn test_io_error_conversion() {
        let error: SyncError = std::io::Error::other("disk full").into();

        assert_eq!(error.code(), "IO_ERROR");
        assert_eq!(error.failure_reason(), FailureReason::Other);
    }
}
