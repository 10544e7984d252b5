//! Run Summary - per-version outcomes and the aggregate report
//!
//! Every requested version (duplicates included) produces exactly one
//! [`VersionReport`]. The [`RunSummary`] renders them as a table or JSON and
//! decides the process exit code.

use crate::core::error::SyncError;
use crate::core::traits::ReleaseRecord;
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, Table};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Why a version did not end up with a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The index does not know the version
    NotFound,
    /// Retries were exhausted on network, rate limit or checksum errors
    Transient,
    /// A release for the tag exists with assets that differ from the index
    Conflict,
    /// The release was created but only some assets were attached
    PartialUpload {
        uploaded: Vec<String>,
        missing: Vec<String>,
    },
    /// Anything else the host or the local disk rejected
    Other,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("not_found"),
            Self::Transient => f.write_str("transient"),
            Self::Conflict => f.write_str("conflict"),
            Self::PartialUpload { .. } => f.write_str("partial_upload"),
            Self::Other => f.write_str("other"),
        }
    }
}

/// Final state of one version
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// A release for the tag already existed; nothing was touched
    Skipped,
    /// The release exists with every artifact attached
    Succeeded { release: ReleaseRecord },
    Failed { reason: FailureReason, message: String },
}

impl SyncOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Outcome of one entry of the version list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionReport {
    pub version: String,
    pub tag: String,
    pub outcome: SyncOutcome,
    /// Attempts spent on the step that decided the outcome
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Fatal error that stopped a run after it had started processing versions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunAbort {
    /// Version being processed when the error surfaced
    pub version: String,
    pub code: &'static str,
    pub message: String,
    pub suggested_actions: Vec<&'static str>,
}

impl RunAbort {
    pub fn new(version: impl Into<String>, error: &SyncError) -> Self {
        Self {
            version: version.into(),
            code: error.code(),
            message: error.to_string(),
            suggested_actions: error.suggested_actions(),
        }
    }
}

/// Aggregate report of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub package: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reports: Vec<VersionReport>,
    /// Set when the run stopped early on an interrupt
    pub interrupted: bool,
    /// Set when a fatal error stopped the run; `reports` holds what finished before it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<RunAbort>,
}

impl RunSummary {
    pub fn new(package: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            package: package.into(),
            started_at: now,
            finished_at: now,
            reports: Vec::new(),
            interrupted: false,
            aborted: None,
        }
    }

    pub fn push(&mut self, report: VersionReport) {
        self.reports.push(report);
    }

    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, SyncOutcome::Skipped))
    }

    pub fn succeeded(&self) -> usize {
        self.count(|outcome| matches!(outcome, SyncOutcome::Succeeded { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(SyncOutcome::is_failed)
    }

    fn count(&self, predicate: impl Fn(&SyncOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| predicate(&r.outcome)).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &VersionReport> {
        self.reports.iter().filter(|r| r.outcome.is_failed())
    }

    /// 2 when aborted, 130 when interrupted, 1 when any version failed, 0 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.aborted.is_some() {
            2
        } else if self.interrupted {
            130
        } else if self.failed() > 0 {
            1
        } else {
            0
        }
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// One row per version, in processing order
    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table
            .set_header(vec![
                Cell::new("Version").add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Tag").add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Outcome").add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Attempts").add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Details").add_attribute(comfy_table::Attribute::Bold),
            ])
            .load_preset(comfy_table::presets::UTF8_FULL)
            .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS)
            .set_content_arrangement(comfy_table::ContentArrangement::Dynamic);

        for report in &self.reports {
            let (outcome, color, details) = match &report.outcome {
                SyncOutcome::Skipped => (
                    "skipped".to_string(),
                    Color::DarkGrey,
                    "release already exists".to_string(),
                ),
                SyncOutcome::Succeeded { release } => (
                    "succeeded".to_string(),
                    Color::Green,
                    format!("{} assets", release.assets.len()),
                ),
                SyncOutcome::Failed { reason, message } => {
                    (format!("failed ({})", reason), Color::Red, message.clone())
                }
            };

            table.add_row(vec![
                Cell::new(&report.version),
                Cell::new(&report.tag),
                Cell::new(outcome).fg(color),
                Cell::new(report.attempts),
                Cell::new(details),
            ]);
        }

        table
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Release state of one version as seen by a read-only check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CheckState {
    Released,
    Missing,
    /// The lookup kept failing with transient errors
    Unknown { message: String },
}

impl CheckState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Released => "released",
            Self::Missing => "missing",
            Self::Unknown { .. } => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub version: String,
    pub tag: String,
    pub state: CheckState,
}

/// One row per checked version
pub fn check_table(reports: &[CheckReport]) -> Table {
    let mut table = Table::new();
    table
        .set_header(vec![
            Cell::new("Version").add_attribute(comfy_table::Attribute::Bold),
            Cell::new("Tag").add_attribute(comfy_table::Attribute::Bold),
            Cell::new("Release").add_attribute(comfy_table::Attribute::Bold),
        ])
        .load_preset(comfy_table::presets::UTF8_FULL)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS)
        .set_content_arrangement(comfy_table::ContentArrangement::Dynamic);

    for report in reports {
        let (label, color) = match &report.state {
            CheckState::Released => ("released".to_string(), Color::Green),
            CheckState::Missing => ("missing".to_string(), Color::Yellow),
            CheckState::Unknown { message } => (format!("unknown: {}", message), Color::Red),
        };
        table.add_row(vec![
            Cell::new(&report.version),
            Cell::new(&report.tag),
            Cell::new(label).fg(color),
        ]);
    }

    table
}

/// 1 if any lookup stayed unknown, 0 otherwise
pub fn check_exit_code(reports: &[CheckReport]) -> i32 {
    if reports
        .iter()
        .any(|r| matches!(r.state, CheckState::Unknown { .. }))
    {
        1
    } else {
        0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.to_table())?;
        write!(
            f,
            "{}: {} succeeded, {} skipped, {} failed of {} in {}ms",
            self.package,
            self.succeeded(),
            self.skipped(),
            self.failed(),
            self.reports.len(),
            self.duration_ms()
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        if let Some(abort) = &self.aborted {
            write!(
                f,
                " (aborted at {}, remaining versions not processed)",
                abort.version
            )?;
        }
        Ok(())
    }
}
