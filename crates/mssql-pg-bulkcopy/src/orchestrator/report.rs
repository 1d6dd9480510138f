//! Per-table outcomes and the run report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::baseline::BaselineCounts;
use crate::error::Result;
use crate::materialize::KeySource;
use crate::quality::QualityReport;
use crate::transfer::MigrationResult;

/// Step at which a table failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Materialize,
    Migrate,
}

/// Why a table was not attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// A table this one depends on did not complete.
    Dependency { parent: String },
    /// The table could not be inspected on the source.
    SchemaLookup { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableOutcome {
    Migrated(MigrationResult),
    Failed { stage: Stage, error: String },
    Skipped { reason: SkipReason },
    Cancelled,
}

impl TableOutcome {
    /// Whether dependents of this table may proceed.
    pub fn completed(&self, strict_verification: bool) -> bool {
        match self {
            TableOutcome::Migrated(result) => result.verified || !strict_verification,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<KeySource>,
    #[serde(flatten)]
    pub outcome: TableOutcome,
}

impl TableReport {
    pub fn new(table: impl Into<String>, outcome: TableOutcome) -> Self {
        Self {
            table: table.into(),
            primary_key: None,
            outcome,
        }
    }

    pub fn with_key(mut self, key: KeySource) -> Self {
        self.primary_key = Some(key);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every table migrated and verified.
    Completed,
    /// At least one table failed, was skipped or did not verify.
    CompletedWithErrors,
    Cancelled,
    /// Stopped after planning and pre-migration checks.
    DryRun,
}

/// Full account of one run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    /// Table names in migration order.
    pub plan: Vec<String>,
    pub baseline: BaselineCounts,
    pub pre_checks: QualityReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_checks: Option<QualityReport>,
    /// One entry per planned table, in declared order.
    pub tables: Vec<TableReport>,
}

impl MigrationReport {
    pub fn migrated(&self) -> usize {
        self.count(|o| matches!(o, TableOutcome::Migrated(_)))
    }

    pub fn verified(&self) -> usize {
        self.count(|o| matches!(o, TableOutcome::Migrated(r) if r.verified))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TableOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TableOutcome::Skipped { .. }))
    }

    pub fn rows_transferred(&self) -> u64 {
        self.tables
            .iter()
            .filter_map(|t| match &t.outcome {
                TableOutcome::Migrated(r) => Some(r.rows_written),
                _ => None,
            })
            .sum()
    }

    fn count<F: Fn(&TableOutcome) -> bool>(&self, pred: F) -> usize {
        self.tables.iter().filter(|t| pred(&t.outcome)).count()
    }

    /// Derive the run status from table outcomes.
    pub fn derive_status(tables: &[TableReport], cancelled: bool) -> RunStatus {
        if cancelled {
            return RunStatus::Cancelled;
        }
        let all_verified = tables
            .iter()
            .all(|t| matches!(&t.outcome, TableOutcome::Migrated(r) if r.verified));
        if all_verified {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithErrors
        }
    }

    /// Log the final summary.
    pub fn log_summary(&self) {
        for line in self.pre_checks.lines() {
            info!("Pre-migration quality: {}", line.trim_start());
        }
        if let Some(post) = &self.post_checks {
            for line in post.lines() {
                info!("Post-migration quality: {}", line.trim_start());
            }
        }

        for t in &self.tables {
            match &t.outcome {
                TableOutcome::Migrated(r) if r.verified => {
                    info!("{}: {} rows, verified", t.table, r.rows_written)
                }
                TableOutcome::Migrated(r) => warn!(
                    "{}: {} rows written, expected {:?}, target has {:?}",
                    t.table, r.rows_written, r.expected_rows, r.target_rows
                ),
                TableOutcome::Failed { stage, error } => {
                    warn!("{}: failed during {:?}: {}", t.table, stage, error)
                }
                TableOutcome::Skipped { reason } => warn!("{}: skipped ({:?})", t.table, reason),
                TableOutcome::Cancelled => warn!("{}: cancelled", t.table),
            }
        }

        info!(
            "Migration {:?}: {}/{} tables verified, {} failed, {} skipped, {} rows in {:.1}s",
            self.status,
            self.verified(),
            self.tables.len(),
            self.failed(),
            self.skipped(),
            self.rows_transferred(),
            self.duration_seconds
        );
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
