//! Run summary reported after every transformation run.

use crate::fact::ExcludedRow;
use crate::issues::{IssueSummary, MAX_EXAMPLES};
use crate::model::TableKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// What happened to one output table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TableOutcome {
    Written { rows: usize },
    Failed { message: String },
    Skipped { reason: String },
}

impl TableOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every table written and no row excluded.
    Success,
    /// Something was written, but rows were excluded or a table is missing.
    Partial,
    /// Nothing was written.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "succeeded",
            Self::Partial => "partially succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Rows left out of the fact table, per dimension that failed to resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Exclusions {
    pub total: usize,
    pub by_table: BTreeMap<TableKind, usize>,
    /// Up to [`MAX_EXAMPLES`] input row numbers per dimension.
    pub example_rows: BTreeMap<TableKind, Vec<usize>>,
}

impl Exclusions {
    pub fn from_excluded(rows: &[ExcludedRow]) -> Self {
        let mut out = Self {
            total: rows.len(),
            ..Self::default()
        };
        for row in rows {
            for table in &row.unresolved {
                *out.by_table.entry(*table).or_default() += 1;
                let examples = out.example_rows.entry(*table).or_default();
                if examples.len() < MAX_EXAMPLES {
                    examples.push(row.row);
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub input_rows: usize,
    pub fact_rows: usize,
    pub exclusions: Exclusions,
    pub issues: IssueSummary,
    pub tables: BTreeMap<TableKind, TableOutcome>,
    /// Reason the run stopped before writing, if it did.
    pub aborted: Option<String>,
    pub duration: Duration,
}

impl RunSummary {
    /// Derive the overall status from the table outcomes.
    pub fn settle(&mut self) {
        let written = self.tables.values().filter(|o| o.is_written()).count();
        self.status = if self.aborted.is_some() || written == 0 {
            RunStatus::Failed
        } else if written == TableKind::ALL.len() && self.exclusions.total == 0 {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };
    }

    pub fn tables_written(&self) -> usize {
        self.tables.values().filter(|o| o.is_written()).count()
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        format!(
            "Run {}: {} input rows, {} fact rows, {} excluded, {}/{} tables written, {} issues, {:.2}s",
            self.status,
            self.input_rows,
            self.fact_rows,
            self.exclusions.total,
            self.tables_written(),
            TableKind::ALL.len(),
            self.issues.total(),
            self.duration.as_secs_f64()
        )
    }

    /// Emit the summary and per-table outcomes as log events.
    pub fn log(&self) {
        for (table, outcome) in &self.tables {
            match outcome {
                TableOutcome::Written { rows } => {
                    tracing::info!(table = %table, rows, "Table written");
                }
                TableOutcome::Failed { message } => {
                    tracing::error!(table = %table, error = %message, "Table write failed");
                }
                TableOutcome::Skipped { reason } => {
                    tracing::warn!(table = %table, reason = %reason, "Table skipped");
                }
            }
        }
        for (category, count) in &self.issues.counts {
            let examples = self
                .issues
                .examples
                .get(category)
                .map(|e| e.join("; "))
                .unwrap_or_default();
            tracing::warn!(category = %category, count, examples = %examples, "Data issues");
        }
        if let Some(reason) = &self.aborted {
            tracing::error!(reason = %reason, "Run aborted before writing");
        }

        match self.status {
            RunStatus::Success => tracing::info!("{}", self.summary()),
            RunStatus::Partial => tracing::warn!("{}", self.summary()),
            RunStatus::Failed => tracing::error!("{}", self.summary()),
        }
    }
}
