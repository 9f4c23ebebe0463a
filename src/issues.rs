//! Non-fatal data-quality issues collected during a run.
//!
//! Issues never abort a run. They are aggregated into an [`IssueSummary`]
//! (counts plus a handful of examples) for the run report.

use crate::model::TableKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Examples kept per issue category in a summary.
pub const MAX_EXAMPLES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    /// A fact row found no matching row in `table` for `key`.
    UnresolvedForeignKey {
        row: usize,
        table: TableKind,
        key: String,
    },

    /// The same natural key appeared with a different attribute value.
    /// The first-seen value was kept.
    DuplicateNaturalKeyConflict {
        table: TableKind,
        key: String,
        attribute: &'static str,
        kept: String,
        discarded: String,
        row: usize,
    },

    /// Some (but not all) values of a column could not be coerced and became null.
    CoercionFailure {
        column: &'static str,
        rows: usize,
        example: String,
    },
}

impl Issue {
    /// Category label used for aggregation.
    pub fn category(&self) -> String {
        match self {
            Self::UnresolvedForeignKey { table, .. } => format!("unresolved_foreign_key.{table}"),
            Self::DuplicateNaturalKeyConflict { table, .. } => {
                format!("duplicate_natural_key_conflict.{table}")
            }
            Self::CoercionFailure { column, .. } => format!("coercion_failure.{column}"),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedForeignKey { row, table, key } => {
                write!(f, "row {row}: no {table} matches {key}")
            }
            Self::DuplicateNaturalKeyConflict {
                table,
                key,
                attribute,
                kept,
                discarded,
                row,
            } => write!(
                f,
                "{table} '{key}': {attribute} {discarded} at row {row} conflicts with {kept} (kept {kept})"
            ),
            Self::CoercionFailure {
                column,
                rows,
                example,
            } => write!(f, "{column}: {rows} value(s) not coercible, e.g. '{example}'"),
        }
    }
}

/// Per-category counts with the first few rendered examples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssueSummary {
    pub counts: BTreeMap<String, usize>,
    pub examples: BTreeMap<String, Vec<String>>,
}

impl IssueSummary {
    pub fn from_issues(issues: &[Issue]) -> Self {
        let mut summary = Self::default();
        for issue in issues {
            summary.record(issue);
        }
        summary
    }

    pub fn record(&mut self, issue: &Issue) {
        let category = issue.category();
        *self.counts.entry(category.clone()).or_default() += 1;
        let examples = self.examples.entry(category).or_default();
        if examples.len() < MAX_EXAMPLES {
            examples.push(issue.to_string());
        }
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
