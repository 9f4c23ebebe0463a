//! Transformation run: raw record set in, star schema out.
//!
//! A run has three phases and never interleaves them:
//!
//! 1. **Load**: read the raw record set ([`crate::source`]).
//! 2. **Transform and validate**: normalize, build dimensions, build facts,
//!    check the unresolved-row threshold. Any fatal problem stops the run
//!    here, before the destination is touched.
//! 3. **Write**: hand the tables to a [`TableSink`] level by level, following
//!    [`BuildPlan`]. Tables in the same level are written concurrently; a
//!    table whose dependency failed is skipped, independent tables are still
//!    written.
//!
//! ```no_run
//! use starload::config::{DbSettings, PipelineConfig};
//! use starload::pipeline;
//!
//! # async fn example() -> starload::error::Result<()> {
//! let config = PipelineConfig::from_file("starload.json")?;
//! let summary = pipeline::run_configured(&config, &DbSettings::default()).await?;
//! println!("{}", summary.summary());
//! # Ok(())
//! # }
//! ```

use crate::config::{DbSettings, PipelineConfig};
use crate::dimension::{KeyOrder, build_dimensions};
use crate::error::Result;
use crate::fact::{ExcludedRow, build_facts};
use crate::issues::{Issue, IssueSummary};
use crate::model::TableKind;
use crate::normalize::{RecordSet, extract_records, normalize_columns};
use crate::plan::BuildPlan;
use crate::sink::{AnySink, TableSink};
use crate::source::load_raw;
use crate::summary::{Exclusions, RunStatus, RunSummary, TableOutcome};
use crate::tables::StarSchema;
use futures::future::join_all;
use polars::prelude::DataFrame;
use std::collections::BTreeMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformOptions {
    pub key_order: KeyOrder,
    /// Largest tolerated share of input rows excluded from the fact table.
    pub max_unresolved_ratio: f64,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            key_order: KeyOrder::default(),
            max_unresolved_ratio: crate::config::DEFAULT_MAX_UNRESOLVED_RATIO,
        }
    }
}

impl From<&PipelineConfig> for TransformOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            key_order: config.key_order,
            max_unresolved_ratio: config.max_unresolved_ratio,
        }
    }
}

/// The in-memory result of the transform phase.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub star: StarSchema,
    pub input_rows: usize,
    pub excluded: Vec<ExcludedRow>,
    pub issues: Vec<Issue>,
}

impl Transformed {
    pub fn unresolved_ratio(&self) -> f64 {
        if self.input_rows == 0 {
            return 0.0;
        }
        self.excluded.len() as f64 / self.input_rows as f64
    }
}

/// Build the star schema from a raw record set without writing anything.
///
/// # Errors
///
/// Returns [`crate::error::StarError::SchemaMismatch`] when the input has no
/// rows, or a required column is missing, entirely null or entirely
/// non-coercible.
pub fn transform(raw: DataFrame, options: &TransformOptions) -> Result<Transformed> {
    let df = normalize_columns(raw)?;
    let RecordSet {
        records,
        mut issues,
    } = extract_records(&df)?;
    tracing::debug!(records = records.len(), "Records extracted");

    let dims = build_dimensions(&records, options.key_order)?;
    issues.extend(dims.issues);

    let facts = build_facts(&records, &dims.dimensions);
    issues.extend(facts.issues);

    Ok(Transformed {
        star: StarSchema {
            dimensions: dims.dimensions,
            facts: facts.rows,
        },
        input_rows: records.len(),
        excluded: facts.excluded,
        issues,
    })
}

/// Transform `raw` and write the result to `sink`.
///
/// Fatal input problems are returned as errors. Threshold breaches and
/// per-table write failures are reported in the returned [`RunSummary`].
///
/// # Errors
///
/// See [`transform`].
pub async fn run<S: TableSink>(
    raw: DataFrame,
    options: &TransformOptions,
    sink: &S,
) -> Result<RunSummary> {
    let start = Instant::now();
    let transformed = transform(raw, options)?;

    let mut summary = RunSummary {
        status: RunStatus::Failed,
        input_rows: transformed.input_rows,
        fact_rows: transformed.star.facts.len(),
        exclusions: Exclusions::from_excluded(&transformed.excluded),
        issues: IssueSummary::from_issues(&transformed.issues),
        tables: BTreeMap::new(),
        aborted: None,
        duration: start.elapsed(),
    };

    let ratio = transformed.unresolved_ratio();
    if ratio > options.max_unresolved_ratio {
        let reason = format!(
            "{} of {} rows ({:.1}%) have unresolved foreign keys, above the {:.1}% limit",
            transformed.excluded.len(),
            transformed.input_rows,
            ratio * 100.0,
            options.max_unresolved_ratio * 100.0
        );
        summary.tables = TableKind::ALL
            .iter()
            .map(|t| {
                (
                    *t,
                    TableOutcome::Skipped {
                        reason: "unresolved row threshold exceeded".to_owned(),
                    },
                )
            })
            .collect();
        summary.aborted = Some(reason);
    } else {
        tracing::info!(sink = %sink.describe(), "Writing star schema");
        summary.tables = write_star(&transformed.star, sink).await;
    }

    summary.duration = start.elapsed();
    summary.settle();
    summary.log();
    Ok(summary)
}

/// Write every table of `star` in build-plan order.
pub async fn write_star<S: TableSink>(
    star: &StarSchema,
    sink: &S,
) -> BTreeMap<TableKind, TableOutcome> {
    let plan = BuildPlan::new();
    tracing::debug!("Build plan:\n{plan}");

    let mut outcomes: BTreeMap<TableKind, TableOutcome> = BTreeMap::new();
    for level in plan.levels() {
        let mut ready = Vec::with_capacity(level.len());
        for &table in level {
            let blocked = table
                .depends_on()
                .iter()
                .find(|dep| !outcomes.get(*dep).is_some_and(TableOutcome::is_written));
            match blocked {
                Some(dep) => {
                    outcomes.insert(
                        table,
                        TableOutcome::Skipped {
                            reason: format!("dependency '{dep}' was not written"),
                        },
                    );
                }
                None => ready.push(table),
            }
        }

        let results = join_all(ready.iter().map(|&table| write_one(star, table, sink))).await;
        outcomes.extend(ready.into_iter().zip(results));
    }
    outcomes
}

async fn write_one<S: TableSink>(star: &StarSchema, table: TableKind, sink: &S) -> TableOutcome {
    let schema = table.schema();
    let written = match star.to_frame(table) {
        Ok(frame) => sink.write_table(&schema, &frame).await,
        Err(e) => Err(e),
    };
    match written {
        Ok(rows) => TableOutcome::Written { rows },
        Err(e) => TableOutcome::Failed {
            message: e.to_string(),
        },
    }
}

/// Load the configured source, open the configured sink and run. `db` is
/// the fully resolved connection; only Postgres sources and sinks use it.
///
/// # Errors
///
/// Fails when the source cannot be read, the input is unusable, or the
/// sink cannot be opened.
pub async fn run_configured(config: &PipelineConfig, db: &DbSettings) -> Result<RunSummary> {
    config.validate()?;
    let raw = load_raw(&config.source, db).await?;
    let sink = AnySink::open(&config.sink, db).await?;
    run(raw, &TransformOptions::from(config), &sink).await
}
