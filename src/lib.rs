//! # starload
//!
//! Loads a flat retail sales record set and reshapes it into a star schema:
//! six dimension tables (`retailer`, `region`, `state`, `city`, `product`,
//! `sales_method`) and one fact table (`sales_transaction`).
//!
//! ## Quick Start
//!
//! ```no_run
//! use starload::pipeline::{self, TransformOptions};
//! use starload::sink::{DirectorySink, FileFormat};
//! use starload::source::load_file;
//!
//! # async fn example() -> starload::error::Result<()> {
//! let raw = load_file("sales.csv".as_ref())?;
//! let sink = DirectorySink::new("out", FileFormat::Parquet);
//! let summary = pipeline::run(raw, &TransformOptions::default(), &sink).await?;
//! println!("{}", summary.summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`normalize`]: canonical column names and typed [`model::SalesRecord`]s
//! - [`plan`]: table dependency graph and build order
//! - [`dimension`]: dimension tables and surrogate keys
//! - [`fact`]: fact rows and foreign-key resolution
//! - [`tables`]: output column-type maps and frames
//! - [`sink`]: table destinations (memory, files, Postgres)
//! - [`source`], [`ingest`]: reading the raw record set and loading the raw store
//! - [`pipeline`], [`summary`]: a full run and its report
//! - [`config`], [`logging`], [`error`]: ambient plumbing
//!
//! ## Determinism
//!
//! Given the same input and [`dimension::KeyOrder`], every run produces the
//! same surrogate keys and the same rows. Transaction ids are input row
//! positions, so rows excluded for unresolved foreign keys leave gaps.

pub mod config;
pub mod dimension;
pub mod error;
pub mod fact;
pub mod ingest;
pub mod issues;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod plan;
pub mod sink;
pub mod source;
pub mod summary;
pub mod tables;

#[cfg(test)]
mod test_support;
