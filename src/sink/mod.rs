//! Destinations for finished tables.
//!
//! A sink replaces a named table wholesale: after a successful
//! [`TableSink::write_table`] the destination holds exactly the given rows,
//! and readers never see a mix of old and new contents.
//!
//! - [`MemorySink`]: in-process map, used by tests and dry runs
//! - [`DirectorySink`]: one CSV or Parquet file per table
//! - [`PostgresSink`]: staged `COPY` plus rename inside a transaction

pub mod directory;
pub mod memory;
pub mod postgres;

pub use directory::{DirectorySink, FileFormat};
pub use memory::MemorySink;
pub use postgres::PostgresSink;

use crate::config::{DbSettings, SinkConfig};
use crate::error::Result;
use crate::tables::TableSchema;
use polars::prelude::DataFrame;

#[expect(async_fn_in_trait)]
pub trait TableSink {
    /// Replace the contents of `schema.name` with `frame`.
    ///
    /// `frame` already matches the declared column-type map. Returns the
    /// number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::StarError::SinkWriteFailure`] when the
    /// destination rejects the write; the previous contents stay in place.
    async fn write_table(&self, schema: &TableSchema, frame: &DataFrame) -> Result<usize>;

    /// Short human-readable destination description for logs.
    fn describe(&self) -> String;
}

/// Sink chosen at runtime from configuration.
pub enum AnySink {
    Memory(MemorySink),
    Directory(DirectorySink),
    Postgres(PostgresSink),
}

impl AnySink {
    /// Open the configured destination. Postgres sinks connect here, so an
    /// unreachable database fails before any table is built.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::StarError::Database`] when the connection fails.
    pub async fn open(config: &SinkConfig, db: &DbSettings) -> Result<Self> {
        Ok(match config {
            SinkConfig::Memory => Self::Memory(MemorySink::new()),
            SinkConfig::Directory { path, format } => {
                Self::Directory(DirectorySink::new(path.clone(), *format))
            }
            SinkConfig::Postgres { schema } => {
                Self::Postgres(PostgresSink::connect(db.connect_options(), schema.clone()).await?)
            }
        })
    }
}

impl TableSink for AnySink {
    async fn write_table(&self, schema: &TableSchema, frame: &DataFrame) -> Result<usize> {
        match self {
            Self::Memory(sink) => sink.write_table(schema, frame).await,
            Self::Directory(sink) => sink.write_table(schema, frame).await,
            Self::Postgres(sink) => sink.write_table(schema, frame).await,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Memory(sink) => sink.describe(),
            Self::Directory(sink) => sink.describe(),
            Self::Postgres(sink) => sink.describe(),
        }
    }
}
