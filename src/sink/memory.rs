use super::TableSink;
use crate::error::{Result, StarError};
use crate::tables::TableSchema;
use polars::prelude::DataFrame;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// Keeps written tables in memory. Tables named in `failing` reject writes,
/// which lets tests exercise partial-completion paths.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: Mutex<BTreeMap<String, DataFrame>>,
    failing: BTreeSet<String>,
    writes: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failing: tables.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn table(&self, name: &str) -> Option<DataFrame> {
        let tables = self.tables.lock().ok()?;
        tables.get(name).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables
            .lock()
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Table names in the order their writes completed.
    pub fn write_log(&self) -> Vec<String> {
        self.writes
            .lock()
            .map(|writes| writes.clone())
            .unwrap_or_default()
    }
}

impl TableSink for MemorySink {
    async fn write_table(&self, schema: &TableSchema, frame: &DataFrame) -> Result<usize> {
        if self.failing.contains(&schema.name) {
            return Err(StarError::sink(&schema.name, "rejected by memory sink"));
        }

        let mut tables = self
            .tables
            .lock()
            .map_err(|e| StarError::sink(&schema.name, e))?;
        tables.insert(schema.name.clone(), frame.clone());
        drop(tables);

        if let Ok(mut writes) = self.writes.lock() {
            writes.push(schema.name.clone());
        }
        Ok(frame.height())
    }

    fn describe(&self) -> String {
        "memory".to_owned()
    }
}
