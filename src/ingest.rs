//! Raw ingestion: copy the source workbook export into the raw store.
//!
//! Headers are kept exactly as they appear in the file so the raw table
//! mirrors the source; only the column types are fixed.

use crate::error::{Result, StarError};
use crate::normalize::canonical_column_name;
use crate::sink::TableSink;
use crate::source::load_file;
use crate::tables::{ColumnDef, ColumnType, TableSchema};
use polars::prelude::DataFrame;
use std::path::Path;

pub const RAW_TABLE: &str = "sales_raw";

/// Storage type of a raw column, looked up by its canonical name.
/// Unknown columns are stored as text.
pub fn raw_column_type(raw_name: &str) -> ColumnType {
    match canonical_column_name(raw_name).as_str() {
        "invoice_date" => ColumnType::Date,
        "units_sold" => ColumnType::Integer,
        "price_per_unit" | "total_sales" | "operating_profit" | "operating_margin" => {
            ColumnType::Number
        }
        _ => ColumnType::Text,
    }
}

/// Schema of the raw table for the columns present in `df`.
pub fn raw_schema(df: &DataFrame) -> TableSchema {
    let columns = df
        .get_column_names()
        .into_iter()
        .map(|name| ColumnDef::new(name.as_str(), raw_column_type(name)))
        .collect();
    TableSchema::new(RAW_TABLE, columns)
}

/// Load a file and replace the raw table with its rows.
///
/// # Errors
///
/// Returns [`StarError::SourceUnavailable`] if the file cannot be read,
/// [`StarError::SchemaMismatch`] if it has no rows, and the sink's error if
/// the write fails.
pub async fn ingest_raw<S: TableSink>(path: &Path, sink: &S) -> Result<usize> {
    tracing::info!(path = %path.display(), sink = %sink.describe(), "Ingesting raw file");

    let df = load_file(path)?;
    if df.height() == 0 {
        return Err(StarError::SchemaMismatch(format!(
            "{} contains no rows",
            path.display()
        )));
    }

    let schema = raw_schema(&df);
    let frame = schema.conform(&df)?;
    let rows = sink.write_table(&schema, &frame).await?;

    tracing::info!(rows, table = RAW_TABLE, "Raw ingestion finished");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use polars::prelude::DataType;

    #[test]
    fn test_raw_type_map() {
        assert_eq!(raw_column_type("Invoice Date"), ColumnType::Date);
        assert_eq!(raw_column_type("Units Sold"), ColumnType::Integer);
        assert_eq!(raw_column_type("Operating Proft"), ColumnType::Number);
        assert_eq!(raw_column_type("Retailer ID"), ColumnType::Text);
        assert_eq!(raw_column_type("Notes"), ColumnType::Text);
    }

    #[tokio::test]
    async fn test_ingest_keeps_headers_and_types() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("raw.csv");
        std::fs::write(
            &path,
            "Retailer,Retailer ID,Invoice Date,Units Sold,Total Sales\n\
             Foot Locker,1185732,2020-01-01,1200,\"$600,000\"\n\
             Walmart,1128299,2020-01-02,850,\"$382,500\"\n",
        )?;

        let sink = MemorySink::new();
        let rows = ingest_raw(&path, &sink).await?;
        assert_eq!(rows, 2);

        let table = sink.table(RAW_TABLE).expect("raw table written");
        assert_eq!(table.column("Retailer ID")?.dtype(), &DataType::String);
        assert_eq!(table.column("Invoice Date")?.dtype(), &DataType::Date);
        assert_eq!(table.column("Units Sold")?.dtype(), &DataType::Int64);
        let totals: Vec<_> = table.column("Total Sales")?.f64()?.into_iter().collect();
        assert_eq!(totals, vec![Some(600_000.0), Some(382_500.0)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_writes_nothing() {
        let sink = MemorySink::new();
        let err = ingest_raw(Path::new("/nope/raw.csv"), &sink).await;
        assert!(matches!(err, Err(StarError::SourceUnavailable(_))));
        assert!(sink.table_names().is_empty());
    }
}
