//! Loading the raw record set.
//!
//! Any failure to read the source at all is reported as
//! [`StarError::SourceUnavailable`]; column-level problems are left to
//! [`crate::normalize`].

use crate::config::{DbSettings, SourceConfig};
use crate::error::{Result, StarError};
use crate::sink::postgres::quote_ident;
use calamine::{Data, Reader as _, open_workbook_auto};
use polars::prelude::*;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres, Row as _};
use std::path::Path;

/// Read the configured source into a frame with its raw headers.
///
/// # Errors
///
/// Returns [`StarError::SourceUnavailable`] when the file or table cannot be
/// read.
pub async fn load_raw(source: &SourceConfig, db: &DbSettings) -> Result<DataFrame> {
    let df = match source {
        SourceConfig::File { path } => load_file(path)?,
        SourceConfig::Postgres { schema, table } => {
            let pool = PgPoolOptions::new()
                .max_connections(1)
                .acquire_timeout(std::time::Duration::from_secs(10))
                .connect_with(db.connect_options())
                .await
                .map_err(|e| {
                    StarError::SourceUnavailable(format!("cannot connect to {}: {e}", db.describe()))
                })?;
            let df = load_table(&pool, schema, table).await;
            pool.close().await;
            df?
        }
    };
    tracing::info!(rows = df.height(), columns = df.width(), "Raw record set loaded");
    Ok(df)
}

/// Read an Excel workbook, CSV, Parquet or JSON file, chosen by extension.
///
/// # Errors
///
/// Returns [`StarError::SourceUnavailable`] for missing or unreadable files
/// and unsupported extensions.
pub fn load_file(path: &Path) -> Result<DataFrame> {
    let unavailable =
        |e: &dyn std::fmt::Display| StarError::SourceUnavailable(format!("{}: {e}", path.display()));

    if !path.is_file() {
        return Err(unavailable(&"file not found"));
    }

    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();

    let open = || std::fs::File::open(path).map_err(|e| unavailable(&e));
    let df = match ext.as_str() {
        "csv" => LazyCsvReader::new(path)
            .with_infer_schema_length(Some(10_000))
            .with_has_header(true)
            .finish()
            .and_then(LazyFrame::collect),
        "parquet" => ParquetReader::new(open()?).finish(),
        "json" => JsonReader::new(open()?).finish(),
        "xlsx" | "xlsm" | "xls" | "ods" => return load_workbook(path),
        _ => return Err(unavailable(&format!("unsupported file extension '{ext}'"))),
    };
    df.map_err(|e| unavailable(&e))
}

/// Read the first worksheet. The first row holds the headers and every cell
/// becomes text, typed later the same way as the other sources.
fn load_workbook(path: &Path) -> Result<DataFrame> {
    let unavailable =
        |e: &dyn std::fmt::Display| StarError::SourceUnavailable(format!("{}: {e}", path.display()));

    let mut workbook = open_workbook_auto(path).map_err(|e| unavailable(&e))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| unavailable(&"workbook has no worksheets"))?
        .map_err(|e| unavailable(&e))?;

    let mut rows = range.rows();
    let header = rows.next().ok_or_else(|| unavailable(&"worksheet is empty"))?;
    let names: Vec<String> = header
        .iter()
        .enumerate()
        .map(|(idx, cell)| cell_text(cell).unwrap_or_else(|| format!("column_{}", idx + 1)))
        .collect();

    let height = range.height().saturating_sub(1);
    let mut values: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(height); names.len()];
    for row in rows {
        for (idx, column) in values.iter_mut().enumerate() {
            column.push(row.get(idx).and_then(cell_text));
        }
    }

    tracing::debug!(path = %path.display(), rows = height, "Worksheet read");
    text_frame(&names, values)
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_owned())
        }
        Data::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(format!("{f:.0}")),
        Data::Float(f) => Some(f.to_string()),
        Data::Int(i) => Some(i.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => dt.as_datetime().map(|dt| {
            if dt.time() == chrono::NaiveTime::MIN {
                dt.format("%Y-%m-%d").to_string()
            } else {
                dt.format("%Y-%m-%d %H:%M:%S").to_string()
            }
        }),
        Data::Error(_) | Data::Empty => None,
    }
}

fn text_frame(names: &[String], values: Vec<Vec<Option<String>>>) -> Result<DataFrame> {
    let series: Vec<Column> = names
        .iter()
        .zip(values)
        .map(|(name, vals)| Column::from(Series::new(name.as_str().into(), vals)))
        .collect();
    Ok(DataFrame::new(series)?)
}

/// Read a table with every column cast to text. Typing happens later, the
/// same way it does for files.
///
/// # Errors
///
/// Returns [`StarError::SourceUnavailable`] when the table does not exist or
/// the query fails.
pub async fn load_table(pool: &Pool<Postgres>, schema: &str, table: &str) -> Result<DataFrame> {
    let unavailable =
        |e: &dyn std::fmt::Display| StarError::SourceUnavailable(format!("{schema}.{table}: {e}"));

    let columns: Vec<String> = sqlx::query_scalar(
        "SELECT column_name::text FROM information_schema.columns \
         WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
    )
    .bind(schema)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| unavailable(&e))?;

    if columns.is_empty() {
        return Err(unavailable(&"table not found"));
    }

    let select_list = columns
        .iter()
        .map(|c| format!("{}::text", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let query = format!(
        "SELECT {select_list} FROM {}.{}",
        quote_ident(schema),
        quote_ident(table)
    );
    let rows = sqlx::query(&query)
        .fetch_all(pool)
        .await
        .map_err(|e| unavailable(&e))?;

    let mut values: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(rows.len()); columns.len()];
    for row in &rows {
        for (idx, column) in values.iter_mut().enumerate() {
            let value: Option<String> = row.try_get(idx).map_err(|e| unavailable(&e))?;
            column.push(value);
        }
    }

    text_frame(&columns, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_missing_file_is_unavailable() {
        let err = load_file(Path::new("/definitely/not/here.csv"));
        assert!(matches!(err, Err(StarError::SourceUnavailable(_))));
    }

    #[test]
    fn test_unsupported_extension_is_unavailable() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sales.txt");
        std::fs::write(&path, b"Retailer\nWalmart\n")?;
        let err = load_file(&path);
        assert!(
            matches!(err, Err(StarError::SourceUnavailable(ref msg)) if msg.contains("unsupported"))
        );
        Ok(())
    }

    #[test]
    fn test_workbook_reads_first_sheet_as_text() -> Result<()> {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata/sales_small.xlsx");
        let df = load_file(&path)?;
        assert_eq!(df.height(), 5);
        assert_eq!(df.width(), 13);

        let header: Vec<_> = df.get_column_names().iter().map(|n| n.to_string()).collect();
        assert_eq!(header.get(10).map(String::as_str), Some("Operating Proft"));

        let text = |name: &str| -> Result<Vec<Option<String>>> {
            Ok(df
                .column(name)?
                .str()?
                .into_iter()
                .map(|v| v.map(ToOwned::to_owned))
                .collect())
        };
        assert_eq!(text("Retailer ID")?.first().cloned().flatten().as_deref(), Some("1185732"));
        assert_eq!(text("Invoice Date")?.first().cloned().flatten().as_deref(), Some("2020-01-01"));
        assert_eq!(text("Total Sales")?.get(2).cloned().flatten().as_deref(), Some("$450,000"));
        Ok(())
    }

    #[test]
    fn test_corrupt_workbook_is_unavailable() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sales.xlsx");
        std::fs::write(&path, b"not really a workbook")?;
        assert!(matches!(
            load_file(&path),
            Err(StarError::SourceUnavailable(_))
        ));
        Ok(())
    }

    #[test]
    fn test_csv_keeps_raw_headers() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sales.csv");
        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "Retailer,Retailer ID,Operating Proft")?;
        writeln!(file, "Foot Locker,1185732,\"$1,200\"")?;
        drop(file);

        let df = load_file(&path)?;
        assert_eq!(df.height(), 1);
        let names: Vec<_> = df.get_column_names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["Retailer", "Retailer ID", "Operating Proft"]);
        Ok(())
    }
}
