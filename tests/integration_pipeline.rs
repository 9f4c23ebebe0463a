//! End-to-end runs over the fixture in `testdata/`.
//!
//! The fixture has 12 rows across 5 retailers, 4 regions, 7 states and 9
//! cities (two of them named Portland, in different states). Row 9 has no
//! city and cannot be resolved.

use polars::prelude::*;
use starload::config::{DbSettings, PipelineConfig};
use starload::dimension::KeyOrder;
use starload::error::Result;
use starload::ingest::{RAW_TABLE, ingest_raw};
use starload::model::TableKind;
use starload::pipeline::{self, TransformOptions};
use starload::sink::{DirectorySink, FileFormat, MemorySink};
use starload::source::load_file;
use starload::summary::{RunStatus, TableOutcome};
use starload::tables::date_values;
use std::path::Path;

const FIXTURE: &str = "testdata/sales_small.csv";
const WORKBOOK: &str = "testdata/sales_small.xlsx";

fn lenient() -> TransformOptions {
    TransformOptions {
        max_unresolved_ratio: 0.1,
        ..TransformOptions::default()
    }
}

fn strings(df: &DataFrame, column: &str) -> PolarsResult<Vec<String>> {
    Ok(df
        .column(column)?
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_owned)
        .collect())
}

fn ints(df: &DataFrame, column: &str) -> PolarsResult<Vec<i64>> {
    Ok(df.column(column)?.i64()?.into_iter().flatten().collect())
}

#[tokio::test]
async fn test_fixture_builds_star_schema() -> Result<()> {
    let raw = load_file(Path::new(FIXTURE))?;
    let sink = MemorySink::new();
    let summary = pipeline::run(raw, &lenient(), &sink).await?;

    assert_eq!(summary.status, RunStatus::Partial, "row 9 is excluded");
    assert_eq!(summary.input_rows, 12);
    assert_eq!(summary.fact_rows, 11);
    assert_eq!(summary.tables_written(), 7);
    assert_eq!(
        summary.exclusions.example_rows.get(&TableKind::City),
        Some(&vec![9])
    );

    let rows = |table: TableKind| sink.table(table.name()).map(|df| df.height());
    assert_eq!(rows(TableKind::Retailer), Some(5));
    assert_eq!(rows(TableKind::Region), Some(4));
    assert_eq!(rows(TableKind::State), Some(7));
    assert_eq!(rows(TableKind::City), Some(9));
    assert_eq!(rows(TableKind::Product), Some(6));
    assert_eq!(rows(TableKind::SalesMethod), Some(3));
    assert_eq!(rows(TableKind::SalesTransaction), Some(11));

    let regions = sink.table("region").expect("region written");
    assert_eq!(ints(&regions, "region_id")?, vec![1, 2, 3, 4]);
    assert_eq!(
        strings(&regions, "region_name")?,
        vec!["Midwest", "Northeast", "South", "West"]
    );

    let facts = sink.table("sales_transaction").expect("facts written");
    let ids = ints(&facts, "transaction_id")?;
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7, 8, 10, 11, 12]);
    Ok(())
}

#[tokio::test]
async fn test_same_city_name_in_two_states() -> Result<()> {
    let raw = load_file(Path::new(FIXTURE))?;
    let sink = MemorySink::new();
    pipeline::run(raw, &lenient(), &sink).await?;

    let cities = sink.table("city").expect("city written");
    let names = strings(&cities, "city_name")?;
    let state_ids = ints(&cities, "state_id")?;
    let portland_states: Vec<_> = names
        .iter()
        .zip(&state_ids)
        .filter(|(name, _)| name.as_str() == "Portland")
        .map(|(_, state)| *state)
        .collect();

    assert_eq!(portland_states.len(), 2);
    assert_ne!(portland_states.first(), portland_states.last());
    Ok(())
}

#[tokio::test]
async fn test_measures_and_dates_are_coerced() -> Result<()> {
    let raw = load_file(Path::new(FIXTURE))?;
    let sink = MemorySink::new();
    pipeline::run(raw, &lenient(), &sink).await?;

    let facts = sink.table("sales_transaction").expect("facts written");
    let dates = date_values(&facts, "invoice_date")?;
    assert_eq!(dates.first().copied().flatten(), chrono::NaiveDate::from_ymd_opt(2020, 1, 1));

    let totals: Vec<_> = facts.column("total_sales")?.f64()?.into_iter().collect();
    assert_eq!(totals.first().copied().flatten(), Some(600_000.0));
    let margins: Vec<_> = facts.column("operating_margin")?.f64()?.into_iter().collect();
    assert_eq!(margins.first().copied().flatten(), Some(0.5));

    let products = sink.table("product").expect("product written");
    let prices: Vec<_> = products.column("price_per_unit")?.f64()?.into_iter().flatten().collect();
    assert!(prices.iter().all(|p| (40.0..=60.0).contains(p)));
    Ok(())
}

#[tokio::test]
async fn test_default_threshold_fails_without_writing() -> Result<()> {
    let raw = load_file(Path::new(FIXTURE))?;
    let sink = MemorySink::new();
    let summary = pipeline::run(raw, &TransformOptions::default(), &sink).await?;

    assert_eq!(summary.status, RunStatus::Failed);
    assert!(summary.aborted.is_some());
    assert!(
        summary
            .tables
            .values()
            .all(|o| matches!(o, TableOutcome::Skipped { .. }))
    );
    assert!(sink.table_names().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_runs_are_deterministic() -> Result<()> {
    let first = MemorySink::new();
    let second = MemorySink::new();
    pipeline::run(load_file(Path::new(FIXTURE))?, &lenient(), &first).await?;
    pipeline::run(load_file(Path::new(FIXTURE))?, &lenient(), &second).await?;

    for table in TableKind::ALL {
        let a = first.table(table.name()).expect("first run wrote table");
        let b = second.table(table.name()).expect("second run wrote table");
        assert!(a.equals_missing(&b), "{table} differs between runs");
    }
    Ok(())
}

#[tokio::test]
async fn test_first_seen_key_order() -> Result<()> {
    let options = TransformOptions {
        key_order: KeyOrder::FirstSeen,
        ..lenient()
    };
    let sink = MemorySink::new();
    pipeline::run(load_file(Path::new(FIXTURE))?, &options, &sink).await?;

    let regions = sink.table("region").expect("region written");
    assert_eq!(
        strings(&regions, "region_name")?,
        vec!["Northeast", "South", "West", "Midwest"]
    );
    let methods = sink.table("sales_method").expect("sales_method written");
    assert_eq!(
        strings(&methods, "method_name")?,
        vec!["In-store", "Outlet", "Online"]
    );
    Ok(())
}

#[tokio::test]
async fn test_directory_sink_writes_one_file_per_table() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let sink = DirectorySink::new(dir.path(), FileFormat::Csv);

    pipeline::run(load_file(Path::new(FIXTURE))?, &lenient(), &sink).await?;
    let first = std::fs::read_to_string(sink.path_for("city"))?;
    pipeline::run(load_file(Path::new(FIXTURE))?, &lenient(), &sink).await?;
    let second = std::fs::read_to_string(sink.path_for("city"))?;

    for table in TableKind::ALL {
        assert!(sink.path_for(table.name()).is_file(), "{table} file missing");
    }
    assert_eq!(first, second);
    assert!(first.starts_with("city_id,city_name,state_id"));
    Ok(())
}

#[tokio::test]
async fn test_config_driven_parquet_run() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("star");
    let json = serde_json::json!({
        "source": {"type": "file", "path": FIXTURE},
        "sink": {"type": "directory", "path": out, "format": "parquet"},
        "max_unresolved_ratio": 0.2
    });
    let config = PipelineConfig::from_json(&json.to_string())?;

    let summary = pipeline::run_configured(&config, &DbSettings::default()).await?;
    assert_eq!(summary.tables_written(), 7);

    let file = std::fs::File::open(out.join("sales_transaction.parquet"))?;
    let facts = ParquetReader::new(file).finish()?;
    assert_eq!(facts.height(), 11);
    assert_eq!(facts.column("invoice_date")?.dtype(), &DataType::Date);
    Ok(())
}

#[tokio::test]
async fn test_workbook_source_builds_star_schema() -> Result<()> {
    let raw = load_file(Path::new(WORKBOOK))?;
    let sink = MemorySink::new();
    let summary = pipeline::run(raw, &TransformOptions::default(), &sink).await?;

    assert_eq!(summary.status, RunStatus::Success);
    assert_eq!(summary.fact_rows, 5);
    let rows = |table: TableKind| sink.table(table.name()).map(|df| df.height());
    assert_eq!(rows(TableKind::Retailer), Some(3));
    assert_eq!(rows(TableKind::State), Some(4));
    assert_eq!(rows(TableKind::City), Some(4));

    let facts = sink.table("sales_transaction").expect("facts written");
    let dates = date_values(&facts, "invoice_date")?;
    assert_eq!(dates.get(2).copied().flatten(), chrono::NaiveDate::from_ymd_opt(2020, 1, 4));
    let totals: Vec<_> = facts.column("total_sales")?.f64()?.into_iter().flatten().collect();
    assert_eq!(totals.get(2), Some(&450_000.0));
    let margins: Vec<_> = facts.column("operating_margin")?.f64()?.into_iter().flatten().collect();
    assert_eq!(margins.get(2), Some(&0.35));
    Ok(())
}

#[tokio::test]
async fn test_workbook_ingest_types_raw_columns() -> Result<()> {
    let sink = MemorySink::new();
    let rows = ingest_raw(Path::new(WORKBOOK), &sink).await?;
    assert_eq!(rows, 5);

    let raw = sink.table(RAW_TABLE).expect("raw table written");
    assert_eq!(raw.column("Invoice Date")?.dtype(), &DataType::Date);
    assert_eq!(raw.column("Units Sold")?.dtype(), &DataType::Int64);
    assert_eq!(ints(&raw, "Units Sold")?, vec![1200, 1000, 900, 200, 100]);
    assert_eq!(strings(&raw, "Retailer ID")?.first().map(String::as_str), Some("1185732"));
    Ok(())
}
