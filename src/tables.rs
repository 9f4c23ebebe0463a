//! Output table layouts and their Polars materialisation.
//!
//! Each table is written with a declared column-type map ([`TableSchema`]).
//! Sinks translate [`ColumnType`] into their own types (SQL DDL, Parquet
//! schema), so the frames handed to them must already match it.

use crate::dimension::Dimensions;
use crate::error::{Result, StarError};
use crate::model::{FactRow, TableKind};
use crate::normalize::{
    date_from_epoch_days, epoch_days_from_date, exact_integer, parse_date, parse_number,
};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Integer,
    Number,
    Date,
}

impl ColumnType {
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "BIGINT",
            Self::Number => "DOUBLE PRECISION",
            Self::Date => "DATE",
        }
    }

    pub fn dtype(self) -> DataType {
        match self {
            Self::Text => DataType::String,
            Self::Integer => DataType::Int64,
            Self::Number => DataType::Float64,
            Self::Date => DataType::Date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
        }
    }

    pub fn key(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            primary_key: true,
            ..Self::new(name, column_type)
        }
    }
}

/// A named table with its declared column-type map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn primary_key(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// Select the declared columns from `df`, in declared order, coerced to
    /// their declared types. Values that cannot be coerced become null.
    ///
    /// # Errors
    ///
    /// Returns [`StarError::SchemaMismatch`] if a declared column is missing.
    pub fn conform(&self, df: &DataFrame) -> Result<DataFrame> {
        let columns = self
            .columns
            .iter()
            .map(|def| {
                let series = df
                    .column(&def.name)
                    .map_err(|e| {
                        StarError::SchemaMismatch(format!(
                            "table '{}' has no column '{}': {e}",
                            self.name, def.name
                        ))
                    })?
                    .as_materialized_series();
                coerce_series(series, def).map(Column::from)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(DataFrame::new(columns)?)
    }
}

fn coerce_series(series: &Series, def: &ColumnDef) -> Result<Series> {
    if series.dtype() == &def.column_type.dtype() {
        return Ok(series.clone().with_name(def.name.as_str().into()));
    }

    let name: PlSmallStr = def.name.as_str().into();
    let coerced = match def.column_type {
        ColumnType::Text => series.cast(&DataType::String)?,
        ColumnType::Number => as_numbers(series)?,
        ColumnType::Integer => {
            let numbers = as_numbers(series)?;
            let mut inexact = 0_usize;
            let ints: Vec<Option<i64>> = numbers
                .f64()?
                .into_iter()
                .map(|v| {
                    let v = v?;
                    let int = exact_integer(v);
                    if int.is_none() {
                        inexact += 1;
                    }
                    int
                })
                .collect();
            if inexact > 0 {
                tracing::warn!(column = %def.name, failed = inexact, "Non-integral or out-of-range values were nulled");
            }
            Series::new(name.clone(), ints)
        }
        ColumnType::Date => as_dates(series)?,
    };
    Ok(coerced.with_name(name))
}

fn as_numbers(series: &Series) -> Result<Series> {
    if series.dtype().is_primitive_numeric() {
        return Ok(series.cast(&DataType::Float64)?);
    }
    let strings = series.cast(&DataType::String)?;
    let values: Vec<Option<f64>> = strings
        .str()?
        .into_iter()
        .map(|v| v.and_then(parse_number))
        .collect();
    Ok(Series::new(series.name().clone(), values))
}

fn as_dates(series: &Series) -> Result<Series> {
    match series.dtype() {
        DataType::Date => Ok(series.clone()),
        DataType::Datetime(_, _) => Ok(series.cast(&DataType::Date)?),
        _ => {
            let strings = series.cast(&DataType::String)?;
            let days: Vec<Option<i32>> = strings
                .str()?
                .into_iter()
                .map(|v| v.and_then(parse_date).and_then(epoch_days_from_date))
                .collect();
            date_series(series.name().as_str(), days)
        }
    }
}

fn date_series(name: &str, days: Vec<Option<i32>>) -> Result<Series> {
    Ok(Series::new(name.into(), days).cast(&DataType::Date)?)
}

impl TableKind {
    /// Declared column-type map, in output column order.
    pub fn schema(self) -> TableSchema {
        use ColumnType::{Date, Integer, Number, Text};

        let columns = match self {
            Self::Retailer => vec![
                ColumnDef::key("retailer_id", Text),
                ColumnDef::new("retailer_name", Text),
            ],
            Self::Region => vec![
                ColumnDef::key("region_id", Integer),
                ColumnDef::new("region_name", Text),
            ],
            Self::State => vec![
                ColumnDef::key("state_id", Integer),
                ColumnDef::new("state_name", Text),
                ColumnDef::new("region_id", Integer),
            ],
            Self::City => vec![
                ColumnDef::key("city_id", Integer),
                ColumnDef::new("city_name", Text),
                ColumnDef::new("state_id", Integer),
            ],
            Self::Product => vec![
                ColumnDef::key("product_id", Integer),
                ColumnDef::new("product_name", Text),
                ColumnDef::new("price_per_unit", Number),
            ],
            Self::SalesMethod => vec![
                ColumnDef::key("sales_method_id", Integer),
                ColumnDef::new("method_name", Text),
            ],
            Self::SalesTransaction => vec![
                ColumnDef::key("transaction_id", Integer),
                ColumnDef::new("retailer_id", Text),
                ColumnDef::new("invoice_date", Date),
                ColumnDef::new("city_id", Integer),
                ColumnDef::new("product_id", Integer),
                ColumnDef::new("units_sold", Integer),
                ColumnDef::new("total_sales", Number),
                ColumnDef::new("operating_profit", Number),
                ColumnDef::new("operating_margin", Number),
                ColumnDef::new("sales_method_id", Integer),
                ColumnDef::new("region_id", Integer),
            ],
        };
        TableSchema::new(self.name(), columns)
    }
}

/// The full output of one transformation run, held in memory until written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StarSchema {
    pub dimensions: Dimensions,
    pub facts: Vec<FactRow>,
}

impl StarSchema {
    pub fn row_count(&self, table: TableKind) -> usize {
        match table {
            TableKind::SalesTransaction => self.facts.len(),
            dim => self.dimensions.row_count(dim),
        }
    }

    /// Materialise one table as a frame matching [`TableKind::schema`].
    ///
    /// # Errors
    ///
    /// Propagates Polars errors from frame construction.
    pub fn to_frame(&self, table: TableKind) -> Result<DataFrame> {
        let d = &self.dimensions;
        let columns: Vec<Series> = match table {
            TableKind::Retailer => vec![
                text("retailer_id", d.retailers.iter().map(|r| Some(r.retailer_id.as_str()))),
                text("retailer_name", d.retailers.iter().map(|r| r.retailer_name.as_deref())),
            ],
            TableKind::Region => vec![
                ints("region_id", d.regions.iter().map(|r| Some(r.region_id))),
                text("region_name", d.regions.iter().map(|r| Some(r.region_name.as_str()))),
            ],
            TableKind::State => vec![
                ints("state_id", d.states.iter().map(|s| Some(s.state_id))),
                text("state_name", d.states.iter().map(|s| Some(s.state_name.as_str()))),
                ints("region_id", d.states.iter().map(|s| Some(s.region_id))),
            ],
            TableKind::City => vec![
                ints("city_id", d.cities.iter().map(|c| Some(c.city_id))),
                text("city_name", d.cities.iter().map(|c| Some(c.city_name.as_str()))),
                ints("state_id", d.cities.iter().map(|c| Some(c.state_id))),
            ],
            TableKind::Product => vec![
                ints("product_id", d.products.iter().map(|p| Some(p.product_id))),
                text("product_name", d.products.iter().map(|p| Some(p.product_name.as_str()))),
                floats("price_per_unit", d.products.iter().map(|p| p.price_per_unit)),
            ],
            TableKind::SalesMethod => vec![
                ints("sales_method_id", d.sales_methods.iter().map(|m| Some(m.sales_method_id))),
                text("method_name", d.sales_methods.iter().map(|m| Some(m.method_name.as_str()))),
            ],
            TableKind::SalesTransaction => {
                let f = &self.facts;
                let days: Vec<Option<i32>> = f
                    .iter()
                    .map(|r| r.invoice_date.and_then(epoch_days_from_date))
                    .collect();
                vec![
                    ints("transaction_id", f.iter().map(|r| Some(r.transaction_id))),
                    text("retailer_id", f.iter().map(|r| Some(r.retailer_id.as_str()))),
                    date_series("invoice_date", days)?,
                    ints("city_id", f.iter().map(|r| Some(r.city_id))),
                    ints("product_id", f.iter().map(|r| Some(r.product_id))),
                    ints("units_sold", f.iter().map(|r| r.units_sold)),
                    floats("total_sales", f.iter().map(|r| r.total_sales)),
                    floats("operating_profit", f.iter().map(|r| r.operating_profit)),
                    floats("operating_margin", f.iter().map(|r| r.operating_margin)),
                    ints("sales_method_id", f.iter().map(|r| Some(r.sales_method_id))),
                    ints("region_id", f.iter().map(|r| Some(r.region_id))),
                ]
            }
        };

        let df = DataFrame::new(columns.into_iter().map(Column::from).collect())?;
        Ok(df)
    }
}

fn text<'a>(name: &str, values: impl Iterator<Item = Option<&'a str>>) -> Series {
    Series::new(name.into(), values.collect::<Vec<_>>())
}

fn ints(name: &str, values: impl Iterator<Item = Option<i64>>) -> Series {
    Series::new(name.into(), values.collect::<Vec<_>>())
}

fn floats(name: &str, values: impl Iterator<Item = Option<f64>>) -> Series {
    Series::new(name.into(), values.collect::<Vec<_>>())
}

/// Read a `Date` column back into calendar dates.
///
/// # Errors
///
/// Fails if the column is missing or is not date-typed.
pub fn date_values(df: &DataFrame, name: &str) -> Result<Vec<Option<chrono::NaiveDate>>> {
    let physical = df
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::Int32)?;
    Ok(physical
        .i32()?
        .into_iter()
        .map(|d| d.and_then(date_from_epoch_days))
        .collect())
}
