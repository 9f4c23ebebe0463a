//! Column normalization and type coercion for the raw record set.
//!
//! The raw store keeps the spreadsheet headers as-is ("Retailer ID",
//! "Operating Proft", ...). Everything downstream works on canonical
//! snake_case names and typed [`SalesRecord`]s.

use crate::error::{Result, StarError};
use crate::issues::Issue;
use crate::model::SalesRecord;
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::collections::HashMap;

/// Raw header to canonical column name. Matching is case-insensitive and
/// ignores surrounding whitespace.
pub const RAW_RENAMES: [(&str, &str); 14] = [
    ("Retailer", "retailer_name"),
    ("Retailer ID", "retailer_id"),
    ("Invoice Date", "invoice_date"),
    ("Region", "region"),
    ("State", "state"),
    ("City", "city"),
    ("Product", "product"),
    ("Price per Unit", "price_per_unit"),
    ("Units Sold", "units_sold"),
    ("Total Sales", "total_sales"),
    // The source workbook misspells this header.
    ("Operating Proft", "operating_profit"),
    ("Operating Profit", "operating_profit"),
    ("Operating Margin", "operating_margin"),
    ("Sales Method", "sales_method"),
];

pub const REQUIRED_COLUMNS: [&str; 13] = [
    "retailer_name",
    "retailer_id",
    "invoice_date",
    "region",
    "state",
    "city",
    "product",
    "price_per_unit",
    "units_sold",
    "total_sales",
    "operating_profit",
    "operating_margin",
    "sales_method",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%m/%d/%Y %H:%M:%S"];

/// Typed records plus the coercion issues found while extracting them.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    pub records: Vec<SalesRecord>,
    pub issues: Vec<Issue>,
}

impl RecordSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub fn canonical_column_name(raw: &str) -> String {
    let trimmed = raw.trim();
    RAW_RENAMES
        .iter()
        .find(|(from, _)| from.eq_ignore_ascii_case(trimmed))
        .map(|(_, to)| (*to).to_owned())
        .unwrap_or_else(|| trimmed.to_lowercase().replace(' ', "_"))
}

/// Rename every column of `df` to its canonical name.
///
/// # Errors
///
/// Returns [`StarError::SchemaMismatch`] if two raw columns collapse onto
/// the same canonical name.
pub fn normalize_columns(mut df: DataFrame) -> Result<DataFrame> {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();

    let mut seen: HashMap<String, &str> = HashMap::new();
    for name in &names {
        let canonical = canonical_column_name(name);
        if let Some(previous) = seen.insert(canonical.clone(), name) {
            return Err(StarError::SchemaMismatch(format!(
                "columns '{previous}' and '{name}' both map to '{canonical}'"
            )));
        }
    }

    for name in &names {
        let canonical = canonical_column_name(name);
        if canonical != *name {
            df.rename(name, canonical.into())?;
        }
    }
    Ok(df)
}

/// Convert a normalized frame into typed records.
///
/// # Errors
///
/// Returns [`StarError::SchemaMismatch`] when the frame is empty, a required
/// column is missing, or a required column has no usable value at all.
pub fn extract_records(df: &DataFrame) -> Result<RecordSet> {
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|name| df.column(name).is_err())
        .collect();
    if !missing.is_empty() {
        return Err(StarError::SchemaMismatch(format!(
            "missing required column(s): {}",
            missing.join(", ")
        )));
    }
    if df.height() == 0 {
        return Err(StarError::SchemaMismatch(
            "input record set is empty".to_owned(),
        ));
    }

    let mut issues = Vec::new();

    let mut retailer_name = text_column(df, "retailer_name")?.into_iter();
    let mut retailer_id = text_column(df, "retailer_id")?.into_iter();
    let mut region = text_column(df, "region")?.into_iter();
    let mut state = text_column(df, "state")?.into_iter();
    let mut city = text_column(df, "city")?.into_iter();
    let mut product = text_column(df, "product")?.into_iter();
    let mut sales_method = text_column(df, "sales_method")?.into_iter();

    let mut invoice_date = date_column(df, "invoice_date")?
        .finish("invoice_date", &mut issues)?
        .into_iter();
    let mut price_per_unit = number_column(df, "price_per_unit", parse_number)?
        .finish("price_per_unit", &mut issues)?
        .into_iter();
    let mut units_sold = number_column(df, "units_sold", parse_integer)?
        .finish("units_sold", &mut issues)?
        .into_iter();
    let mut total_sales = number_column(df, "total_sales", parse_number)?
        .finish("total_sales", &mut issues)?
        .into_iter();
    let mut operating_profit = number_column(df, "operating_profit", parse_number)?
        .finish("operating_profit", &mut issues)?
        .into_iter();
    let mut operating_margin = number_column(df, "operating_margin", parse_number)?
        .finish("operating_margin", &mut issues)?
        .into_iter();

    let records = (1..=df.height())
        .map(|row| SalesRecord {
            row,
            retailer_name: retailer_name.next().flatten(),
            retailer_id: retailer_id.next().flatten(),
            invoice_date: invoice_date.next().flatten(),
            region: region.next().flatten(),
            state: state.next().flatten(),
            city: city.next().flatten(),
            product: product.next().flatten(),
            price_per_unit: price_per_unit.next().flatten(),
            units_sold: units_sold.next().flatten(),
            total_sales: total_sales.next().flatten(),
            operating_profit: operating_profit.next().flatten(),
            operating_margin: operating_margin.next().flatten(),
            sales_method: sales_method.next().flatten(),
        })
        .collect();

    Ok(RecordSet { records, issues })
}

/// Column values after coercion, with the number of values that were
/// present but could not be parsed.
struct Coerced<T> {
    values: Vec<Option<T>>,
    failed: usize,
    example: Option<String>,
}

impl<T> Coerced<T> {
    fn exact(values: Vec<Option<T>>) -> Self {
        Self {
            values,
            failed: 0,
            example: None,
        }
    }

    fn finish(self, column: &'static str, issues: &mut Vec<Issue>) -> Result<Vec<Option<T>>> {
        if self.values.iter().all(Option::is_none) {
            let reason = if self.failed > 0 {
                "entirely non-coercible"
            } else {
                "entirely null"
            };
            return Err(StarError::SchemaMismatch(format!(
                "column '{column}' is {reason}"
            )));
        }
        if self.failed > 0 {
            tracing::warn!(column, failed = self.failed, "Values could not be coerced and were nulled");
            issues.push(Issue::CoercionFailure {
                column,
                rows: self.failed,
                example: self.example.unwrap_or_default(),
            });
        }
        Ok(self.values)
    }
}

fn text_column(df: &DataFrame, name: &'static str) -> Result<Vec<Option<String>>> {
    let series = df.column(name)?.as_materialized_series();
    let values: Vec<Option<String>> = if series.dtype().is_float() {
        let floats = series.cast(&DataType::Float64)?;
        floats.f64()?.into_iter().map(|v| v.map(format_float_key)).collect()
    } else {
        let strings = series.cast(&DataType::String)?;
        strings
            .str()?
            .into_iter()
            .map(|v| v.map(str::trim).filter(|s| !s.is_empty()).map(ToOwned::to_owned))
            .collect()
    };

    if values.iter().all(Option::is_none) {
        return Err(StarError::SchemaMismatch(format!(
            "column '{name}' is entirely null"
        )));
    }
    Ok(values)
}

/// Identifiers read back from spreadsheets often arrive as floats (`1185732.0`).
fn format_float_key(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

fn number_column<T>(
    df: &DataFrame,
    name: &str,
    parse: fn(&str) -> Option<T>,
) -> Result<Coerced<T>>
where
    T: FromF64,
{
    let series = df.column(name)?.as_materialized_series();
    if series.dtype().is_primitive_numeric() {
        let floats = series.cast(&DataType::Float64)?;
        let mut failed = 0;
        let mut example = None;
        let values = floats
            .f64()?
            .into_iter()
            .map(|v| {
                let v = v?;
                let converted = T::from_f64(v);
                if converted.is_none() {
                    failed += 1;
                    example.get_or_insert_with(|| v.to_string());
                }
                converted
            })
            .collect();
        return Ok(Coerced {
            values,
            failed,
            example,
        });
    }
    coerce_strings(series, parse)
}

fn date_column(df: &DataFrame, name: &str) -> Result<Coerced<NaiveDate>> {
    let series = df.column(name)?.as_materialized_series();
    match series.dtype() {
        DataType::Date => Ok(Coerced::exact(epoch_days(series)?)),
        DataType::Datetime(_, _) => {
            let dates = series.cast(&DataType::Date)?;
            Ok(Coerced::exact(epoch_days(&dates)?))
        }
        _ => coerce_strings(series, parse_date),
    }
}

fn epoch_days(series: &Series) -> Result<Vec<Option<NaiveDate>>> {
    let physical = series.cast(&DataType::Int32)?;
    Ok(physical
        .i32()?
        .into_iter()
        .map(|days| days.and_then(date_from_epoch_days))
        .collect())
}

pub(crate) fn date_from_epoch_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(chrono::Duration::days(i64::from(days)))
}

pub(crate) fn epoch_days_from_date(date: NaiveDate) -> Option<i32> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    i32::try_from(date.signed_duration_since(epoch).num_days()).ok()
}

fn coerce_strings<T>(series: &Series, parse: fn(&str) -> Option<T>) -> Result<Coerced<T>> {
    let strings = series.cast(&DataType::String)?;
    let mut failed = 0;
    let mut example = None;
    let values = strings
        .str()?
        .into_iter()
        .map(|raw| {
            let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
            let parsed = parse(raw);
            if parsed.is_none() {
                failed += 1;
                example.get_or_insert_with(|| raw.to_owned());
            }
            parsed
        })
        .collect();

    Ok(Coerced {
        values,
        failed,
        example,
    })
}

/// Conversion from a numeric polars value into a measure type.
trait FromF64: Sized {
    fn from_f64(value: f64) -> Option<Self>;
}

impl FromF64 for f64 {
    fn from_f64(value: f64) -> Option<Self> {
        value.is_finite().then_some(value)
    }
}

impl FromF64 for i64 {
    fn from_f64(value: f64) -> Option<Self> {
        exact_integer(value)
    }
}

/// Largest magnitude at which every integer is exactly representable as f64.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// `value` as an integer, or `None` when it has a fractional part or lies
/// outside the exactly representable range.
pub(crate) fn exact_integer(value: f64) -> Option<i64> {
    let integral = value.fract() == 0.0 && value.abs() <= MAX_EXACT_INTEGER;
    // Integral and in range, so the cast is exact.
    integral.then_some(value as i64)
}

/// Parse a numeric cell: accepts currency symbols, thousands separators and
/// a percent suffix (`"45%"` is `0.45`).
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let (body, percent) = match trimmed.strip_suffix('%') {
        Some(body) => (body, true),
        None => (trimmed, false),
    };
    let cleaned: String = body
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if percent { value / 100.0 } else { value })
}

pub fn parse_integer(raw: &str) -> Option<i64> {
    parse_number(raw).and_then(i64::from_f64)
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_frame() -> DataFrame {
        df!(
            "Retailer" => ["Foot Locker", "Walmart"],
            "Retailer ID" => [1185732_i64, 1128299],
            "Invoice Date" => ["2020-01-01", "1/2/2020"],
            "Region" => ["Northeast", "West"],
            "State" => ["New York", "California"],
            "City" => ["New York", "Los Angeles"],
            "Product" => ["Men's Street Footwear", "Women's Apparel"],
            "Price per Unit" => ["$50.00", "45"],
            "Units Sold" => ["1,200", "850"],
            "Total Sales" => [600000.0, 382500.0],
            "Operating Proft" => [300000.0, 133875.0],
            "Operating Margin" => ["50%", "0.35"],
            "Sales Method" => [" In-store ", "Online"]
        )
        .expect("fixture frame")
    }

    #[test]
    fn test_canonical_column_name() {
        assert_eq!(canonical_column_name("Operating Proft"), "operating_profit");
        assert_eq!(canonical_column_name("  retailer id "), "retailer_id");
        assert_eq!(canonical_column_name("Some Extra Col"), "some_extra_col");
    }

    #[test]
    fn test_normalize_and_extract() -> Result<()> {
        let df = normalize_columns(raw_frame())?;
        let set = extract_records(&df)?;

        assert_eq!(set.len(), 2);
        assert!(set.issues.is_empty());

        let first = set.records.first().expect("first record");
        assert_eq!(first.row, 1);
        assert_eq!(first.retailer_id.as_deref(), Some("1185732"));
        assert_eq!(first.invoice_date, NaiveDate::from_ymd_opt(2020, 1, 1));
        assert_eq!(first.price_per_unit, Some(50.0));
        assert_eq!(first.units_sold, Some(1200));
        assert_eq!(first.operating_margin, Some(0.5));
        assert_eq!(first.sales_method.as_deref(), Some("In-store"));

        let second = set.records.get(1).expect("second record");
        assert_eq!(second.invoice_date, NaiveDate::from_ymd_opt(2020, 1, 2));
        assert_eq!(second.operating_margin, Some(0.35));
        Ok(())
    }

    #[test]
    fn test_missing_column_is_schema_mismatch() -> Result<()> {
        let df = normalize_columns(raw_frame())?.drop("region")?;
        let err = extract_records(&df).err().expect("should fail");
        assert!(matches!(err, StarError::SchemaMismatch(ref msg) if msg.contains("region")));
        Ok(())
    }

    #[test]
    fn test_empty_input_is_schema_mismatch() -> Result<()> {
        let df = normalize_columns(raw_frame())?.head(Some(0));
        assert!(matches!(
            extract_records(&df),
            Err(StarError::SchemaMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_entirely_non_coercible_measure() -> Result<()> {
        let mut df = normalize_columns(raw_frame())?;
        df.replace("units_sold", Series::new("units_sold".into(), ["lots", "many"]))?;
        let err = extract_records(&df).err().expect("should fail");
        assert!(
            matches!(err, StarError::SchemaMismatch(ref msg) if msg.contains("non-coercible"))
        );
        Ok(())
    }

    #[test]
    fn test_partial_coercion_failure_is_reported() -> Result<()> {
        let mut df = normalize_columns(raw_frame())?;
        df.replace("units_sold", Series::new("units_sold".into(), ["12", "n/a"]))?;
        let set = extract_records(&df)?;

        assert_eq!(set.records.get(1).and_then(|r| r.units_sold), None);
        assert_eq!(
            set.issues,
            vec![Issue::CoercionFailure {
                column: "units_sold",
                rows: 1,
                example: "n/a".to_owned(),
            }]
        );
        Ok(())
    }

    #[test]
    fn test_fractional_units_are_coercion_failures() -> Result<()> {
        let mut df = normalize_columns(raw_frame())?;
        df.replace("units_sold", Series::new("units_sold".into(), ["12.7", "850"]))?;
        let set = extract_records(&df)?;
        assert_eq!(set.records.first().and_then(|r| r.units_sold), None);
        assert_eq!(set.records.get(1).and_then(|r| r.units_sold), Some(850));
        assert_eq!(
            set.issues,
            vec![Issue::CoercionFailure {
                column: "units_sold",
                rows: 1,
                example: "12.7".to_owned(),
            }]
        );

        df.replace("units_sold", Series::new("units_sold".into(), [3.5_f64, 1e300]))?;
        let err = extract_records(&df).err().expect("no usable units left");
        assert!(
            matches!(err, StarError::SchemaMismatch(ref msg) if msg.contains("units_sold"))
        );
        Ok(())
    }

    #[test]
    fn test_duplicate_canonical_names_rejected() {
        let df = df!(
            "Operating Proft" => [1.0],
            "Operating Profit" => [2.0]
        )
        .expect("frame");
        assert!(matches!(
            normalize_columns(df),
            Err(StarError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_number("$1,234.50"), Some(1234.5));
        assert_eq!(parse_number("35%"), Some(0.35));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_integer("7.0"), Some(7));
        assert_eq!(parse_integer("12.7"), None);
        assert_eq!(parse_integer("1e300"), None);
        assert_eq!(
            parse_date("2021-06-30 00:00:00"),
            NaiveDate::from_ymd_opt(2021, 6, 30)
        );
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn test_epoch_day_conversion() {
        let date = NaiveDate::from_ymd_opt(2020, 1, 1).expect("date");
        let days = epoch_days_from_date(date).expect("days");
        assert_eq!(days, 18262);
        assert_eq!(date_from_epoch_days(days), Some(date));
    }
}
