//! Record and table types shared by the dimension and fact builders.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One flat input row after column normalization and type coercion.
///
/// Every field is optional: partial nulls are legal in the input and are
/// resolved (or not) by the builders. `row` is the 1-based input position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SalesRecord {
    pub row: usize,
    pub retailer_name: Option<String>,
    pub retailer_id: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub region: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub product: Option<String>,
    pub price_per_unit: Option<f64>,
    pub units_sold: Option<i64>,
    pub total_sales: Option<f64>,
    pub operating_profit: Option<f64>,
    pub operating_margin: Option<f64>,
    pub sales_method: Option<String>,
}

/// The seven output tables of the star schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Retailer,
    Region,
    State,
    City,
    Product,
    SalesMethod,
    SalesTransaction,
}

impl TableKind {
    pub const ALL: [Self; 7] = [
        Self::Retailer,
        Self::Region,
        Self::State,
        Self::City,
        Self::Product,
        Self::SalesMethod,
        Self::SalesTransaction,
    ];

    pub const DIMENSIONS: [Self; 6] = [
        Self::Retailer,
        Self::Region,
        Self::State,
        Self::City,
        Self::Product,
        Self::SalesMethod,
    ];

    /// Destination table name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Retailer => "retailer",
            Self::Region => "region",
            Self::State => "state",
            Self::City => "city",
            Self::Product => "product",
            Self::SalesMethod => "sales_method",
            Self::SalesTransaction => "sales_transaction",
        }
    }

    pub fn is_dimension(self) -> bool {
        self != Self::SalesTransaction
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetailerRow {
    pub retailer_id: String,
    pub retailer_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRow {
    pub region_id: i64,
    pub region_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRow {
    pub state_id: i64,
    pub state_name: String,
    pub region_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityRow {
    pub city_id: i64,
    pub city_name: String,
    pub state_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductRow {
    pub product_id: i64,
    pub product_name: String,
    pub price_per_unit: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesMethodRow {
    pub sales_method_id: i64,
    pub method_name: String,
}

/// A row of `sales_transaction`. Foreign keys are always resolved; rows that
/// fail a lookup never reach this type.
#[derive(Debug, Clone, PartialEq)]
pub struct FactRow {
    pub transaction_id: i64,
    pub retailer_id: String,
    pub invoice_date: Option<NaiveDate>,
    pub city_id: i64,
    pub product_id: i64,
    pub units_sold: Option<i64>,
    pub total_sales: Option<f64>,
    pub operating_profit: Option<f64>,
    pub operating_margin: Option<f64>,
    pub sales_method_id: i64,
    pub region_id: i64,
}
