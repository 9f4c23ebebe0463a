//! Record fixtures shared by unit tests.

use crate::model::SalesRecord;

pub(crate) fn record(
    row: usize,
    retailer: (&str, &str),
    geo: (&str, &str, &str),
    product: (&str, f64),
    method: &str,
) -> SalesRecord {
    SalesRecord {
        row,
        retailer_name: Some(retailer.0.to_owned()),
        retailer_id: Some(retailer.1.to_owned()),
        invoice_date: chrono::NaiveDate::from_ymd_opt(2021, 1, 1),
        region: Some(geo.0.to_owned()),
        state: Some(geo.1.to_owned()),
        city: Some(geo.2.to_owned()),
        product: Some(product.0.to_owned()),
        price_per_unit: Some(product.1),
        units_sold: Some(10),
        total_sales: Some(product.1 * 10.0),
        operating_profit: Some(product.1 * 3.0),
        operating_margin: Some(0.3),
        sales_method: Some(method.to_owned()),
    }
}

/// Three rows: two stores in the East sharing NYC, one in the West.
pub(crate) fn scenario() -> Vec<SalesRecord> {
    vec![
        record(1, ("Retailer A", "A1"), ("East", "NY", "NYC"), ("Shoes", 50.0), "In-store"),
        record(2, ("Retailer A", "A1"), ("East", "NY", "NYC"), ("Hats", 20.0), "Online"),
        record(3, ("Retailer B", "B7"), ("West", "CA", "LA"), ("Shoes", 50.0), "Outlet"),
    ]
}
