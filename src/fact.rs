//! Fact Builder.
//!
//! Resolves every input record against the built dimension tables, in the
//! same order the dimensions were built: Region, State (by region id and
//! name), City (by state id and name), Product, Sales Method, Retailer.
//! Every lookup is an exact natural-key match; a record that misses any of
//! them is excluded from the fact table and reported.

use crate::dimension::{
    Dimensions, city_index, product_index, region_index, sales_method_index, state_index,
};
use crate::issues::Issue;
use crate::model::{FactRow, SalesRecord, TableKind};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// An input row left out of the fact table, with every dimension it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedRow {
    pub row: usize,
    pub unresolved: Vec<TableKind>,
}

/// Output of [`build_facts`].
#[derive(Debug, Clone, Default)]
pub struct FactBuild {
    pub rows: Vec<FactRow>,
    pub excluded: Vec<ExcludedRow>,
    pub issues: Vec<Issue>,
}

impl FactBuild {
    /// Excluded rows per dimension. A row can count against several.
    pub fn unresolved_counts(&self) -> HashMap<TableKind, usize> {
        let mut counts = HashMap::new();
        for row in &self.excluded {
            for table in &row.unresolved {
                *counts.entry(*table).or_default() += 1;
            }
        }
        counts
    }
}

/// Natural-key lookups over the dimension tables.
struct DimensionIndex<'a> {
    regions: HashMap<&'a str, i64>,
    states: HashMap<(i64, &'a str), i64>,
    cities: HashMap<(i64, &'a str), i64>,
    products: HashMap<&'a str, i64>,
    sales_methods: HashMap<&'a str, i64>,
    retailers: HashSet<&'a str>,
}

impl<'a> DimensionIndex<'a> {
    fn new(dims: &'a Dimensions) -> Self {
        Self {
            regions: region_index(&dims.regions),
            states: state_index(&dims.states),
            cities: city_index(&dims.cities),
            products: product_index(&dims.products),
            sales_methods: sales_method_index(&dims.sales_methods),
            retailers: dims
                .retailers
                .iter()
                .map(|r| r.retailer_id.as_str())
                .collect(),
        }
    }
}

/// Collects the failed lookups of one record.
struct RowResolution {
    row: usize,
    unresolved: Vec<TableKind>,
    issues: Vec<Issue>,
}

impl RowResolution {
    fn new(row: usize) -> Self {
        Self {
            row,
            unresolved: Vec::new(),
            issues: Vec::new(),
        }
    }

    fn check<T>(&mut self, table: TableKind, key: impl FnOnce() -> String, found: Option<T>) -> Option<T> {
        if found.is_none() {
            self.unresolved.push(table);
            self.issues.push(Issue::UnresolvedForeignKey {
                row: self.row,
                table,
                key: key(),
            });
        }
        found
    }
}

fn quoted(value: Option<&str>) -> String {
    value.map_or_else(|| "<null>".to_owned(), |v| format!("'{v}'"))
}

/// Build one fact row per record, excluding records with an unresolved
/// foreign key. The transaction id is the record's 1-based input position.
pub fn build_facts(records: &[SalesRecord], dims: &Dimensions) -> FactBuild {
    let index = DimensionIndex::new(dims);
    let mut out = FactBuild {
        rows: Vec::with_capacity(records.len()),
        ..Default::default()
    };

    for record in records {
        let mut res = RowResolution::new(record.row);
        let region = record.region.as_deref();
        let state = record.state.as_deref();
        let city = record.city.as_deref();

        let region_id = res.check(
            TableKind::Region,
            || format!("region {}", quoted(region)),
            region.and_then(|name| index.regions.get(name).copied()),
        );
        let state_id = res.check(
            TableKind::State,
            || format!("state {} in region {}", quoted(state), quoted(region)),
            region_id
                .zip(state)
                .and_then(|key| index.states.get(&key).copied()),
        );
        let city_id = res.check(
            TableKind::City,
            || format!("city {} in state {}", quoted(city), quoted(state)),
            state_id
                .zip(city)
                .and_then(|key| index.cities.get(&key).copied()),
        );
        let product_id = res.check(
            TableKind::Product,
            || format!("product {}", quoted(record.product.as_deref())),
            record
                .product
                .as_deref()
                .and_then(|name| index.products.get(name).copied()),
        );
        let sales_method_id = res.check(
            TableKind::SalesMethod,
            || format!("sales method {}", quoted(record.sales_method.as_deref())),
            record
                .sales_method
                .as_deref()
                .and_then(|name| index.sales_methods.get(name).copied()),
        );
        let retailer_id = res.check(
            TableKind::Retailer,
            || format!("retailer id {}", quoted(record.retailer_id.as_deref())),
            record
                .retailer_id
                .as_deref()
                .filter(|id| index.retailers.contains(id)),
        );

        match (retailer_id, city_id, product_id, sales_method_id, region_id) {
            (Some(retailer_id), Some(city_id), Some(product_id), Some(sales_method_id), Some(region_id)) => {
                out.rows.push(FactRow {
                    transaction_id: record.row as i64,
                    retailer_id: retailer_id.to_owned(),
                    invoice_date: record.invoice_date,
                    city_id,
                    product_id,
                    units_sold: record.units_sold,
                    total_sales: record.total_sales,
                    operating_profit: record.operating_profit,
                    operating_margin: record.operating_margin,
                    sales_method_id,
                    region_id,
                });
            }
            _ => {
                out.excluded.push(ExcludedRow {
                    row: record.row,
                    unresolved: res.unresolved,
                });
                out.issues.extend(res.issues);
            }
        }
    }

    if !out.excluded.is_empty() {
        tracing::warn!(
            excluded = out.excluded.len(),
            input = records.len(),
            "Rows excluded from sales_transaction because of unresolved foreign keys"
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::{KeyOrder, build_dimensions};
    use crate::error::Result;
    use crate::test_support::{record, scenario};

    #[test]
    fn test_scenario_facts() -> Result<()> {
        let records = scenario();
        let dims = build_dimensions(&records, KeyOrder::FirstSeen)?.dimensions;
        let facts = build_facts(&records, &dims);

        assert!(facts.excluded.is_empty());
        let keys: Vec<_> = facts
            .rows
            .iter()
            .map(|f| {
                (
                    f.transaction_id,
                    f.retailer_id.as_str(),
                    f.region_id,
                    f.city_id,
                    f.product_id,
                    f.sales_method_id,
                )
            })
            .collect();
        assert_eq!(
            keys,
            vec![
                (1, "A1", 1, 1, 1, 1),
                (2, "A1", 1, 1, 2, 2),
                (3, "B7", 2, 2, 1, 3),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_measures_pass_through() -> Result<()> {
        let records = scenario();
        let dims = build_dimensions(&records, KeyOrder::Lexicographic)?.dimensions;
        let facts = build_facts(&records, &dims);

        for (fact, source) in facts.rows.iter().zip(&records) {
            assert_eq!(fact.units_sold, source.units_sold);
            assert_eq!(fact.total_sales, source.total_sales);
            assert_eq!(fact.operating_profit, source.operating_profit);
            assert_eq!(fact.operating_margin, source.operating_margin);
            assert_eq!(fact.invoice_date, source.invoice_date);
        }
        Ok(())
    }

    #[test]
    fn test_referential_closure() -> Result<()> {
        let regions = ["East", "West", "North"];
        let states = ["Alpha", "Beta"];
        let products = ["Shoes", "Hats", "Socks", "Bags"];
        let methods = ["In-store", "Online", "Outlet"];
        let records: Vec<_> = (1..=60)
            .map(|i| {
                let region = regions.get(i % regions.len()).copied().unwrap_or("East");
                let state = states.get(i % states.len()).copied().unwrap_or("Alpha");
                let city = format!("{state}-{}", i % 4);
                let product = products.get(i % products.len()).copied().unwrap_or("Shoes");
                let method = methods.get(i % methods.len()).copied().unwrap_or("Online");
                let retailer_id = format!("R{}", i % 5);
                record(
                    i,
                    ("Retailer", retailer_id.as_str()),
                    (region, state, city.as_str()),
                    (product, 10.0),
                    method,
                )
            })
            .collect();

        let dims = build_dimensions(&records, KeyOrder::Lexicographic)?.dimensions;
        let facts = build_facts(&records, &dims);
        assert_eq!(facts.rows.len(), records.len());

        let retailer_ids: HashSet<_> = dims.retailers.iter().map(|r| r.retailer_id.as_str()).collect();
        let region_ids: HashSet<_> = dims.regions.iter().map(|r| r.region_id).collect();
        let city_ids: HashMap<_, _> = dims.cities.iter().map(|c| (c.city_id, c.state_id)).collect();
        let state_regions: HashMap<_, _> = dims.states.iter().map(|s| (s.state_id, s.region_id)).collect();
        let product_ids: HashSet<_> = dims.products.iter().map(|p| p.product_id).collect();
        let method_ids: HashSet<_> = dims.sales_methods.iter().map(|m| m.sales_method_id).collect();

        for fact in &facts.rows {
            assert!(retailer_ids.contains(fact.retailer_id.as_str()));
            assert!(region_ids.contains(&fact.region_id));
            assert!(product_ids.contains(&fact.product_id));
            assert!(method_ids.contains(&fact.sales_method_id));
            let state_id = city_ids.get(&fact.city_id).expect("city exists");
            let region_id = state_regions.get(state_id).expect("state exists");
            assert_eq!(*region_id, fact.region_id, "city must sit in the fact's region");
        }
        Ok(())
    }

    #[test]
    fn test_orphan_row_is_excluded_and_counted() -> Result<()> {
        let mut records = scenario();
        if let Some(second) = records.get_mut(1) {
            second.state = None;
        }
        let dims = build_dimensions(&records, KeyOrder::FirstSeen)?.dimensions;
        let facts = build_facts(&records, &dims);

        let ids: Vec<_> = facts.rows.iter().map(|f| f.transaction_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(
            facts.excluded,
            vec![ExcludedRow {
                row: 2,
                unresolved: vec![TableKind::State, TableKind::City],
            }]
        );
        let counts = facts.unresolved_counts();
        assert_eq!(counts.get(&TableKind::State), Some(&1));
        assert_eq!(counts.get(&TableKind::City), Some(&1));
        assert_eq!(facts.issues.len(), 2);
        Ok(())
    }

    #[test]
    fn test_missing_dimension_row_is_unresolved() -> Result<()> {
        let records = scenario();
        let mut dims = build_dimensions(&records, KeyOrder::FirstSeen)?.dimensions;
        dims.sales_methods.retain(|m| m.method_name != "Outlet");

        let facts = build_facts(&records, &dims);
        assert_eq!(facts.rows.len(), 2);
        assert!(matches!(
            facts.issues.first(),
            Some(Issue::UnresolvedForeignKey { row: 3, table: TableKind::SalesMethod, .. })
        ));
        Ok(())
    }
}
