//! Dimension Builder.
//!
//! Derives the six dimension tables from the flat record set. Every
//! dimension except Retailer gets contiguous surrogate keys `1..=K`,
//! assigned in a deterministic [`KeyOrder`] over the distinct natural keys.
//!
//! Natural keys:
//!
//! | table          | natural key                 |
//! |----------------|-----------------------------|
//! | `retailer`     | retailer id (kept as key)   |
//! | `region`       | region name                 |
//! | `state`        | (`region_id`, state name)   |
//! | `city`         | (`state_id`, city name)     |
//! | `product`      | product name                |
//! | `sales_method` | method name                 |
//!
//! A record with a null in a natural key column (or whose parent could not
//! be resolved) does not contribute to that dimension. The fact builder later
//! reports it as an unresolved foreign key.

use crate::error::{Result, StarError};
use crate::issues::Issue;
use crate::model::{
    CityRow, ProductRow, RegionRow, RetailerRow, SalesMethodRow, SalesRecord, StateRow, TableKind,
};
use crate::plan::BuildPlan;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Rule used to order distinct natural keys before numbering them.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrder {
    /// Sort natural keys; keys do not depend on input row order.
    #[default]
    Lexicographic,
    /// Number keys in the order they are first encountered in the input.
    FirstSeen,
}

/// The built dimension tables, each ordered by surrogate key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dimensions {
    pub retailers: Vec<RetailerRow>,
    pub regions: Vec<RegionRow>,
    pub states: Vec<StateRow>,
    pub cities: Vec<CityRow>,
    pub products: Vec<ProductRow>,
    pub sales_methods: Vec<SalesMethodRow>,
}

impl Dimensions {
    pub fn row_count(&self, table: TableKind) -> usize {
        match table {
            TableKind::Retailer => self.retailers.len(),
            TableKind::Region => self.regions.len(),
            TableKind::State => self.states.len(),
            TableKind::City => self.cities.len(),
            TableKind::Product => self.products.len(),
            TableKind::SalesMethod => self.sales_methods.len(),
            TableKind::SalesTransaction => 0,
        }
    }
}

/// Output of [`build_dimensions`].
#[derive(Debug, Clone, Default)]
pub struct DimensionBuild {
    pub dimensions: Dimensions,
    pub issues: Vec<Issue>,
}

/// Number the distinct keys of `keys` as `1..=K`.
///
/// Duplicates are dropped keeping the first occurrence; `order` then decides
/// whether the encounter order is kept or the keys are sorted.
pub fn assign_surrogate_keys<K>(keys: impl IntoIterator<Item = K>, order: KeyOrder) -> Vec<(i64, K)>
where
    K: Ord + Hash + Clone,
{
    let mut seen = HashSet::new();
    let mut distinct: Vec<K> = keys
        .into_iter()
        .filter(|key| seen.insert(key.clone()))
        .collect();
    if order == KeyOrder::Lexicographic {
        distinct.sort();
    }
    (1..).zip(distinct).collect()
}

pub(crate) fn region_index(regions: &[RegionRow]) -> HashMap<&str, i64> {
    regions
        .iter()
        .map(|r| (r.region_name.as_str(), r.region_id))
        .collect()
}

pub(crate) fn state_index(states: &[StateRow]) -> HashMap<(i64, &str), i64> {
    states
        .iter()
        .map(|s| ((s.region_id, s.state_name.as_str()), s.state_id))
        .collect()
}

pub(crate) fn city_index(cities: &[CityRow]) -> HashMap<(i64, &str), i64> {
    cities
        .iter()
        .map(|c| ((c.state_id, c.city_name.as_str()), c.city_id))
        .collect()
}

pub(crate) fn product_index(products: &[ProductRow]) -> HashMap<&str, i64> {
    products
        .iter()
        .map(|p| (p.product_name.as_str(), p.product_id))
        .collect()
}

pub(crate) fn sales_method_index(methods: &[SalesMethodRow]) -> HashMap<&str, i64> {
    methods
        .iter()
        .map(|m| (m.method_name.as_str(), m.sales_method_id))
        .collect()
}

/// Build every dimension table in plan order.
///
/// # Errors
///
/// Returns [`StarError::SchemaMismatch`] if `records` is empty or a natural
/// key column has no value in any record.
pub fn build_dimensions(records: &[SalesRecord], order: KeyOrder) -> Result<DimensionBuild> {
    check_natural_keys(records)?;

    let mut builder = DimensionBuilder {
        records,
        order,
        built: HashSet::new(),
        out: DimensionBuild::default(),
    };
    for table in BuildPlan::new().dimension_order() {
        builder.build(table)?;
    }

    let dims = &builder.out.dimensions;
    tracing::debug!(
        retailers = dims.retailers.len(),
        regions = dims.regions.len(),
        states = dims.states.len(),
        cities = dims.cities.len(),
        products = dims.products.len(),
        sales_methods = dims.sales_methods.len(),
        "Dimensions built"
    );
    Ok(builder.out)
}

fn check_natural_keys(records: &[SalesRecord]) -> Result<()> {
    if records.is_empty() {
        return Err(StarError::SchemaMismatch(
            "input record set is empty".to_owned(),
        ));
    }

    let columns: [(&str, fn(&SalesRecord) -> bool); 6] = [
        ("retailer_id", |r| r.retailer_id.is_some()),
        ("region", |r| r.region.is_some()),
        ("state", |r| r.state.is_some()),
        ("city", |r| r.city.is_some()),
        ("product", |r| r.product.is_some()),
        ("sales_method", |r| r.sales_method.is_some()),
    ];
    for (column, present) in columns {
        if !records.iter().any(present) {
            return Err(StarError::SchemaMismatch(format!(
                "natural key column '{column}' is entirely null"
            )));
        }
    }
    Ok(())
}

struct DimensionBuilder<'a> {
    records: &'a [SalesRecord],
    order: KeyOrder,
    built: HashSet<TableKind>,
    out: DimensionBuild,
}

impl DimensionBuilder<'_> {
    fn build(&mut self, table: TableKind) -> Result<()> {
        if let Some(missing) = table.depends_on().iter().find(|dep| !self.built.contains(*dep)) {
            return Err(StarError::Other(format!(
                "cannot build {table} before {missing}"
            )));
        }

        match table {
            TableKind::Retailer => self.build_retailers(),
            TableKind::Region => self.build_regions(),
            TableKind::State => self.build_states(),
            TableKind::City => self.build_cities(),
            TableKind::Product => self.build_products(),
            TableKind::SalesMethod => self.build_sales_methods(),
            TableKind::SalesTransaction => {
                return Err(StarError::Other(
                    "the fact table is not a dimension".to_owned(),
                ));
            }
        }
        self.built.insert(table);
        Ok(())
    }

    fn build_retailers(&mut self) {
        let mut names: HashMap<&str, Option<&str>> = HashMap::new();
        let mut conflicts = Vec::new();

        for record in self.records {
            let Some(id) = record.retailer_id.as_deref() else {
                continue;
            };
            let name = record.retailer_name.as_deref();
            let kept = names.entry(id).or_insert(name);
            match *kept {
                None => *kept = name,
                Some(kept) => {
                    if let Some(other) = name.filter(|other| *other != kept) {
                        conflicts.push(Issue::DuplicateNaturalKeyConflict {
                            table: TableKind::Retailer,
                            key: id.to_owned(),
                            attribute: "retailer_name",
                            kept: kept.to_owned(),
                            discarded: other.to_owned(),
                            row: record.row,
                        });
                    }
                }
            }
        }

        let ids = self.records.iter().filter_map(|r| r.retailer_id.as_deref());
        self.out.dimensions.retailers = assign_surrogate_keys(ids, self.order)
            .into_iter()
            .map(|(_, id)| RetailerRow {
                retailer_id: id.to_owned(),
                retailer_name: names.get(id).copied().flatten().map(ToOwned::to_owned),
            })
            .collect();
        self.report_conflicts(TableKind::Retailer, conflicts);
    }

    fn build_regions(&mut self) {
        let names = self.records.iter().filter_map(|r| r.region.as_deref());
        self.out.dimensions.regions = assign_surrogate_keys(names, self.order)
            .into_iter()
            .map(|(region_id, name)| RegionRow {
                region_id,
                region_name: name.to_owned(),
            })
            .collect();
    }

    fn build_states(&mut self) {
        let regions = region_index(&self.out.dimensions.regions);
        let keys = self.records.iter().filter_map(|r| {
            let region_id = *regions.get(r.region.as_deref()?)?;
            Some((region_id, r.state.as_deref()?))
        });
        let states = assign_surrogate_keys(keys, self.order)
            .into_iter()
            .map(|(state_id, (region_id, name))| StateRow {
                state_id,
                state_name: name.to_owned(),
                region_id,
            })
            .collect();
        self.out.dimensions.states = states;
    }

    fn build_cities(&mut self) {
        let regions = region_index(&self.out.dimensions.regions);
        let states = state_index(&self.out.dimensions.states);
        let keys = self.records.iter().filter_map(|r| {
            let region_id = *regions.get(r.region.as_deref()?)?;
            let state_id = *states.get(&(region_id, r.state.as_deref()?))?;
            Some((state_id, r.city.as_deref()?))
        });
        let cities = assign_surrogate_keys(keys, self.order)
            .into_iter()
            .map(|(city_id, (state_id, name))| CityRow {
                city_id,
                city_name: name.to_owned(),
                state_id,
            })
            .collect();
        self.out.dimensions.cities = cities;
    }

    /// Products are keyed by name alone. The first non-null price seen for a
    /// name is kept; a later different price is a conflict.
    fn build_products(&mut self) {
        let mut prices: HashMap<&str, Option<f64>> = HashMap::new();
        let mut conflicts = Vec::new();

        for record in self.records {
            let Some(name) = record.product.as_deref() else {
                continue;
            };
            let kept = prices.entry(name).or_insert(record.price_per_unit);
            match *kept {
                None => *kept = record.price_per_unit,
                Some(kept) => {
                    if let Some(price) = record.price_per_unit
                        && (price - kept).abs() > f64::EPSILON
                    {
                        conflicts.push(Issue::DuplicateNaturalKeyConflict {
                            table: TableKind::Product,
                            key: name.to_owned(),
                            attribute: "price_per_unit",
                            kept: kept.to_string(),
                            discarded: price.to_string(),
                            row: record.row,
                        });
                    }
                }
            }
        }

        let names = self.records.iter().filter_map(|r| r.product.as_deref());
        self.out.dimensions.products = assign_surrogate_keys(names, self.order)
            .into_iter()
            .map(|(product_id, name)| ProductRow {
                product_id,
                product_name: name.to_owned(),
                price_per_unit: prices.get(name).copied().flatten(),
            })
            .collect();
        self.report_conflicts(TableKind::Product, conflicts);
    }

    fn build_sales_methods(&mut self) {
        let names = self.records.iter().filter_map(|r| r.sales_method.as_deref());
        self.out.dimensions.sales_methods = assign_surrogate_keys(names, self.order)
            .into_iter()
            .map(|(sales_method_id, name)| SalesMethodRow {
                sales_method_id,
                method_name: name.to_owned(),
            })
            .collect();
    }

    fn report_conflicts(&mut self, table: TableKind, conflicts: Vec<Issue>) {
        if let Some(first) = conflicts.first() {
            tracing::warn!(
                %table,
                conflicts = conflicts.len(),
                example = %first,
                "Conflicting attribute values for the same natural key; first-seen values kept"
            );
        }
        self.out.issues.extend(conflicts);
    }
}
