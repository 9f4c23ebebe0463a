//! Dependency graph between output tables.
//!
//! Region → State → City is a strict chain because a child's natural key
//! contains its parent's surrogate key. Retailer, Product and Sales Method
//! stand alone, and the fact table depends on every dimension.
//!
//! ```text
//! level 1   retailer   region   product   sales_method
//! level 2              state
//! level 3              city
//! level 4   sales_transaction
//! ```

use crate::model::TableKind;
use std::collections::BTreeSet;
use std::fmt;

impl TableKind {
    /// Tables that must be built (and written) before this one.
    pub fn depends_on(self) -> &'static [Self] {
        match self {
            Self::Retailer | Self::Region | Self::Product | Self::SalesMethod => &[],
            Self::State => &[Self::Region],
            Self::City => &[Self::State],
            Self::SalesTransaction => &Self::DIMENSIONS,
        }
    }
}

/// Topologically levelled build plan. Tables within a level are mutually
/// independent; levels run in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    levels: Vec<Vec<TableKind>>,
}

impl BuildPlan {
    pub fn new() -> Self {
        let mut placed: BTreeSet<TableKind> = BTreeSet::new();
        let mut levels = Vec::new();

        while placed.len() < TableKind::ALL.len() {
            let ready: Vec<TableKind> = TableKind::ALL
                .iter()
                .copied()
                .filter(|t| !placed.contains(t))
                .filter(|t| t.depends_on().iter().all(|dep| placed.contains(dep)))
                .collect();
            if ready.is_empty() {
                // The graph is static and acyclic; this only guards the loop.
                break;
            }
            placed.extend(ready.iter().copied());
            levels.push(ready);
        }

        Self { levels }
    }

    pub fn levels(&self) -> &[Vec<TableKind>] {
        &self.levels
    }

    /// Every table in a valid build order.
    pub fn order(&self) -> impl Iterator<Item = TableKind> + '_ {
        self.levels.iter().flatten().copied()
    }

    /// Dimensions only, in build order.
    pub fn dimension_order(&self) -> impl Iterator<Item = TableKind> + '_ {
        self.order().filter(|t| t.is_dimension())
    }
}

impl Default for BuildPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, level) in self.levels.iter().enumerate() {
            let names: Vec<&str> = level.iter().map(|t| t.name()).collect();
            writeln!(f, "level {}: {}", idx + 1, names.join(", "))?;
        }
        Ok(())
    }
}
