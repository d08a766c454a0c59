//! Alias map
//!
//! Collects finder output across render targets. Each canonical metric
//! name maps to the display names it answers for, per target; the final
//! row order is canonicalized by sorting before serialization.

use std::collections::HashMap;

use crate::finder::Finder;

/// One display alias for a metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    /// Target the metric answered
    pub target: String,

    /// Canonical display name
    pub display_name: String,
}

/// Metric path to aliases map.
#[derive(Debug, Default)]
pub struct Map {
    data: HashMap<String, Vec<Value>>,
}

impl Map {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the series of one finished finder under its target.
    pub fn merge_target(&mut self, finder: &dyn Finder, target: &str) {
        for row in finder.series() {
            let key = String::from_utf8_lossy(&row).into_owned();
            let display_name = String::from_utf8_lossy(&finder.abs(&row)).into_owned();
            self.data.entry(key).or_default().push(Value {
                target: target.to_string(),
                display_name,
            });
        }
    }

    /// Number of distinct metric paths.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when no metrics were merged.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Metric paths in canonical (sorted) order.
    pub fn series(&self) -> Vec<String> {
        let mut rows: Vec<String> = self.data.keys().cloned().collect();
        rows.sort();
        rows
    }

    /// Aliases recorded for one metric path.
    pub fn get(&self, path: &str) -> Option<&[Value]> {
        self.data.get(path).map(Vec::as_slice)
    }
}
