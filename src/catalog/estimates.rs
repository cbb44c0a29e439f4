//! Table cardinality estimates
//!
//! Row counts the statistics walk uses to size scans. Tables without an
//! entry fall back to a fixed default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{CatalogError, CatalogResult};

/// Placeholder row count for tables without statistics
pub const DEFAULT_TABLE_ROWS: u64 = 1000;

/// Estimated total row counts per table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseEstimates {
    #[serde(default)]
    tables: BTreeMap<String, u64>,
    #[serde(default = "default_rows")]
    default_rows: u64,
}

fn default_rows() -> u64 {
    DEFAULT_TABLE_ROWS
}

impl Default for DatabaseEstimates {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseEstimates {
    /// Create estimates where every table has the default row count
    pub fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
            default_rows: DEFAULT_TABLE_ROWS,
        }
    }

    /// Set the total row count for a table (across all partitions)
    #[must_use]
    pub fn table_rows(mut self, table: impl Into<String>, rows: u64) -> Self {
        self.tables.insert(table.into(), rows);
        self
    }

    /// Set the row count used for tables without an entry
    #[must_use]
    pub fn default_rows(mut self, rows: u64) -> Self {
        self.default_rows = rows;
        self
    }

    /// Total estimated rows for a table
    pub fn rows_for(&self, table: &str) -> u64 {
        self.tables.get(table).copied().unwrap_or(self.default_rows)
    }

    /// Load estimates from JSON, e.g. `{"tables": {"t": 50000}}`
    pub fn from_json(json: &str) -> CatalogResult<Self> {
        serde_json::from_str(json).map_err(|e| CatalogError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_for_falls_back_to_default() {
        let est = DatabaseEstimates::new().table_rows("orders", 50_000);
        assert_eq!(est.rows_for("orders"), 50_000);
        assert_eq!(est.rows_for("other"), DEFAULT_TABLE_ROWS);

        let est = est.default_rows(10);
        assert_eq!(est.rows_for("other"), 10);
    }

    #[test]
    fn test_estimates_from_json() {
        let est = DatabaseEstimates::from_json(r#"{"tables": {"t": 42}}"#).unwrap();
        assert_eq!(est.rows_for("t"), 42);
        assert_eq!(est.rows_for("r"), DEFAULT_TABLE_ROWS);
    }
}
