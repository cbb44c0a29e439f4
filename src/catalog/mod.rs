//! Catalog - schema metadata the planner reads
//!
//! Holds table definitions with their partitioning, secondary indexes,
//! and the cluster's partition count. The planner treats the catalog as
//! read-only; it is built once (in code or from a JSON file) and shared
//! by reference across compiles.

pub mod estimates;

pub use estimates::DatabaseEstimates;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Partition count used when a catalog does not specify one
pub const DEFAULT_PARTITION_COUNT: u32 = 4;

/// Column types the planner can reason about
///
/// Only the widths matter for costing; integers additionally qualify a
/// column for partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    /// Bounded string, declared maximum length in bytes
    Varchar(u32),
    Text,
    Blob,
    Timestamp,
}

impl DataType {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::TinyInt | DataType::SmallInt | DataType::Int | DataType::BigInt
        )
    }

    /// Estimated serialized width in bytes
    ///
    /// Variable-length types are charged for half their declared length;
    /// unbounded ones use a flat guess.
    pub fn estimated_width(&self) -> u32 {
        match self {
            DataType::Boolean | DataType::TinyInt => 1,
            DataType::SmallInt => 2,
            DataType::Int | DataType::Float => 4,
            DataType::BigInt | DataType::Double | DataType::Timestamp => 8,
            DataType::Varchar(len) => 4 + len.div_ceil(2),
            DataType::Text | DataType::Blob => 64,
        }
    }
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Data type
    pub data_type: DataType,
    /// Whether NULL values are allowed
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    /// Create a new column definition
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    /// Set nullable
    #[must_use]
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// Table definition
///
/// A table either has a partition column, in which case its rows are
/// spread across every partition by that column's value, or it is
/// replicated and every partition holds a full copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name
    pub name: String,
    /// Column definitions
    pub columns: Vec<ColumnDef>,
    /// Partitioning column, `None` for replicated tables
    #[serde(default)]
    pub partition_column: Option<String>,
}

impl TableDef {
    /// Create a new (replicated) table definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            partition_column: None,
        }
    }

    /// Add a column
    #[must_use]
    pub fn column(mut self, col: ColumnDef) -> Self {
        self.columns.push(col);
        self
    }

    /// Partition the table on the given column
    #[must_use]
    pub fn partition_on(mut self, column: impl Into<String>) -> Self {
        self.partition_column = Some(column.into());
        self
    }

    /// Whether every partition holds a full copy of the table
    pub fn is_replicated(&self) -> bool {
        self.partition_column.is_none()
    }

    /// Get column by name
    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Estimated width of one row in bytes
    pub fn estimated_row_width(&self) -> u32 {
        self.columns
            .iter()
            .map(|c| c.data_type.estimated_width())
            .sum()
    }
}

/// Index definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name
    pub name: String,
    /// Table this index belongs to
    pub table: String,
    /// Columns in the index
    pub columns: Vec<String>,
    /// Whether this is a unique index
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    /// Create a new index definition
    pub fn new(name: impl Into<String>, table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns,
            unique: false,
        }
    }

    /// Set unique
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Catalog error
#[derive(Debug, Clone)]
pub enum CatalogError {
    /// Table already exists
    TableExists(String),
    /// Table not found
    TableNotFound(String),
    /// Index already exists
    IndexExists(String),
    /// Column not found
    ColumnNotFound(String, String),
    /// Catalog description could not be decoded
    Invalid(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::TableExists(name) => write!(f, "Table '{}' already exists", name),
            CatalogError::TableNotFound(name) => write!(f, "Table '{}' not found", name),
            CatalogError::IndexExists(name) => write!(f, "Index '{}' already exists", name),
            CatalogError::ColumnNotFound(table, col) => {
                write!(f, "Column '{}' not found in table '{}'", col, table)
            }
            CatalogError::Invalid(msg) => write!(f, "Invalid catalog: {}", msg),
        }
    }
}

impl std::error::Error for CatalogError {}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// On-disk catalog description
#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default = "default_partition_count")]
    partition_count: u32,
    #[serde(default)]
    tables: Vec<TableDef>,
    #[serde(default)]
    indexes: Vec<IndexDef>,
}

fn default_partition_count() -> u32 {
    DEFAULT_PARTITION_COUNT
}

/// Database catalog - stores schema metadata
///
/// Ordered maps keep iteration deterministic, which the planner relies on
/// when enumerating access paths.
#[derive(Debug, Clone)]
pub struct Catalog {
    /// Tables by name
    tables: BTreeMap<String, TableDef>,
    /// Indexes by name
    indexes: BTreeMap<String, IndexDef>,
    /// Number of partitions partitioned tables are spread over
    partition_count: u32,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
            indexes: BTreeMap::new(),
            partition_count: DEFAULT_PARTITION_COUNT,
        }
    }

    /// Set the partition count (at least one)
    #[must_use]
    pub fn with_partition_count(mut self, count: u32) -> Self {
        self.partition_count = count.max(1);
        self
    }

    /// Number of partitions
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Build a catalog from its JSON description
    ///
    /// Tables and indexes are validated the same way `create_table` and
    /// `create_index` validate them.
    pub fn from_json(json: &str) -> CatalogResult<Self> {
        let file: CatalogFile =
            serde_json::from_str(json).map_err(|e| CatalogError::Invalid(e.to_string()))?;

        let mut catalog = Self::new().with_partition_count(file.partition_count);
        for table in file.tables {
            catalog.create_table(table)?;
        }
        for index in file.indexes {
            catalog.create_index(index)?;
        }
        Ok(catalog)
    }

    /// Serialize the catalog to its JSON description
    pub fn to_json(&self) -> CatalogResult<String> {
        let file = CatalogFile {
            partition_count: self.partition_count,
            tables: self.tables.values().cloned().collect(),
            indexes: self.indexes.values().cloned().collect(),
        };
        serde_json::to_string_pretty(&file).map_err(|e| CatalogError::Invalid(e.to_string()))
    }

    /// Create a table
    pub fn create_table(&mut self, def: TableDef) -> CatalogResult<()> {
        if self.tables.contains_key(&def.name) {
            return Err(CatalogError::TableExists(def.name.clone()));
        }
        if let Some(col) = &def.partition_column {
            if def.get_column(col).is_none() {
                return Err(CatalogError::ColumnNotFound(def.name.clone(), col.clone()));
            }
        }
        self.tables.insert(def.name.clone(), def);
        Ok(())
    }

    /// Get a table definition
    pub fn get_table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    /// Check if a table exists
    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Create an index
    pub fn create_index(&mut self, def: IndexDef) -> CatalogResult<()> {
        let table = self
            .tables
            .get(&def.table)
            .ok_or_else(|| CatalogError::TableNotFound(def.table.clone()))?;

        for col in &def.columns {
            if table.get_column(col).is_none() {
                return Err(CatalogError::ColumnNotFound(def.table.clone(), col.clone()));
            }
        }

        if self.indexes.contains_key(&def.name) {
            return Err(CatalogError::IndexExists(def.name.clone()));
        }
        self.indexes.insert(def.name.clone(), def);
        Ok(())
    }

    /// Get an index definition
    pub fn get_index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.get(name)
    }

    /// Get all indexes for a table, in index-name order
    pub fn get_indexes_for_table(&self, table: &str) -> Vec<&IndexDef> {
        self.indexes
            .values()
            .filter(|idx| idx.table == table)
            .collect()
    }
}
