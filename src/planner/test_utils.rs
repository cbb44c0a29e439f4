//! Shared test utilities for planner module tests

use crate::catalog::{Catalog, ColumnDef, DataType, IndexDef, TableDef};

/// Create a test catalog
///
/// - `t(k, a, x)` partitioned on `k`, unique index `t_k` on `k`
/// - `s(k, b)` partitioned on `k`
/// - `r(id, name)` replicated
pub fn test_catalog() -> Catalog {
    let mut catalog = Catalog::new();

    let t = TableDef::new("t")
        .column(ColumnDef::new("k", DataType::Int).nullable(false))
        .column(ColumnDef::new("a", DataType::Int))
        .column(ColumnDef::new("x", DataType::BigInt))
        .partition_on("k");
    let s = TableDef::new("s")
        .column(ColumnDef::new("k", DataType::Int).nullable(false))
        .column(ColumnDef::new("b", DataType::Int))
        .partition_on("k");
    let r = TableDef::new("r")
        .column(ColumnDef::new("id", DataType::Int).nullable(false))
        .column(ColumnDef::new("name", DataType::Varchar(32)));

    catalog.create_table(t).unwrap();
    catalog.create_table(s).unwrap();
    catalog.create_table(r).unwrap();
    catalog
        .create_index(IndexDef::new("t_k", "t", vec!["k".to_string()]).unique())
        .unwrap();
    catalog
}
