//! Output schemas of plan nodes
//!
//! A schema is an ordered list of `(table, column, alias, expression)`
//! entries. Column order is the order rows are produced in and is never
//! changed once a node is assembled.

use serde::Serialize;

use crate::catalog::DataType;
use crate::sql::{DisplayColumn, Expression, ParsedTable, TupleValue};

/// One output column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaColumn {
    pub table: String,
    pub column: String,
    pub alias: String,
    /// How the column is computed from the node's input
    pub expression: Expression,
}

impl SchemaColumn {
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        alias: impl Into<String>,
        expression: Expression,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            alias: alias.into(),
            expression,
        }
    }

    pub fn value_type(&self) -> DataType {
        self.expression.value_type()
    }

    /// Unresolved back-reference to this column
    pub fn tuple_value(&self) -> TupleValue {
        TupleValue::new(
            self.table.clone(),
            self.column.clone(),
            self.alias.clone(),
            self.value_type(),
        )
    }

    /// Column with the same identity that just passes this one through
    pub fn to_back_reference(&self) -> SchemaColumn {
        SchemaColumn {
            table: self.table.clone(),
            column: self.column.clone(),
            alias: self.alias.clone(),
            expression: Expression::TupleValue(self.tuple_value()),
        }
    }
}

impl From<&DisplayColumn> for SchemaColumn {
    fn from(col: &DisplayColumn) -> Self {
        SchemaColumn::new(
            col.table.clone(),
            col.column.clone(),
            col.alias.clone(),
            col.expression.clone(),
        )
    }
}

/// Ordered output schema of a plan node
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeSchema {
    columns: Vec<SchemaColumn>,
}

impl NodeSchema {
    pub fn new(columns: Vec<SchemaColumn>) -> Self {
        Self { columns }
    }

    /// Stored columns of a table range, in catalog order
    pub fn for_table(table: &ParsedTable) -> Self {
        let columns = table
            .columns
            .iter()
            .map(|c| {
                let tv = TupleValue::new(
                    table.range_name.clone(),
                    c.name.clone(),
                    c.name.clone(),
                    c.data_type.clone(),
                );
                SchemaColumn::new(
                    table.range_name.clone(),
                    c.name.clone(),
                    c.name.clone(),
                    Expression::TupleValue(tv),
                )
            })
            .collect();
        Self { columns }
    }

    pub fn columns(&self) -> &[SchemaColumn] {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut [SchemaColumn] {
        &mut self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn push(&mut self, column: SchemaColumn) {
        self.columns.push(column);
    }

    /// Column with exactly this identity
    pub fn find(&self, table: &str, column: &str, alias: &str) -> Option<&SchemaColumn> {
        self.columns
            .iter()
            .find(|c| c.table == table && c.column == column && c.alias == alias)
    }

    /// Position of the column a back-reference points at
    ///
    /// An exact `(table, column, alias)` match wins; otherwise the first
    /// column with the same `(table, column)` is used.
    pub fn index_of(&self, tv: &TupleValue) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.table == tv.table && c.column == tv.column && c.alias == tv.alias)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.table == tv.table && c.column == tv.column)
            })
    }

    /// Schema that re-exposes every column of `self` as a back-reference
    pub fn back_references(&self) -> NodeSchema {
        NodeSchema {
            columns: self.columns.iter().map(|c| c.to_back_reference()).collect(),
        }
    }

    /// `self` followed by `other`
    pub fn join(&self, other: &NodeSchema) -> NodeSchema {
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        NodeSchema { columns }
    }

    /// Estimated bytes per row
    pub fn tuple_width(&self) -> u32 {
        self.columns
            .iter()
            .map(|c| c.value_type().estimated_width())
            .sum()
    }

    /// Whether every back-reference in the schema has a resolved index
    pub fn is_resolved(&self) -> bool {
        self.columns.iter().all(|c| c.expression.is_resolved())
    }

    /// Column identities, ignoring how each is computed
    pub fn identities(&self) -> Vec<(&str, &str, &str)> {
        self.columns
            .iter()
            .map(|c| (c.table.as_str(), c.column.as_str(), c.alias.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tv(table: &str, column: &str, alias: &str) -> TupleValue {
        TupleValue::new(table, column, alias, DataType::Int)
    }

    fn schema() -> NodeSchema {
        NodeSchema::new(vec![
            SchemaColumn::new("t", "a", "a", Expression::TupleValue(tv("t", "a", "a"))),
            SchemaColumn::new("t", "a", "b", Expression::TupleValue(tv("t", "a", "a"))),
            SchemaColumn::new("t", "x", "x", Expression::TupleValue(tv("t", "x", "x"))),
        ])
    }

    #[test]
    fn test_index_of_prefers_alias() {
        let s = schema();
        assert_eq!(s.index_of(&tv("t", "a", "b")), Some(1));
        assert_eq!(s.index_of(&tv("t", "a", "a")), Some(0));
        assert_eq!(s.index_of(&tv("t", "a", "other")), Some(0));
        assert_eq!(s.index_of(&tv("t", "x", "x")), Some(2));
        assert_eq!(s.index_of(&tv("r", "x", "x")), None);
    }

    #[test]
    fn test_find_requires_exact_identity() {
        let s = schema();
        assert!(s.find("t", "a", "b").is_some());
        assert!(s.find("t", "a", "c").is_none());
    }

    #[test]
    fn test_back_references_keep_identity() {
        let s = schema();
        let refs = s.back_references();
        assert_eq!(refs.identities(), s.identities());
        assert!(!refs.is_resolved());
        match &refs.columns()[1].expression {
            Expression::TupleValue(tv) => assert_eq!(tv.alias, "b"),
            other => panic!("Expected back-reference, got {:?}", other),
        }
    }

    #[test]
    fn test_join_concatenates() {
        let s = schema();
        let joined = s.join(&s);
        assert_eq!(joined.len(), 6);
        assert_eq!(joined.tuple_width(), 24);
    }
}
