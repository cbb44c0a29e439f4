//! Output schema generation and column-index resolution
//!
//! Both passes finish a node's children before touching the node itself.
//! `generate_output_schema` runs once on a freshly assembled tree;
//! `resolve_column_indexes` runs on every variant before it is scored and
//! only ever fills in back-reference indexes.

use crate::planner::error::{PlannerError, PlannerResult};
use crate::sql::{Expression, TupleValue};

use super::{NodeSchema, PlanNode, PlanNodeKind, PlanNodeType};

impl PlanNode {
    /// Derive output schemas bottom-up
    ///
    /// Scans expose their table's columns, joins concatenate outer then
    /// inner, and pass-through nodes re-expose their first child. Aggregate
    /// and projection schemas are fixed at assembly time, except that a
    /// projection column computing an aggregate is replaced by a
    /// back-reference to the column the child aggregation produces.
    pub fn generate_output_schema(&mut self) -> PlannerResult<()> {
        for child in &mut self.children {
            child.generate_output_schema()?;
        }

        if matches!(self.kind, PlanNodeKind::Projection) {
            return self.substitute_aggregate_outputs();
        }

        let derived = match &self.kind {
            PlanNodeKind::SeqScan(scan) => Some(scan.table_schema.back_references()),
            PlanNodeKind::IndexScan(index) => Some(index.scan.table_schema.back_references()),
            PlanNodeKind::NestLoop { .. } => {
                let (outer, inner) = self.join_children()?;
                Some(
                    outer
                        .output_schema
                        .back_references()
                        .join(&inner.output_schema.back_references()),
                )
            }
            // A receive cut loose by fragmentation keeps its schema
            PlanNodeKind::Send
            | PlanNodeKind::Receive { .. }
            | PlanNodeKind::Limit { .. }
            | PlanNodeKind::OrderBy { .. }
            | PlanNodeKind::Distinct
            | PlanNodeKind::SetOp { .. } => self
                .children
                .first()
                .map(|child| child.output_schema.back_references()),
            PlanNodeKind::Aggregate { .. } | PlanNodeKind::Projection => None,
        };

        if let Some(schema) = derived {
            self.output_schema = schema;
        }
        Ok(())
    }

    /// Replace aggregate computations in a projection with references to
    /// the child's aggregate output columns
    fn substitute_aggregate_outputs(&mut self) -> PlannerResult<()> {
        let needs_child = self
            .output_schema
            .columns()
            .iter()
            .any(|c| matches!(c.expression, Expression::Aggregate(_)));
        if !needs_child {
            return Ok(());
        }

        let child = self.children.first().ok_or_else(|| {
            PlannerError::InvariantViolation(
                "Projection computes an aggregate but has no input".to_string(),
            )
        })?;

        let mut substitutions = Vec::new();
        for (idx, col) in self.output_schema.columns().iter().enumerate() {
            if !matches!(col.expression, Expression::Aggregate(_)) {
                continue;
            }
            let produced = child
                .output_schema
                .find(&col.table, &col.column, &col.alias)
                .ok_or_else(|| {
                    PlannerError::InvariantViolation(format!(
                        "Aggregate output {}.{} ({}) not produced by {}",
                        col.table,
                        col.column,
                        col.alias,
                        child.node_type()
                    ))
                })?;
            substitutions.push((idx, produced.tuple_value()));
        }

        let columns = self.output_schema.columns_mut();
        for (idx, tv) in substitutions {
            columns[idx].expression = Expression::TupleValue(tv);
        }
        Ok(())
    }

    /// Fill in the index of every back-reference, bottom-up
    ///
    /// Scans resolve against their table's columns, joins against outer
    /// then inner output, everything else against its first child. Column
    /// count, order and types are left untouched.
    pub fn resolve_column_indexes(&mut self) -> PlannerResult<()> {
        for child in &mut self.children {
            child.resolve_column_indexes()?;
        }

        let input = match &self.kind {
            PlanNodeKind::SeqScan(scan) => scan.table_schema.clone(),
            PlanNodeKind::IndexScan(index) => index.scan.table_schema.clone(),
            PlanNodeKind::NestLoop { .. } => {
                let (outer, inner) = self.join_children()?;
                outer.output_schema.join(&inner.output_schema)
            }
            PlanNodeKind::Receive { .. } if self.children.is_empty() => return Ok(()),
            _ => match self.children.first() {
                Some(child) => child.output_schema.clone(),
                None => NodeSchema::default(),
            },
        };

        let node_type = self.node_type();
        for col in self.output_schema.columns_mut() {
            for tv in col.expression.tuple_values_mut() {
                resolve_one(tv, &input, node_type)?;
            }
        }
        for expr in self.expressions_mut() {
            for tv in expr.tuple_values_mut() {
                resolve_one(tv, &input, node_type)?;
            }
        }
        Ok(())
    }

    fn join_children(&self) -> PlannerResult<(&PlanNode, &PlanNode)> {
        match self.children.as_slice() {
            [outer, inner] => Ok((outer, inner)),
            other => Err(PlannerError::InvariantViolation(format!(
                "Join node has {} children",
                other.len()
            ))),
        }
    }
}

fn resolve_one(
    tv: &mut TupleValue,
    input: &NodeSchema,
    node_type: PlanNodeType,
) -> PlannerResult<()> {
    let idx = input.index_of(tv).ok_or_else(|| {
        PlannerError::InvariantViolation(format!(
            "{} references {}.{} ({}) which its input does not produce",
            node_type, tv.table, tv.column, tv.alias
        ))
    })?;
    tv.column_index = Some(idx);
    Ok(())
}
