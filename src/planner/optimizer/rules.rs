//! Micro-optimization rules
//!
//! Rules rewrite whole candidate plans. They run after assembly and before
//! column resolution, so a rule that reshapes the tree regenerates output
//! schemas and leaves index resolution to the search loop.

use crate::planner::compiled::CompiledPlan;
use crate::planner::error::PlannerResult;
use crate::planner::physical::{PlanNode, PlanNodeKind};
use crate::sql::Expression;

/// Micro-optimization trait
pub trait MicroOptimization: Send + Sync {
    /// Rule name for debugging
    fn name(&self) -> &'static str;

    /// Rewrite a plan into one or more variants
    fn apply(&self, plan: &CompiledPlan) -> PlannerResult<Vec<CompiledPlan>>;
}

/// Copy a LIMIT below the partition boundary it sits above
///
/// `LIMIT n OFFSET m` over a gathered result lets each partition stop
/// after `n + m` rows. The coordinator still applies the original limit
/// and offset. Both the original plan and the pushed-down variant are
/// returned and left for the cost model to choose between.
pub struct PushdownLimits;

impl MicroOptimization for PushdownLimits {
    fn name(&self) -> &'static str {
        "pushdown_limits"
    }

    fn apply(&self, plan: &CompiledPlan) -> PlannerResult<Vec<CompiledPlan>> {
        let mut variant = plan.clone();
        if !push_first_limit(&mut variant.root) {
            return Ok(vec![plan.clone()]);
        }
        variant.root.generate_output_schema()?;
        Ok(vec![plan.clone(), variant])
    }
}

/// Find the topmost LIMIT and try to copy it below the gather under it
fn push_first_limit(node: &mut PlanNode) -> bool {
    if let PlanNodeKind::Limit { limit, offset } = &node.kind {
        let Some(limit) = *limit else {
            return false;
        };
        let total = limit.saturating_add(*offset);
        return match node.children.first_mut() {
            Some(child) => insert_below_gather(child, total),
            None => false,
        };
    }
    match &node.kind {
        PlanNodeKind::Send | PlanNodeKind::Projection => match node.children.first_mut() {
            Some(child) => push_first_limit(child),
            None => false,
        },
        _ => false,
    }
}

fn insert_below_gather(node: &mut PlanNode, limit: u64) -> bool {
    match &node.kind {
        PlanNodeKind::Projection => match node.children.first_mut() {
            Some(child) => insert_below_gather(child, limit),
            None => false,
        },
        PlanNodeKind::Receive { .. } => {
            let Some(send) = node.children.first_mut() else {
                return false;
            };
            if !matches!(send.kind, PlanNodeKind::Send) {
                return false;
            }
            let already_limited = send
                .children
                .first()
                .is_some_and(|c| matches!(c.kind, PlanNodeKind::Limit { .. }));
            if already_limited {
                return false;
            }
            let Some(producer) = send.children.pop() else {
                return false;
            };
            send.children.push(PlanNode::new(
                PlanNodeKind::Limit {
                    limit: Some(limit),
                    offset: 0,
                },
                vec![producer],
            ));
            true
        }
        _ => false,
    }
}

/// Drop projections that re-expose their input unchanged
///
/// A projection is trivial when its columns have the same identities, in
/// the same order, as its child's output and each is a bare reference to
/// the matching input column. A projection over an aggregation is always
/// kept: it is where aggregate outputs are read back by the select list.
pub struct RemoveTrivialProjection;

impl MicroOptimization for RemoveTrivialProjection {
    fn name(&self) -> &'static str {
        "remove_trivial_projection"
    }

    fn apply(&self, plan: &CompiledPlan) -> PlannerResult<Vec<CompiledPlan>> {
        let mut variant = plan.clone();
        variant.root = remove_trivial(variant.root);
        Ok(vec![variant])
    }
}

fn remove_trivial(mut node: PlanNode) -> PlanNode {
    node.children = std::mem::take(&mut node.children)
        .into_iter()
        .map(remove_trivial)
        .collect();

    if is_trivial_projection(&node) {
        if let Some(child) = node.children.pop() {
            return child;
        }
    }
    node
}

fn is_trivial_projection(node: &PlanNode) -> bool {
    if !matches!(node.kind, PlanNodeKind::Projection) {
        return false;
    }
    let [child] = node.children.as_slice() else {
        return false;
    };
    if matches!(child.kind, PlanNodeKind::Aggregate { .. }) {
        return false;
    }
    if node.output_schema.identities() != child.output_schema.identities() {
        return false;
    }
    node.output_schema
        .columns()
        .iter()
        .all(|col| match &col.expression {
            Expression::TupleValue(tv) => tv.table == col.table && tv.column == col.column,
            _ => false,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, DataType};
    use crate::planner::physical::{
        AggregatePhase, NodeSchema, PlanNodeType, ScanNode, SchemaColumn,
    };
    use crate::sql::{AggregateExpr, AggregateKind, ParsedTable, TupleValue, TEMP_TABLE_NAME};

    fn table() -> ParsedTable {
        ParsedTable {
            name: "t".to_string(),
            range_name: "t".to_string(),
            partition_column: Some("k".to_string()),
            columns: vec![
                ColumnDef::new("k", DataType::Int),
                ColumnDef::new("a", DataType::Int),
            ],
        }
    }

    fn scan() -> PlanNode {
        PlanNode::new(
            PlanNodeKind::SeqScan(ScanNode {
                table: "t".to_string(),
                range_name: "t".to_string(),
                table_schema: NodeSchema::for_table(&table()),
                predicate: None,
                replicated: false,
            }),
            Vec::new(),
        )
    }

    fn projection(child: PlanNode, columns: &[(&str, &str)]) -> PlanNode {
        let cols = columns
            .iter()
            .map(|(column, alias)| {
                SchemaColumn::new(
                    "t",
                    *column,
                    *alias,
                    Expression::TupleValue(TupleValue::new("t", *column, *column, DataType::Int)),
                )
            })
            .collect();
        PlanNode::with_schema(PlanNodeKind::Projection, vec![child], NodeSchema::new(cols))
    }

    fn limited(limit: Option<u64>, offset: u64) -> CompiledPlan {
        let gathered = PlanNode::gather(scan());
        let proj = projection(gathered, &[("a", "a")]);
        let mut root = PlanNode::new(
            PlanNodeKind::Send,
            vec![PlanNode::new(PlanNodeKind::Limit { limit, offset }, vec![proj])],
        );
        root.generate_output_schema().unwrap();
        CompiledPlan::new(root)
    }

    #[test]
    fn test_pushdown_adds_variant() {
        let plan = limited(Some(10), 5);
        let variants = PushdownLimits.apply(&plan).unwrap();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0], plan);

        let pushed = &variants[1].root;
        let limits = pushed.find_all(PlanNodeType::Limit);
        assert_eq!(limits.len(), 2);
        assert_eq!(
            limits[1].kind,
            PlanNodeKind::Limit {
                limit: Some(15),
                offset: 0
            }
        );
        // The pushed limit sits directly under the producer-side send
        let send = pushed.find_all(PlanNodeType::Send)[1];
        assert_eq!(send.children[0].node_type(), PlanNodeType::Limit);
        assert_eq!(pushed.output_schema, plan.root.output_schema);
    }

    #[test]
    fn test_no_pushdown_without_limit_count() {
        let plan = limited(None, 5);
        assert_eq!(PushdownLimits.apply(&plan).unwrap(), vec![plan]);
    }

    #[test]
    fn test_no_pushdown_without_gather() {
        let mut root = PlanNode::new(
            PlanNodeKind::Limit {
                limit: Some(1),
                offset: 0,
            },
            vec![scan()],
        );
        root.generate_output_schema().unwrap();
        let plan = CompiledPlan::new(root);
        assert_eq!(PushdownLimits.apply(&plan).unwrap().len(), 1);
    }

    #[test]
    fn test_trivial_projection_removed() {
        let mut root = projection(scan(), &[("k", "k"), ("a", "a")]);
        root.generate_output_schema().unwrap();
        let out = RemoveTrivialProjection
            .apply(&CompiledPlan::new(root))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].root.node_type(), PlanNodeType::SeqScan);
    }

    #[test]
    fn test_renaming_projection_kept() {
        let mut root = projection(scan(), &[("k", "k"), ("a", "renamed")]);
        root.generate_output_schema().unwrap();
        let out = RemoveTrivialProjection
            .apply(&CompiledPlan::new(root))
            .unwrap();
        assert_eq!(out[0].root.node_type(), PlanNodeType::Projection);

        let mut narrow = projection(scan(), &[("a", "a")]);
        narrow.generate_output_schema().unwrap();
        let out = RemoveTrivialProjection
            .apply(&CompiledPlan::new(narrow))
            .unwrap();
        assert_eq!(out[0].root.node_type(), PlanNodeType::Projection);
    }

    #[test]
    fn test_projection_over_aggregate_kept() {
        let sum = SchemaColumn::new(
            TEMP_TABLE_NAME,
            "expr0",
            "c1",
            Expression::Aggregate(AggregateExpr {
                kind: AggregateKind::Sum,
                argument: Some(Box::new(Expression::TupleValue(TupleValue::new(
                    "t",
                    "a",
                    "a",
                    DataType::Int,
                )))),
                distinct: false,
                value_type: DataType::BigInt,
            }),
        );
        let aggregate = PlanNode::with_schema(
            PlanNodeKind::Aggregate {
                phase: AggregatePhase::Complete,
                group_by: Vec::new(),
            },
            vec![scan()],
            NodeSchema::new(vec![sum.clone()]),
        );
        let mut root = PlanNode::with_schema(
            PlanNodeKind::Projection,
            vec![aggregate],
            NodeSchema::new(vec![sum]),
        );
        root.generate_output_schema().unwrap();

        let out = RemoveTrivialProjection
            .apply(&CompiledPlan::new(root))
            .unwrap();
        assert_eq!(out[0].root.node_type(), PlanNodeType::Projection);
        match &out[0].root.output_schema.columns()[0].expression {
            Expression::TupleValue(tv) => assert_eq!(tv.table, TEMP_TABLE_NAME),
            other => panic!("Expected back-reference, got {:?}", other),
        }
    }
}
