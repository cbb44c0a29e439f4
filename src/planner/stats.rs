//! Plan statistics
//!
//! One recursive walk over a resolved plan estimates row counts and tuple
//! widths per node and accumulates the work each node kind contributes.
//! The resulting `PlanStatistics` is scored once by a cost model and then
//! dropped.
//!
//! Row counts below a `Send` are per partition. A `Receive` gathers the
//! rows of every partition, so it multiplies by the partition count and
//! charges the gathered rows as network traffic.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::catalog::{Catalog, DatabaseEstimates};
use crate::planner::error::{PlannerError, PlannerResult};
use crate::planner::physical::{IndexLookup, PlanNode, PlanNodeKind, PlanNodeType};
use crate::sql::{ComparisonOp, ConjunctionOp, Expression};

/// Selectivity of an equality predicate without hints
pub const EQUALITY_SELECTIVITY: f64 = 0.1;

/// Selectivity of a range predicate
pub const RANGE_SELECTIVITY: f64 = 0.3;

/// Fraction of grouping input rows assumed to be distinct groups
const GROUP_FRACTION: f64 = 0.1;

/// Fraction of rows assumed to survive DISTINCT
const DISTINCT_FRACTION: f64 = 0.5;

/// Accumulated quantities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum StatsField {
    /// Rows read from storage
    TuplesRead,
    /// Rows evaluated by joins, filters, projections and aggregations
    TuplesProcessed,
    /// Rows moved from partitions to the coordinator
    TuplesSent,
    /// Bytes moved from partitions to the coordinator
    BytesSent,
    /// Comparisons spent sorting
    SortWork,
    /// Index probes
    IndexLookups,
}

impl StatsField {
    pub const ALL: [StatsField; 6] = [
        StatsField::TuplesRead,
        StatsField::TuplesProcessed,
        StatsField::TuplesSent,
        StatsField::BytesSent,
        StatsField::SortWork,
        StatsField::IndexLookups,
    ];
}

/// Per-parameter information that sharpens estimates
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScalarValueHints {
    /// Fraction of rows an equality on this parameter is expected to match
    pub selectivity: Option<f64>,
}

impl ScalarValueHints {
    pub fn with_selectivity(selectivity: f64) -> Self {
        Self {
            selectivity: Some(selectivity.clamp(0.0, 1.0)),
        }
    }
}

/// Everything the estimate walk reads besides the plan
#[derive(Clone, Copy)]
pub struct EstimateContext<'a> {
    pub catalog: &'a Catalog,
    pub estimates: &'a DatabaseEstimates,
    /// Hints indexed by parameter number
    pub param_hints: &'a [ScalarValueHints],
}

/// Estimate for one sub-tree
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeEstimate {
    /// Rows produced (per partition below a `Send`)
    pub rows: f64,
    /// Bytes per produced row
    pub tuple_width: u32,
    /// Rows read from storage by the whole sub-tree, one execution
    pub subtree_tuples_read: f64,
}

/// Per node kind contribution
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NodeContribution {
    pub nodes: usize,
    pub rows_out: f64,
}

/// One-shot accumulator for a single plan
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanStatistics {
    totals: BTreeMap<StatsField, f64>,
    by_node_type: BTreeMap<PlanNodeType, NodeContribution>,
    /// Estimated rows the plan returns
    pub result_rows: f64,
}

impl PlanStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk a resolved plan and collect its statistics
    pub fn collect(plan: &PlanNode, ctx: &EstimateContext<'_>) -> PlannerResult<Self> {
        let mut stats = Self::new();
        let root = plan.compute_estimates_recursively(&mut stats, ctx)?;
        stats.result_rows = root.rows;
        Ok(stats)
    }

    pub fn add(&mut self, field: StatsField, value: f64) {
        *self.totals.entry(field).or_insert(0.0) += value;
    }

    pub fn get(&self, field: StatsField) -> f64 {
        self.totals.get(&field).copied().unwrap_or(0.0)
    }

    fn record_node(&mut self, node_type: PlanNodeType, rows_out: f64) {
        let entry = self.by_node_type.entry(node_type).or_default();
        entry.nodes += 1;
        entry.rows_out += rows_out;
    }

    /// Contribution of one node kind, if the plan has any such node
    pub fn node_contribution(&self, node_type: PlanNodeType) -> Option<NodeContribution> {
        self.by_node_type.get(&node_type).copied()
    }

    /// Total nodes visited by the walk
    pub fn nodes_visited(&self) -> usize {
        self.by_node_type.values().map(|c| c.nodes).sum()
    }
}

impl fmt::Display for PlanStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for field in StatsField::ALL {
            writeln!(f, "{:?}: {:.2}", field, self.get(field))?;
        }
        writeln!(f, "ResultRows: {:.2}", self.result_rows)?;
        for (node_type, c) in &self.by_node_type {
            writeln!(f, "{}: nodes={} rows={:.2}", node_type, c.nodes, c.rows_out)?;
        }
        Ok(())
    }
}

impl PlanNode {
    /// Estimate this sub-tree, adding its work to `stats`
    pub fn compute_estimates_recursively(
        &self,
        stats: &mut PlanStatistics,
        ctx: &EstimateContext<'_>,
    ) -> PlannerResult<NodeEstimate> {
        let mut inputs = Vec::with_capacity(self.children.len());
        for child in &self.children {
            inputs.push(child.compute_estimates_recursively(stats, ctx)?);
        }
        let width = self.output_schema.tuple_width();
        let child_read: f64 = inputs.iter().map(|i| i.subtree_tuples_read).sum();

        let estimate = match &self.kind {
            PlanNodeKind::SeqScan(scan) => {
                let rows = table_rows_per_site(&scan.table, scan.replicated, ctx)?;
                stats.add(StatsField::TuplesRead, rows);
                if scan.predicate.is_some() {
                    stats.add(StatsField::TuplesProcessed, rows);
                }
                NodeEstimate {
                    rows: rows * selectivity(scan.predicate.as_ref(), ctx),
                    tuple_width: width,
                    subtree_tuples_read: rows,
                }
            }

            PlanNodeKind::IndexScan(index) => {
                let rows = table_rows_per_site(&index.scan.table, index.scan.replicated, ctx)?;
                let complete_unique = index.unique
                    && index.lookup == IndexLookup::Equality
                    && ctx
                        .catalog
                        .get_index(&index.index)
                        .is_some_and(|def| def.columns.len() == index.covered_columns);

                let matched = if complete_unique {
                    rows.min(1.0)
                } else {
                    match index.lookup {
                        IndexLookup::Equality => index
                            .search_keys
                            .iter()
                            .fold(rows, |acc, key| acc * key_selectivity(key, ctx)),
                        IndexLookup::Range => rows * RANGE_SELECTIVITY,
                    }
                };
                let probe = rows.max(2.0).log2();

                stats.add(StatsField::IndexLookups, 1.0);
                stats.add(StatsField::TuplesRead, matched + probe);
                if index.scan.predicate.is_some() {
                    stats.add(StatsField::TuplesProcessed, matched);
                }
                NodeEstimate {
                    rows: matched * selectivity(index.scan.predicate.as_ref(), ctx),
                    tuple_width: width,
                    subtree_tuples_read: matched + probe,
                }
            }

            PlanNodeKind::NestLoop { predicate } => {
                let (outer, inner) = match inputs.as_slice() {
                    [outer, inner] => (*outer, *inner),
                    _ => return Err(wrong_children(self, 2)),
                };
                // The inner side is re-read for every outer row
                let rereads = (outer.rows - 1.0).max(0.0);
                stats.add(StatsField::TuplesRead, rereads * inner.subtree_tuples_read);
                let pairs = outer.rows * inner.rows;
                stats.add(StatsField::TuplesProcessed, pairs);
                NodeEstimate {
                    rows: pairs * selectivity(predicate.as_ref(), ctx),
                    tuple_width: width,
                    subtree_tuples_read: outer.subtree_tuples_read
                        + outer.rows.max(1.0) * inner.subtree_tuples_read,
                }
            }

            PlanNodeKind::Aggregate { group_by, .. } => {
                let input = single_input(self, &inputs)?;
                stats.add(StatsField::TuplesProcessed, input.rows);
                let rows = if group_by.is_empty() {
                    1.0
                } else {
                    (input.rows * GROUP_FRACTION).max(1.0)
                };
                NodeEstimate {
                    rows,
                    tuple_width: width,
                    subtree_tuples_read: child_read,
                }
            }

            PlanNodeKind::Projection => {
                let input = single_input(self, &inputs)?;
                stats.add(StatsField::TuplesProcessed, input.rows);
                NodeEstimate {
                    rows: input.rows,
                    tuple_width: width,
                    subtree_tuples_read: child_read,
                }
            }

            PlanNodeKind::OrderBy { .. } => {
                let input = single_input(self, &inputs)?;
                let n = input.rows;
                stats.add(StatsField::SortWork, n * n.max(2.0).log2());
                NodeEstimate {
                    rows: n,
                    tuple_width: width,
                    subtree_tuples_read: child_read,
                }
            }

            PlanNodeKind::Limit { limit, offset } => {
                let input = single_input(self, &inputs)?;
                let available = (input.rows - *offset as f64).max(0.0);
                let rows = match limit {
                    Some(l) => (*l as f64).min(available),
                    None => available,
                };
                NodeEstimate {
                    rows,
                    tuple_width: width,
                    subtree_tuples_read: child_read,
                }
            }

            PlanNodeKind::Distinct => {
                let input = single_input(self, &inputs)?;
                stats.add(StatsField::TuplesProcessed, input.rows);
                NodeEstimate {
                    rows: (input.rows * DISTINCT_FRACTION).max(1.0_f64.min(input.rows)),
                    tuple_width: width,
                    subtree_tuples_read: child_read,
                }
            }

            PlanNodeKind::SetOp { .. } => {
                if inputs.is_empty() {
                    return Err(wrong_children(self, 1));
                }
                let rows: f64 = inputs.iter().map(|i| i.rows).sum();
                stats.add(StatsField::TuplesProcessed, rows);
                NodeEstimate {
                    rows,
                    tuple_width: width,
                    subtree_tuples_read: child_read,
                }
            }

            PlanNodeKind::Send => {
                let input = single_input(self, &inputs)?;
                NodeEstimate {
                    rows: input.rows,
                    tuple_width: width,
                    subtree_tuples_read: child_read,
                }
            }

            PlanNodeKind::Receive { .. } => {
                let input = single_input(self, &inputs)?;
                if self.children[0].node_type() != PlanNodeType::Send {
                    return Err(PlannerError::InvariantViolation(
                        "Receive node is not fed by a Send node".to_string(),
                    ));
                }
                let rows = input.rows * f64::from(ctx.catalog.partition_count());
                stats.add(StatsField::TuplesSent, rows);
                stats.add(StatsField::BytesSent, rows * f64::from(input.tuple_width));
                NodeEstimate {
                    rows,
                    tuple_width: width,
                    subtree_tuples_read: child_read,
                }
            }
        };

        stats.record_node(self.node_type(), estimate.rows);
        Ok(estimate)
    }
}

fn single_input(node: &PlanNode, inputs: &[NodeEstimate]) -> PlannerResult<NodeEstimate> {
    match inputs {
        [input] => Ok(*input),
        _ => Err(wrong_children(node, 1)),
    }
}

fn wrong_children(node: &PlanNode, expected: usize) -> PlannerError {
    PlannerError::InvariantViolation(format!(
        "{} node has {} children, expected {}",
        node.node_type(),
        node.children.len(),
        expected
    ))
}

/// Rows one site reads from a table
fn table_rows_per_site(
    table: &str,
    replicated: bool,
    ctx: &EstimateContext<'_>,
) -> PlannerResult<f64> {
    if !ctx.catalog.table_exists(table) {
        return Err(PlannerError::InvariantViolation(format!(
            "Plan scans unknown table '{}'",
            table
        )));
    }
    let total = ctx.estimates.rows_for(table) as f64;
    if replicated {
        Ok(total)
    } else {
        Ok(total / f64::from(ctx.catalog.partition_count()))
    }
}

/// Selectivity of an index search key
fn key_selectivity(key: &Expression, ctx: &EstimateContext<'_>) -> f64 {
    match key {
        Expression::Parameter { index, .. } => ctx
            .param_hints
            .get(*index)
            .and_then(|h| h.selectivity)
            .unwrap_or(EQUALITY_SELECTIVITY),
        _ => EQUALITY_SELECTIVITY,
    }
}

/// Selectivity of an optional filter
fn selectivity(predicate: Option<&Expression>, ctx: &EstimateContext<'_>) -> f64 {
    predicate.map_or(1.0, |p| expression_selectivity(p, ctx))
}

fn expression_selectivity(expr: &Expression, ctx: &EstimateContext<'_>) -> f64 {
    match expr {
        Expression::Comparison { op, left, right } => match op {
            ComparisonOp::Eq => {
                if matches!(**right, Expression::Parameter { .. }) {
                    key_selectivity(right, ctx)
                } else if matches!(**left, Expression::Parameter { .. }) {
                    key_selectivity(left, ctx)
                } else {
                    EQUALITY_SELECTIVITY
                }
            }
            ComparisonOp::NotEq => 1.0 - EQUALITY_SELECTIVITY,
            ComparisonOp::Like => 0.25,
            _ => RANGE_SELECTIVITY,
        },
        Expression::Conjunction { op, left, right } => {
            let l = expression_selectivity(left, ctx);
            let r = expression_selectivity(right, ctx);
            match op {
                ConjunctionOp::And => l * r,
                ConjunctionOp::Or => l + r - l * r,
            }
        }
        Expression::Not(inner) => 1.0 - expression_selectivity(inner, ctx),
        Expression::IsNull { negated, .. } => {
            if *negated {
                1.0 - EQUALITY_SELECTIVITY
            } else {
                EQUALITY_SELECTIVITY
            }
        }
        _ => 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::physical::{NodeSchema, ScanNode};
    use crate::planner::test_utils::test_catalog;
    use crate::sql::{Literal, ParsedTable, TupleValue};

    fn scan_of(catalog: &Catalog, name: &str, predicate: Option<Expression>) -> PlanNode {
        let def = catalog.get_table(name).unwrap();
        let table = ParsedTable {
            name: name.to_string(),
            range_name: name.to_string(),
            partition_column: def.partition_column.clone(),
            columns: def.columns.clone(),
        };
        let mut node = PlanNode::new(
            PlanNodeKind::SeqScan(ScanNode {
                table: name.to_string(),
                range_name: name.to_string(),
                table_schema: NodeSchema::for_table(&table),
                predicate,
                replicated: def.is_replicated(),
            }),
            Vec::new(),
        );
        node.generate_output_schema().unwrap();
        node
    }

    fn ctx<'a>(catalog: &'a Catalog, estimates: &'a DatabaseEstimates) -> EstimateContext<'a> {
        EstimateContext {
            catalog,
            estimates,
            param_hints: &[],
        }
    }

    #[test]
    fn test_partitioned_scan_reads_one_share() {
        let catalog = test_catalog();
        let estimates = DatabaseEstimates::new().table_rows("t", 4000);
        let plan = scan_of(&catalog, "t", None);

        let stats = PlanStatistics::collect(&plan, &ctx(&catalog, &estimates)).unwrap();
        assert_eq!(stats.get(StatsField::TuplesRead), 1000.0);
        assert_eq!(stats.result_rows, 1000.0);
        assert_eq!(stats.nodes_visited(), 1);
    }

    #[test]
    fn test_receive_counts_network_rows() {
        let catalog = test_catalog();
        let estimates = DatabaseEstimates::new().table_rows("t", 4000);
        let mut plan = PlanNode::gather(scan_of(&catalog, "t", None));
        plan.generate_output_schema().unwrap();

        let stats = PlanStatistics::collect(&plan, &ctx(&catalog, &estimates)).unwrap();
        assert_eq!(stats.get(StatsField::TuplesSent), 4000.0);
        assert!(stats.get(StatsField::BytesSent) > 0.0);
        assert_eq!(
            stats.node_contribution(PlanNodeType::Receive).unwrap().nodes,
            1
        );
    }

    #[test]
    fn test_equality_filter_uses_parameter_hint() {
        let catalog = test_catalog();
        let estimates = DatabaseEstimates::new();
        let pred = Expression::compare(
            ComparisonOp::Eq,
            Expression::TupleValue(TupleValue::new("r", "id", "id", crate::catalog::DataType::Int)),
            Expression::Parameter {
                index: 0,
                value_type: crate::catalog::DataType::Int,
            },
        );
        let plan = scan_of(&catalog, "r", Some(pred));

        let hints = [ScalarValueHints::with_selectivity(0.5)];
        let ctx = EstimateContext {
            catalog: &catalog,
            estimates: &estimates,
            param_hints: &hints,
        };
        let stats = PlanStatistics::collect(&plan, &ctx).unwrap();
        assert_eq!(stats.result_rows, 500.0);

        let plain = PlanStatistics::collect(&plan, &self::ctx(&catalog, &estimates)).unwrap();
        assert!((plain.result_rows - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_table_is_invariant_violation() {
        let catalog = test_catalog();
        let estimates = DatabaseEstimates::new();
        let mut plan = scan_of(&catalog, "t", None);
        if let PlanNodeKind::SeqScan(scan) = &mut plan.kind {
            scan.table = "missing".to_string();
        }
        assert!(matches!(
            PlanStatistics::collect(&plan, &ctx(&catalog, &estimates)),
            Err(PlannerError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_limit_caps_rows() {
        let catalog = test_catalog();
        let estimates = DatabaseEstimates::new();
        let mut plan = PlanNode::new(
            PlanNodeKind::Limit {
                limit: Some(10),
                offset: 0,
            },
            vec![scan_of(&catalog, "r", Some(Expression::Constant(Literal::Boolean(true))))],
        );
        plan.generate_output_schema().unwrap();
        let stats = PlanStatistics::collect(&plan, &ctx(&catalog, &estimates)).unwrap();
        assert_eq!(stats.result_rows, 10.0);
    }
}
