//! Candidate plan assembly
//!
//! The search loop pulls raw candidates from a `CandidateGenerator` until
//! it reports exhaustion. `PlanAssembler` is the default generator: for
//! each join order it walks every combination of table access paths and
//! builds one complete plan per combination.
//!
//! ## Plan shape
//!
//! ```text
//! [Send]                      only when the plan is final
//!   Limit
//!     OrderBy
//!       Distinct
//!         Projection          select list
//!           Aggregate         complete, or final over partials
//!             Receive         multi-partition plans only
//!               Send
//!                 Aggregate   partial
//!                   NestLoop  left-deep join tree
//!                     ...
//! ```
//!
//! Nodes whose clause is absent from the statement are left out.

use std::collections::BTreeMap;

use tracing::debug;

use crate::catalog::Catalog;
use crate::planner::compiled::CompiledPlan;
use crate::planner::error::{PlannerError, PlannerResult};
use crate::planner::physical::{
    AggregatePhase, IndexLookup, IndexScanNode, NodeSchema, PlanNode, PlanNodeKind, ScanNode,
    SchemaColumn, SortKey,
};
use crate::sql::{
    AggregateExpr, ComparisonOp, Expression, ParsedSelect, ParsedStatement, ParsedTable,
    ParsedUnion, SetOpKind, TupleValue,
};

/// Message for partitioned tables joined on something other than their
/// partition columns
pub const INSUFFICIENT_JOIN_CRITERIA: &str =
    "Join of multiple partitioned tables has insufficient join criteria.";

/// Source of raw candidate plans
pub trait CandidateGenerator {
    /// Prepare to enumerate plans for one select
    fn setup_for_new_plans(&mut self, select: &ParsedSelect) -> PlannerResult<()>;

    /// Check the partitioning of a whole statement before any branch is planned
    fn verify_table_partition(&self, stmt: &ParsedStatement) -> PlannerResult<()>;

    /// Next candidate, or `None` once the space is exhausted
    ///
    /// Final plans end in a `Send` to the client; set-operation branches
    /// are not final.
    fn next_plan(&mut self, is_final: bool) -> PlannerResult<Option<CompiledPlan>>;

    /// Put the best plan of each branch under one set operation
    fn combine_union_plans(
        &mut self,
        union: &ParsedUnion,
        op: SetOpKind,
        children: Vec<CompiledPlan>,
    ) -> PlannerResult<CompiledPlan>;
}

/// Partitioning decision for a statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitioningForStatement {
    /// Run the whole statement on one partition
    pub single_partition: bool,
}

impl PartitioningForStatement {
    /// Let the planner infer the partitioning from the statement
    pub fn inferred() -> Self {
        Self::default()
    }

    /// The caller runs the statement on a single partition
    pub fn forced_single() -> Self {
        Self {
            single_partition: true,
        }
    }
}

/// How one table range is read
#[derive(Debug, Clone, PartialEq)]
enum AccessPath {
    Sequential,
    Index {
        name: String,
        unique: bool,
        lookup: IndexLookup,
        covered: usize,
        keys: Vec<Expression>,
        /// Conjuncts answered by the index lookup itself
        consumed: Vec<usize>,
    },
}

/// Enumeration cursor for one select
struct SearchState {
    select: ParsedSelect,
    /// Current join order, as indexes into `select.tables`
    order: Vec<usize>,
    /// Whether later orders are generated by permuting `order`
    permute: bool,
    /// Access paths per table, indexed like `select.tables`
    paths: Vec<Vec<AccessPath>>,
    /// Chosen path per table, indexed like `select.tables`
    choice: Vec<usize>,
    exhausted: bool,
}

impl SearchState {
    /// Step the access-path odometer, then the join order; orders are
    /// produced one at a time in lexicographic order
    fn advance(&mut self) {
        for pos in (0..self.choice.len()).rev() {
            self.choice[pos] += 1;
            if self.choice[pos] < self.paths[pos].len() {
                return;
            }
            self.choice[pos] = 0;
        }
        if !self.permute || !next_permutation(&mut self.order) {
            self.exhausted = true;
        }
    }
}

/// Default candidate generator
pub struct PlanAssembler<'a> {
    catalog: &'a Catalog,
    partitioning: PartitioningForStatement,
    state: Option<SearchState>,
}

impl<'a> PlanAssembler<'a> {
    pub fn new(catalog: &'a Catalog, partitioning: PartitioningForStatement) -> Self {
        Self {
            catalog,
            partitioning,
            state: None,
        }
    }

    /// Partitioned tables must be joined on their partition columns, or
    /// pinned to the same value
    fn check_partitioned_joins(&self, select: &ParsedSelect) -> PlannerResult<()> {
        let partitioned: Vec<(&str, &str)> = select
            .tables
            .iter()
            .filter_map(|t| {
                t.partition_column
                    .as_deref()
                    .map(|col| (t.range_name.as_str(), col))
            })
            .collect();
        if partitioned.len() < 2 {
            return Ok(());
        }

        let position = |tv: &TupleValue| {
            partitioned
                .iter()
                .position(|(range, col)| tv.table == *range && tv.column == *col)
        };
        let mut label: Vec<usize> = (0..partitioned.len()).collect();
        let merge = |label: &mut Vec<usize>, a: usize, b: usize| {
            let (from, to) = (label[b], label[a]);
            for l in label.iter_mut() {
                if *l == from {
                    *l = to;
                }
            }
        };

        let mut pins: BTreeMap<String, usize> = BTreeMap::new();
        for conjunct in &select.conjuncts {
            if let Some((l, r)) = column_equality(conjunct) {
                if let (Some(a), Some(b)) = (position(l), position(r)) {
                    merge(&mut label, a, b);
                }
            }
            for (pos, (range, col)) in partitioned.iter().enumerate() {
                if let Some(value) = pinning_value(conjunct, range, col) {
                    match pins.get(&value.to_string()) {
                        Some(&first) => merge(&mut label, first, pos),
                        None => {
                            pins.insert(value.to_string(), pos);
                        }
                    }
                }
            }
        }

        if label.iter().all(|l| *l == label[0]) {
            Ok(())
        } else {
            Err(PlannerError::Partitioning(
                INSUFFICIENT_JOIN_CRITERIA.to_string(),
            ))
        }
    }

    /// First join order to try and whether to permute it further
    fn first_join_order(&self, select: &ParsedSelect) -> PlannerResult<(Vec<usize>, bool)> {
        let Some(names) = &select.join_order else {
            return Ok(((0..select.tables.len()).collect(), true));
        };

        let mut order = Vec::with_capacity(names.len());
        for name in names {
            let idx = select
                .tables
                .iter()
                .position(|t| t.range_name.eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    PlannerError::Planning(format!(
                        "Join order names '{}', which is not a table of the statement",
                        name
                    ))
                })?;
            if order.contains(&idx) {
                return Err(PlannerError::Planning(format!(
                    "Join order names '{}' more than once",
                    name
                )));
            }
            order.push(idx);
        }
        if order.len() != select.tables.len() {
            return Err(PlannerError::Planning(
                "Join order must name every table of the statement".to_string(),
            ));
        }
        Ok((order, false))
    }

    /// Sequential scan first, then usable indexes in name order
    fn access_paths(&self, select: &ParsedSelect, table: &ParsedTable) -> Vec<AccessPath> {
        let mut paths = vec![AccessPath::Sequential];
        for index in self.catalog.get_indexes_for_table(&table.name) {
            let mut keys = Vec::new();
            let mut consumed = Vec::new();
            for column in &index.columns {
                let found = select.conjuncts.iter().enumerate().find_map(|(i, c)| {
                    pinning_value(c, &table.range_name, column).map(|v| (i, v.clone()))
                });
                match found {
                    Some((i, value)) => {
                        consumed.push(i);
                        keys.push(value);
                    }
                    None => break,
                }
            }

            if !keys.is_empty() {
                paths.push(AccessPath::Index {
                    name: index.name.clone(),
                    unique: index.unique,
                    lookup: IndexLookup::Equality,
                    covered: keys.len(),
                    keys,
                    consumed,
                });
                continue;
            }

            let Some(first) = index.columns.first() else {
                continue;
            };
            let range = select.conjuncts.iter().enumerate().find_map(|(i, c)| {
                range_bound(c, &table.range_name, first).map(|v| (i, v.clone()))
            });
            if let Some((_, bound)) = range {
                // Range conjuncts stay on the scan as a filter
                paths.push(AccessPath::Index {
                    name: index.name.clone(),
                    unique: index.unique,
                    lookup: IndexLookup::Range,
                    covered: 1,
                    keys: vec![bound],
                    consumed: Vec::new(),
                });
            }
        }
        paths
    }

    /// Whether every partitioned table is restricted to one partition
    fn all_partitioned_pinned(select: &ParsedSelect) -> bool {
        select.tables.iter().all(|t| match &t.partition_column {
            None => true,
            Some(col) => select
                .conjuncts
                .iter()
                .any(|c| pinning_value(c, &t.range_name, col).is_some()),
        })
    }

    fn assemble(
        &self,
        state: &SearchState,
        order: &[usize],
        choice: &[usize],
        is_final: bool,
    ) -> PlannerResult<CompiledPlan> {
        let select = &state.select;
        let touches_partitioned = select.tables.iter().any(|t| !t.is_replicated());
        let single_partition = self.partitioning.single_partition
            || !touches_partitioned
            || (is_final && Self::all_partitioned_pinned(select));

        let (mut plan, single_table_index) = self.join_tree(state, order, choice)?;

        if single_partition {
            if select.is_aggregate() {
                plan = complete_aggregate(select, plan);
            }
        } else if select.is_aggregate() && aggregates_are_splittable(select) {
            let partial = partial_aggregate(select, plan);
            plan = final_aggregate(select, PlanNode::gather(partial));
        } else {
            plan = PlanNode::gather(plan);
            if select.is_aggregate() {
                plan = complete_aggregate(select, plan);
            }
        }

        let projection = select.display_columns.iter().map(SchemaColumn::from).collect();
        plan = PlanNode::with_schema(
            PlanNodeKind::Projection,
            vec![plan],
            NodeSchema::new(projection),
        );

        if select.distinct {
            plan = PlanNode::new(PlanNodeKind::Distinct, vec![plan]);
        }
        if !select.order_by.is_empty() {
            let keys = select
                .order_by
                .iter()
                .map(|o| SortKey {
                    expression: Expression::TupleValue(o.column.unresolved()),
                    ascending: o.ascending,
                })
                .collect();
            plan = PlanNode::new(PlanNodeKind::OrderBy { keys }, vec![plan]);
        }
        if select.limit.is_some() || select.offset.is_some() {
            plan = PlanNode::new(
                PlanNodeKind::Limit {
                    limit: select.limit,
                    offset: select.offset.unwrap_or(0),
                },
                vec![plan],
            );
        }
        if is_final {
            plan = PlanNode::new(PlanNodeKind::Send, vec![plan]);
        }
        plan.generate_output_schema()?;

        let order_deterministic = !select.order_by.is_empty()
            || select.is_single_row_aggregate()
            || (single_partition && single_table_index);
        let content_deterministic =
            (select.limit.is_none() && select.offset.is_none()) || order_deterministic;

        let mut compiled = CompiledPlan::new(plan);
        compiled.single_partition = single_partition;
        compiled.order_deterministic = order_deterministic;
        compiled.content_deterministic = content_deterministic;
        compiled.parameter_types = select.param_types.clone();
        Ok(compiled)
    }

    /// Left-deep join tree; also reports whether the plan is a lone index scan
    fn join_tree(
        &self,
        state: &SearchState,
        order: &[usize],
        choice: &[usize],
    ) -> PlannerResult<(PlanNode, bool)> {
        let select = &state.select;
        let mut placed = vec![false; select.conjuncts.len()];

        let mut scans = Vec::with_capacity(order.len());
        for (pos, &table_idx) in order.iter().enumerate() {
            let table = &select.tables[table_idx];
            let path = state.paths[table_idx]
                .get(choice[table_idx])
                .ok_or_else(|| {
                    PlannerError::InvariantViolation(format!(
                        "No access path {} for table '{}'",
                        choice[table_idx], table.range_name
                    ))
                })?;

            if let AccessPath::Index { consumed, .. } = path {
                for &i in consumed {
                    placed[i] = true;
                }
            }
            let mut filters = Vec::new();
            for (i, conjunct) in select.conjuncts.iter().enumerate() {
                if placed[i] {
                    continue;
                }
                let tables = conjunct.tables_referenced();
                let local = (tables.len() == 1 && tables.contains(&table.range_name))
                    || (tables.is_empty() && pos == 0);
                if local {
                    placed[i] = true;
                    filters.push(conjunct.clone());
                }
            }
            scans.push(scan_node(table, path, Expression::and_all(filters)));
        }

        let single_table_index =
            scans.len() == 1 && matches!(scans[0].kind, PlanNodeKind::IndexScan(_));

        let mut scans = scans.into_iter();
        let mut plan = scans.next().ok_or_else(|| {
            PlannerError::InvariantViolation("Select reads no tables".to_string())
        })?;
        let mut joined = vec![select.tables[order[0]].range_name.clone()];
        for (scan, &table_idx) in scans.zip(order.iter().skip(1)) {
            joined.push(select.tables[table_idx].range_name.clone());
            let mut predicates = Vec::new();
            for (i, conjunct) in select.conjuncts.iter().enumerate() {
                if placed[i] {
                    continue;
                }
                if conjunct
                    .tables_referenced()
                    .iter()
                    .all(|t| joined.contains(t))
                {
                    placed[i] = true;
                    predicates.push(conjunct.clone());
                }
            }
            plan = PlanNode::new(
                PlanNodeKind::NestLoop {
                    predicate: Expression::and_all(predicates),
                },
                vec![plan, scan],
            );
        }

        if placed.iter().any(|p| !p) {
            return Err(PlannerError::InvariantViolation(
                "Predicate references a table outside the statement".to_string(),
            ));
        }
        Ok((plan, single_table_index))
    }
}

impl CandidateGenerator for PlanAssembler<'_> {
    fn setup_for_new_plans(&mut self, select: &ParsedSelect) -> PlannerResult<()> {
        self.check_partitioned_joins(select)?;
        let (order, permute) = self.first_join_order(select)?;
        let paths: Vec<_> = select
            .tables
            .iter()
            .map(|t| self.access_paths(select, t))
            .collect();
        debug!(
            tables = select.tables.len(),
            explicit_join_order = !permute,
            "set up plan enumeration"
        );

        self.state = Some(SearchState {
            select: select.clone(),
            exhausted: select.tables.is_empty(),
            choice: vec![0; paths.len()],
            order,
            permute,
            paths,
        });
        Ok(())
    }

    fn verify_table_partition(&self, stmt: &ParsedStatement) -> PlannerResult<()> {
        for select in stmt.selects() {
            self.check_partitioned_joins(select)?;
        }
        Ok(())
    }

    fn next_plan(&mut self, is_final: bool) -> PlannerResult<Option<CompiledPlan>> {
        let (order, choice) = match self.state.as_mut() {
            Some(state) if !state.exhausted => {
                let current = (state.order.clone(), state.choice.clone());
                state.advance();
                current
            }
            _ => return Ok(None),
        };
        let Some(state) = self.state.as_ref() else {
            return Ok(None);
        };
        self.assemble(state, &order, &choice, is_final).map(Some)
    }

    fn combine_union_plans(
        &mut self,
        union: &ParsedUnion,
        op: SetOpKind,
        children: Vec<CompiledPlan>,
    ) -> PlannerResult<CompiledPlan> {
        if children.len() != union.children.len() {
            return Err(PlannerError::InvariantViolation(format!(
                "Set operation has {} branches but {} plans",
                union.children.len(),
                children.len()
            )));
        }

        let single_partition = children.iter().all(|c| c.single_partition);
        let mut parameter_types = Vec::new();
        let mut roots = Vec::with_capacity(children.len());
        for child in children {
            parameter_types.extend(child.parameter_types);
            roots.push(child.root);
        }

        let setop = PlanNode::new(PlanNodeKind::SetOp { op }, roots);
        let mut root = PlanNode::new(PlanNodeKind::Send, vec![setop]);
        root.generate_output_schema()?;

        let mut plan = CompiledPlan::new(root);
        plan.single_partition = single_partition;
        plan.parameter_types = parameter_types;
        Ok(plan)
    }
}

fn scan_node(table: &ParsedTable, path: &AccessPath, predicate: Option<Expression>) -> PlanNode {
    let scan = ScanNode {
        table: table.name.clone(),
        range_name: table.range_name.clone(),
        table_schema: NodeSchema::for_table(table),
        predicate,
        replicated: table.is_replicated(),
    };
    let kind = match path {
        AccessPath::Sequential => PlanNodeKind::SeqScan(scan),
        AccessPath::Index {
            name,
            unique,
            lookup,
            covered,
            keys,
            ..
        } => PlanNodeKind::IndexScan(IndexScanNode {
            scan,
            index: name.clone(),
            unique: *unique,
            lookup: *lookup,
            covered_columns: *covered,
            search_keys: keys.clone(),
        }),
    };
    PlanNode::new(kind, Vec::new())
}

/// Aggregates that can be computed per partition and combined
fn aggregates_are_splittable(select: &ParsedSelect) -> bool {
    select
        .display_columns
        .iter()
        .all(|c| match &c.expression {
            Expression::Aggregate(agg) => !agg.distinct && agg.kind.combining_kind().is_some(),
            _ => true,
        })
}

/// Group-by columns as they appear in an aggregate's output
fn group_columns(select: &ParsedSelect) -> Vec<SchemaColumn> {
    select
        .group_by
        .iter()
        .map(|g| {
            SchemaColumn::new(
                g.table.clone(),
                g.column.clone(),
                g.alias.clone(),
                Expression::TupleValue(g.unresolved()),
            )
        })
        .collect()
}

fn group_keys(select: &ParsedSelect) -> Vec<Expression> {
    select
        .group_by
        .iter()
        .map(|g| Expression::TupleValue(g.unresolved()))
        .collect()
}

fn aggregate_node(
    select: &ParsedSelect,
    phase: AggregatePhase,
    input: PlanNode,
    aggregate_column: impl Fn(&SchemaColumn, &AggregateExpr) -> SchemaColumn,
) -> PlanNode {
    let mut columns = group_columns(select);
    for display in &select.display_columns {
        if let Expression::Aggregate(agg) = &display.expression {
            columns.push(aggregate_column(&SchemaColumn::from(display), agg));
        }
    }
    PlanNode::with_schema(
        PlanNodeKind::Aggregate {
            phase,
            group_by: group_keys(select),
        },
        vec![input],
        NodeSchema::new(columns),
    )
}

fn complete_aggregate(select: &ParsedSelect, input: PlanNode) -> PlanNode {
    aggregate_node(select, AggregatePhase::Complete, input, |col, _| col.clone())
}

fn partial_aggregate(select: &ParsedSelect, input: PlanNode) -> PlanNode {
    aggregate_node(select, AggregatePhase::Partial, input, |col, agg| {
        let partial = AggregateExpr {
            value_type: agg.kind.result_type(
                agg.argument.as_deref().map(|a| a.value_type()).as_ref(),
            ),
            ..agg.clone()
        };
        SchemaColumn::new(
            col.table.clone(),
            col.column.clone(),
            col.alias.clone(),
            Expression::Aggregate(partial),
        )
    })
}

/// Combines partial results; each aggregate reads the partial column with
/// the same identity
fn final_aggregate(select: &ParsedSelect, input: PlanNode) -> PlanNode {
    aggregate_node(select, AggregatePhase::Final, input, |col, agg| {
        let partial_type = agg
            .kind
            .result_type(agg.argument.as_deref().map(|a| a.value_type()).as_ref());
        let partial = TupleValue::new(
            col.table.clone(),
            col.column.clone(),
            col.alias.clone(),
            partial_type,
        );
        let combined = AggregateExpr {
            kind: agg.kind.combining_kind().unwrap_or(agg.kind),
            distinct: false,
            argument: Some(Box::new(Expression::TupleValue(partial))),
            value_type: agg.value_type.clone(),
        };
        SchemaColumn::new(
            col.table.clone(),
            col.column.clone(),
            col.alias.clone(),
            Expression::Aggregate(combined),
        )
    })
}

/// `range.column = constant|parameter`, in either orientation
fn pinning_value<'e>(conjunct: &'e Expression, range: &str, column: &str) -> Option<&'e Expression> {
    let Expression::Comparison {
        op: ComparisonOp::Eq,
        left,
        right,
    } = conjunct
    else {
        return None;
    };
    match (left.as_ref(), right.as_ref()) {
        (Expression::TupleValue(tv), other) | (other, Expression::TupleValue(tv))
            if tv.table == range && tv.column == column && other.is_constant_or_parameter() =>
        {
            Some(other)
        }
        _ => None,
    }
}

/// Bound of a range comparison between `range.column` and a constant or
/// parameter
fn range_bound<'e>(conjunct: &'e Expression, range: &str, column: &str) -> Option<&'e Expression> {
    let Expression::Comparison { op, left, right } = conjunct else {
        return None;
    };
    if !op.is_range() {
        return None;
    }
    match (left.as_ref(), right.as_ref()) {
        (Expression::TupleValue(tv), other) | (other, Expression::TupleValue(tv))
            if tv.table == range && tv.column == column && other.is_constant_or_parameter() =>
        {
            Some(other)
        }
        _ => None,
    }
}

/// `a.x = b.y` between two columns
fn column_equality(conjunct: &Expression) -> Option<(&TupleValue, &TupleValue)> {
    match conjunct {
        Expression::Comparison {
            op: ComparisonOp::Eq,
            left,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (Expression::TupleValue(l), Expression::TupleValue(r)) => Some((l, r)),
            _ => None,
        },
        _ => None,
    }
}

/// Step `v` to its lexicographic successor; false once `v` is the last
fn next_permutation(v: &mut [usize]) -> bool {
    if v.len() < 2 {
        return false;
    }
    let mut i = v.len() - 1;
    while i > 0 && v[i - 1] >= v[i] {
        i -= 1;
    }
    if i == 0 {
        return false;
    }
    let mut j = v.len() - 1;
    while v[j] <= v[i - 1] {
        j -= 1;
    }
    v.swap(i - 1, j);
    v[i..].reverse();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::physical::PlanNodeType;
    use crate::planner::test_utils::test_catalog;
    use crate::sql::{SemanticParser, StatementParser, TEMP_TABLE_NAME};

    fn select(catalog: &Catalog, sql: &str, join_order: Option<&str>) -> ParsedSelect {
        match SemanticParser::new(catalog).parse(sql, join_order).unwrap() {
            ParsedStatement::Select(s) => s,
            _ => panic!("Expected select"),
        }
    }

    fn all_plans(catalog: &Catalog, sql: &str, join_order: Option<&str>) -> Vec<CompiledPlan> {
        let mut assembler = PlanAssembler::new(catalog, PartitioningForStatement::inferred());
        assembler
            .setup_for_new_plans(&select(catalog, sql, join_order))
            .unwrap();
        let mut plans = Vec::new();
        while let Some(plan) = assembler.next_plan(true).unwrap() {
            plans.push(plan);
        }
        plans
    }

    #[test]
    fn test_permutations_lexicographic() {
        let mut current = vec![0, 1, 2];
        let mut seen = vec![current.clone()];
        while next_permutation(&mut current) {
            seen.push(current.clone());
        }
        assert_eq!(
            seen,
            vec![
                vec![0, 1, 2],
                vec![0, 2, 1],
                vec![1, 0, 2],
                vec![1, 2, 0],
                vec![2, 0, 1],
                vec![2, 1, 0],
            ]
        );
        assert!(!next_permutation(&mut [0]));
    }

    #[test]
    fn test_seq_scan_first_then_index() {
        let catalog = test_catalog();
        let plans = all_plans(&catalog, "SELECT a FROM t WHERE t.k = 5", None);
        assert_eq!(plans.len(), 2);
        assert!(plans[0].root.contains(PlanNodeType::SeqScan));
        assert!(plans[1].root.contains(PlanNodeType::IndexScan));

        // Pinned to one partition: no gather
        for plan in &plans {
            assert!(plan.single_partition);
            assert!(!plan.root.contains(PlanNodeType::Receive));
            assert_eq!(plan.root.node_type(), PlanNodeType::Send);
        }
        assert!(!plans[0].order_deterministic);
        assert!(plans[1].order_deterministic);
    }

    #[test]
    fn test_multi_partition_gathers() {
        let catalog = test_catalog();
        let plans = all_plans(&catalog, "SELECT a FROM t", None);
        assert_eq!(plans.len(), 1);
        let plan = &plans[0];
        assert!(!plan.single_partition);
        assert_eq!(plan.root.find_all(PlanNodeType::Receive).len(), 1);
        assert_eq!(plan.root.find_all(PlanNodeType::Send).len(), 2);
    }

    #[test]
    fn test_replicated_table_is_single_partition() {
        let catalog = test_catalog();
        let plans = all_plans(&catalog, "SELECT name FROM r", None);
        assert!(plans[0].single_partition);
        assert!(!plans[0].root.contains(PlanNodeType::Receive));
    }

    #[test]
    fn test_sum_splits_into_partial_and_final() {
        let catalog = test_catalog();
        let plans = all_plans(&catalog, "SELECT SUM(x) FROM t", None);
        let aggs = plans[0].root.find_all(PlanNodeType::Aggregate);
        assert_eq!(aggs.len(), 2);
        match (&aggs[0].kind, &aggs[1].kind) {
            (
                PlanNodeKind::Aggregate {
                    phase: AggregatePhase::Final,
                    ..
                },
                PlanNodeKind::Aggregate {
                    phase: AggregatePhase::Partial,
                    ..
                },
            ) => {}
            other => panic!("Expected final over partial, got {:?}", other),
        }

        let projection = &plans[0].root.find_all(PlanNodeType::Projection)[0];
        match &projection.output_schema.columns()[0].expression {
            Expression::TupleValue(tv) => assert_eq!(tv.table, TEMP_TABLE_NAME),
            other => panic!("Expected back-reference, got {:?}", other),
        }
        assert!(plans[0].order_deterministic);
    }

    #[test]
    fn test_avg_is_not_split() {
        let catalog = test_catalog();
        let plans = all_plans(&catalog, "SELECT AVG(x) FROM t", None);
        let aggs = plans[0].root.find_all(PlanNodeType::Aggregate);
        assert_eq!(aggs.len(), 1);
        match &aggs[0].kind {
            PlanNodeKind::Aggregate { phase, .. } => assert_eq!(*phase, AggregatePhase::Complete),
            _ => panic!("Expected aggregate"),
        }
        assert_eq!(aggs[0].children[0].node_type(), PlanNodeType::Receive);
    }

    #[test]
    fn test_join_orders_and_predicate_placement() {
        let catalog = test_catalog();
        let plans = all_plans(
            &catalog,
            "SELECT t.a, r.name FROM t, r WHERE t.a = r.id AND r.id > 3",
            None,
        );
        // Two orders, one access path each
        assert_eq!(plans.len(), 2);
        let join = plans[0].root.find_all(PlanNodeType::NestLoop)[0];
        match &join.kind {
            PlanNodeKind::NestLoop { predicate } => assert!(predicate.is_some()),
            _ => panic!("Expected join"),
        }
        let inner = join.children[1].scan().unwrap();
        assert_eq!(inner.table, "r");
        assert!(inner.predicate.is_some());
    }

    #[test]
    fn test_join_orders_stepped_lexicographically() {
        let catalog = test_catalog();
        let plans = all_plans(&catalog, "SELECT t.a FROM t, s, r WHERE t.k = s.k", None);
        let orders: Vec<Vec<String>> = plans
            .iter()
            .map(|p| {
                let mut scans = Vec::new();
                p.root.walk(&mut |n| {
                    if let Some(scan) = n.scan() {
                        scans.push(scan.range_name.clone());
                    }
                });
                scans
            })
            .collect();
        assert_eq!(
            orders,
            vec![
                vec!["t", "s", "r"],
                vec!["t", "r", "s"],
                vec!["s", "t", "r"],
                vec!["s", "r", "t"],
                vec!["r", "t", "s"],
                vec!["r", "s", "t"],
            ]
        );
        let mut assembler = PlanAssembler::new(&catalog, PartitioningForStatement::inferred());
        assembler
            .setup_for_new_plans(&select(&catalog, "SELECT t.a FROM t, s, r WHERE t.k = s.k", None))
            .unwrap();
        let state = assembler.state.as_ref().unwrap();
        assert_eq!(state.order, vec![0, 1, 2]);
        assert!(state.permute);
    }

    #[test]
    fn test_explicit_join_order() {
        let catalog = test_catalog();
        let plans = all_plans(&catalog, "SELECT t.a FROM t, r", Some("r,t"));
        assert_eq!(plans.len(), 1);
        let join = plans[0].root.find_all(PlanNodeType::NestLoop)[0];
        assert_eq!(join.children[0].scan().unwrap().table, "r");
    }

    #[test]
    fn test_incomplete_join_order_is_planning_error() {
        let catalog = test_catalog();
        let mut assembler = PlanAssembler::new(&catalog, PartitioningForStatement::inferred());
        let err = assembler
            .setup_for_new_plans(&select(&catalog, "SELECT t.a FROM t, r", Some("r")))
            .unwrap_err();
        assert!(matches!(err, PlannerError::Planning(_)));
    }

    #[test]
    fn test_partitioned_join_needs_partition_columns() {
        let catalog = test_catalog();
        let mut assembler = PlanAssembler::new(&catalog, PartitioningForStatement::inferred());

        let bad = select(&catalog, "SELECT t.a FROM t, s WHERE t.a = s.b", None);
        match assembler.setup_for_new_plans(&bad) {
            Err(PlannerError::Partitioning(msg)) => assert_eq!(msg, INSUFFICIENT_JOIN_CRITERIA),
            other => panic!("Expected partitioning error, got {:?}", other.err()),
        }

        let good = select(&catalog, "SELECT t.a FROM t, s WHERE t.k = s.k", None);
        assembler.setup_for_new_plans(&good).unwrap();

        let pinned = select(&catalog, "SELECT t.a FROM t, s WHERE t.k = 1 AND s.k = 1", None);
        assembler.setup_for_new_plans(&pinned).unwrap();
    }

    #[test]
    fn test_limit_without_order_is_not_content_deterministic() {
        let catalog = test_catalog();
        let plans = all_plans(&catalog, "SELECT a FROM t LIMIT 3", None);
        assert!(!plans[0].content_deterministic);

        let ordered = all_plans(&catalog, "SELECT a FROM t ORDER BY a LIMIT 3", None);
        assert!(ordered[0].content_deterministic);
        assert!(ordered[0].order_deterministic);
    }

    #[test]
    fn test_branches_are_not_final() {
        let catalog = test_catalog();
        let mut assembler = PlanAssembler::new(&catalog, PartitioningForStatement::inferred());
        assembler
            .setup_for_new_plans(&select(&catalog, "SELECT name FROM r", None))
            .unwrap();
        let plan = assembler.next_plan(false).unwrap().unwrap();
        assert_eq!(plan.root.node_type(), PlanNodeType::Projection);
        assert!(assembler.next_plan(false).unwrap().is_none());
    }

    #[test]
    fn test_forced_single_partition() {
        let catalog = test_catalog();
        let mut assembler = PlanAssembler::new(&catalog, PartitioningForStatement::forced_single());
        assembler
            .setup_for_new_plans(&select(&catalog, "SELECT COUNT(*) FROM t", None))
            .unwrap();
        let plan = assembler.next_plan(true).unwrap().unwrap();
        assert!(plan.single_partition);
        assert!(!plan.root.contains(PlanNodeType::Receive));
    }
}
