//! EXPLAIN output formatting
//!
//! Formats physical plans for display to users, and as Graphviz DOT for
//! debug artifacts.

use std::fmt::Write;

use crate::planner::fragmentizer::Fragment;
use crate::planner::physical::{AggregatePhase, IndexLookup, PlanNode, PlanNodeKind};

/// Format a physical plan for EXPLAIN output
pub struct ExplainOutput;

impl ExplainOutput {
    /// Format a plan tree as indented text
    pub fn format(plan: &PlanNode) -> String {
        let mut output = String::new();
        Self::format_node(plan, 0, &mut output);
        output
    }

    /// Format each fragment separately, producers first
    pub fn format_fragments(fragments: &[Fragment]) -> String {
        let mut output = String::new();
        for fragment in fragments {
            let _ = writeln!(
                output,
                "Fragment {}{}:",
                fragment.id,
                if fragment.runs_on_all_partitions {
                    " (all partitions)"
                } else {
                    ""
                }
            );
            Self::format_node(&fragment.root, 1, &mut output);
        }
        output
    }

    fn format_node(plan: &PlanNode, indent: usize, out: &mut String) {
        let prefix = "  ".repeat(indent);
        let columns: Vec<_> = plan
            .output_schema
            .columns()
            .iter()
            .map(|c| c.alias.as_str())
            .collect();
        let _ = write!(out, "{}{}", prefix, plan.node_type());
        if let Some(id) = plan.id {
            let _ = write!(out, " [{}]", id);
        }

        match &plan.kind {
            PlanNodeKind::SeqScan(scan) => {
                let _ = write!(out, " {}", scan.table);
                if scan.range_name != scan.table {
                    let _ = write!(out, " AS {}", scan.range_name);
                }
                let _ = writeln!(out, " [{}]", columns.join(", "));
                if let Some(p) = &scan.predicate {
                    let _ = writeln!(out, "{}  filter: {}", prefix, p);
                }
            }

            PlanNodeKind::IndexScan(index) => {
                let keys: Vec<_> = index.search_keys.iter().map(|k| k.to_string()).collect();
                let lookup = match index.lookup {
                    IndexLookup::Equality => "=",
                    IndexLookup::Range => "range",
                };
                let _ = writeln!(
                    out,
                    " {} USING {} ({} {}) [{}]",
                    index.scan.table,
                    index.index,
                    lookup,
                    keys.join(", "),
                    columns.join(", ")
                );
                if let Some(p) = &index.scan.predicate {
                    let _ = writeln!(out, "{}  filter: {}", prefix, p);
                }
            }

            PlanNodeKind::NestLoop { predicate } => {
                let _ = writeln!(out);
                if let Some(p) = predicate {
                    let _ = writeln!(out, "{}  condition: {}", prefix, p);
                }
            }

            PlanNodeKind::Aggregate { phase, group_by } => {
                let phase = match phase {
                    AggregatePhase::Complete => "",
                    AggregatePhase::Partial => " (partial)",
                    AggregatePhase::Final => " (final)",
                };
                let _ = writeln!(out, "{} [{}]", phase, columns.join(", "));
                if !group_by.is_empty() {
                    let keys: Vec<_> = group_by.iter().map(|g| g.to_string()).collect();
                    let _ = writeln!(out, "{}  group by: {}", prefix, keys.join(", "));
                }
            }

            PlanNodeKind::Projection => {
                let exprs: Vec<_> = plan
                    .output_schema
                    .columns()
                    .iter()
                    .map(|c| format!("{} AS {}", c.expression, c.alias))
                    .collect();
                let _ = writeln!(out, " [{}]", exprs.join(", "));
            }

            PlanNodeKind::OrderBy { keys } => {
                let keys: Vec<_> = keys
                    .iter()
                    .map(|k| format!("{} {}", k.expression, if k.ascending { "ASC" } else { "DESC" }))
                    .collect();
                let _ = writeln!(out, " [{}]", keys.join(", "));
            }

            PlanNodeKind::Limit { limit, offset } => {
                let mut parts = Vec::new();
                if let Some(l) = limit {
                    parts.push(format!("limit={}", l));
                }
                if *offset > 0 {
                    parts.push(format!("offset={}", offset));
                }
                let _ = writeln!(out, " {}", parts.join(", "));
            }

            PlanNodeKind::SetOp { op } => {
                let _ = writeln!(out, " {}", op);
            }

            PlanNodeKind::Receive { source_fragment } => match source_fragment {
                Some(f) => {
                    let _ = writeln!(out, " from fragment {}", f);
                }
                None => {
                    let _ = writeln!(out);
                }
            },

            PlanNodeKind::Distinct | PlanNodeKind::Send => {
                let _ = writeln!(out);
            }
        }

        for child in &plan.children {
            Self::format_node(child, indent + 1, out);
        }
    }

    /// Graphviz rendering of a plan tree
    pub fn to_dot(plan: &PlanNode) -> String {
        let mut out = String::from("digraph plan {\n");
        let mut next = 0usize;
        Self::dot_node(plan, &mut next, &mut out);
        out.push_str("}\n");
        out
    }

    fn dot_node(plan: &PlanNode, next: &mut usize, out: &mut String) -> usize {
        let me = *next;
        *next += 1;
        let _ = writeln!(out, "  n{} [label=\"{}\"];", me, plan.node_type());
        for child in &plan.children {
            let child_id = Self::dot_node(child, next, out);
            let _ = writeln!(out, "  n{} -> n{};", child_id, me);
        }
        me
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, DataType};
    use crate::planner::physical::{NodeSchema, ScanNode};
    use crate::sql::ParsedTable;

    fn scan() -> PlanNode {
        let table = ParsedTable {
            name: "t".to_string(),
            range_name: "t".to_string(),
            partition_column: None,
            columns: vec![ColumnDef::new("a", DataType::Int)],
        };
        PlanNode::new(
            PlanNodeKind::SeqScan(ScanNode {
                table: "t".to_string(),
                range_name: "t".to_string(),
                table_schema: NodeSchema::for_table(&table),
                predicate: None,
                replicated: true,
            }),
            Vec::new(),
        )
    }

    #[test]
    fn test_explain_nests_children() {
        let mut plan = PlanNode::new(
            PlanNodeKind::Limit {
                limit: Some(10),
                offset: 0,
            },
            vec![scan()],
        );
        plan.generate_output_schema().unwrap();
        plan.assign_node_ids(1);

        let output = ExplainOutput::format(&plan);
        assert!(output.starts_with("LIMIT [1] limit=10"));
        assert!(output.contains("\n  SEQSCAN [2] t [a]"));
    }

    #[test]
    fn test_dot_edges() {
        let plan = PlanNode::new(PlanNodeKind::Send, vec![scan()]);
        let dot = ExplainOutput::to_dot(&plan);
        assert!(dot.starts_with("digraph plan {"));
        assert!(dot.contains("n1 -> n0;"));
        assert!(dot.contains("label=\"SEQSCAN\""));
    }
}
