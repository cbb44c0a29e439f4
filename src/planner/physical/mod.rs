//! Physical plan representation
//!
//! A plan is a tree of `PlanNode`s. Every node owns its children, carries
//! a closed `PlanNodeKind` with the kind-specific payload, an output schema,
//! and (once the winning plan is chosen) a positive id.
//!
//! Rows flow from the leaves (scans) to the root. `Send` and `Receive`
//! nodes always come in pairs and mark where rows move from the
//! partitions to the coordinator.

pub mod resolve;
pub mod schema;

pub use schema::{NodeSchema, SchemaColumn};

use std::fmt;

use serde::Serialize;

use crate::sql::{Expression, SetOpKind};

/// Plan node identifier, assigned after the winning plan is chosen
pub type PlanNodeId = u32;

/// Fragment identifier
pub type FragmentId = u32;

/// Table access shared by sequential and index scans
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanNode {
    /// Catalog table name
    pub table: String,
    /// Range name the statement refers to the table by
    pub range_name: String,
    /// Stored columns of the table, the input schema of the scan
    pub table_schema: NodeSchema,
    /// Filter applied to each row read
    pub predicate: Option<Expression>,
    /// Whether every partition holds the whole table
    pub replicated: bool,
}

/// How an index is probed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndexLookup {
    /// Equality on a prefix of the index columns
    Equality,
    /// Range on the first index column
    Range,
}

/// Index scan payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexScanNode {
    pub scan: ScanNode,
    pub index: String,
    pub unique: bool,
    pub lookup: IndexLookup,
    /// Number of leading index columns the search keys cover
    pub covered_columns: usize,
    /// Constants or parameters the index is probed with
    pub search_keys: Vec<Expression>,
}

/// Which half of a split aggregation a node computes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AggregatePhase {
    /// Whole aggregation in one node
    Complete,
    /// Per-partition partial results
    Partial,
    /// Combination of partial results on the coordinator
    Final,
}

/// ORDER BY key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortKey {
    pub expression: Expression,
    pub ascending: bool,
}

/// Kind-specific payload of a plan node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlanNodeKind {
    SeqScan(ScanNode),
    IndexScan(IndexScanNode),
    /// Nested loop join; children are (outer, inner)
    NestLoop { predicate: Option<Expression> },
    /// Grouping and aggregation; aggregate columns live in the output schema
    Aggregate {
        phase: AggregatePhase,
        group_by: Vec<Expression>,
    },
    /// Computes the select list; the columns are the output schema
    Projection,
    OrderBy { keys: Vec<SortKey> },
    Limit { limit: Option<u64>, offset: u64 },
    Distinct,
    SetOp { op: SetOpKind },
    /// Producer side of a partition-to-coordinator boundary
    Send,
    /// Consumer side of a boundary; records the producing fragment once
    /// the plan is fragmented
    Receive { source_fragment: Option<FragmentId> },
}

/// Plan node kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PlanNodeType {
    SeqScan,
    IndexScan,
    NestLoop,
    Aggregate,
    Projection,
    OrderBy,
    Limit,
    Distinct,
    SetOp,
    Send,
    Receive,
}

impl PlanNodeType {
    pub fn name(self) -> &'static str {
        match self {
            PlanNodeType::SeqScan => "SEQSCAN",
            PlanNodeType::IndexScan => "INDEXSCAN",
            PlanNodeType::NestLoop => "NESTLOOP",
            PlanNodeType::Aggregate => "AGGREGATE",
            PlanNodeType::Projection => "PROJECTION",
            PlanNodeType::OrderBy => "ORDERBY",
            PlanNodeType::Limit => "LIMIT",
            PlanNodeType::Distinct => "DISTINCT",
            PlanNodeType::SetOp => "SETOP",
            PlanNodeType::Send => "SEND",
            PlanNodeType::Receive => "RECEIVE",
        }
    }
}

impl fmt::Display for PlanNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Physical plan node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanNode {
    pub id: Option<PlanNodeId>,
    pub kind: PlanNodeKind,
    pub children: Vec<PlanNode>,
    pub output_schema: NodeSchema,
}

impl PlanNode {
    /// Node with an empty schema, to be filled by schema generation
    pub fn new(kind: PlanNodeKind, children: Vec<PlanNode>) -> Self {
        Self {
            id: None,
            kind,
            children,
            output_schema: NodeSchema::default(),
        }
    }

    /// Node whose schema is fixed at assembly time
    pub fn with_schema(kind: PlanNodeKind, children: Vec<PlanNode>, schema: NodeSchema) -> Self {
        Self {
            id: None,
            kind,
            children,
            output_schema: schema,
        }
    }

    /// Wrap `child` in a `Receive` over a `Send`
    pub fn gather(child: PlanNode) -> Self {
        let send = PlanNode::new(PlanNodeKind::Send, vec![child]);
        PlanNode::new(
            PlanNodeKind::Receive {
                source_fragment: None,
            },
            vec![send],
        )
    }

    pub fn node_type(&self) -> PlanNodeType {
        match &self.kind {
            PlanNodeKind::SeqScan(_) => PlanNodeType::SeqScan,
            PlanNodeKind::IndexScan(_) => PlanNodeType::IndexScan,
            PlanNodeKind::NestLoop { .. } => PlanNodeType::NestLoop,
            PlanNodeKind::Aggregate { .. } => PlanNodeType::Aggregate,
            PlanNodeKind::Projection => PlanNodeType::Projection,
            PlanNodeKind::OrderBy { .. } => PlanNodeType::OrderBy,
            PlanNodeKind::Limit { .. } => PlanNodeType::Limit,
            PlanNodeKind::Distinct => PlanNodeType::Distinct,
            PlanNodeKind::SetOp { .. } => PlanNodeType::SetOp,
            PlanNodeKind::Send => PlanNodeType::Send,
            PlanNodeKind::Receive { .. } => PlanNodeType::Receive,
        }
    }

    /// Scan payload for either scan kind
    pub fn scan(&self) -> Option<&ScanNode> {
        match &self.kind {
            PlanNodeKind::SeqScan(scan) => Some(scan),
            PlanNodeKind::IndexScan(index) => Some(&index.scan),
            _ => None,
        }
    }

    pub fn child(&self, idx: usize) -> Option<&PlanNode> {
        self.children.get(idx)
    }

    /// Expressions the node evaluates besides its output columns
    pub fn expressions(&self) -> Vec<&Expression> {
        match &self.kind {
            PlanNodeKind::SeqScan(scan) => scan.predicate.iter().collect(),
            PlanNodeKind::IndexScan(index) => index
                .scan
                .predicate
                .iter()
                .chain(index.search_keys.iter())
                .collect(),
            PlanNodeKind::NestLoop { predicate } => predicate.iter().collect(),
            PlanNodeKind::Aggregate { group_by, .. } => group_by.iter().collect(),
            PlanNodeKind::OrderBy { keys } => keys.iter().map(|k| &k.expression).collect(),
            PlanNodeKind::Projection
            | PlanNodeKind::Limit { .. }
            | PlanNodeKind::Distinct
            | PlanNodeKind::SetOp { .. }
            | PlanNodeKind::Send
            | PlanNodeKind::Receive { .. } => Vec::new(),
        }
    }

    pub fn expressions_mut(&mut self) -> Vec<&mut Expression> {
        match &mut self.kind {
            PlanNodeKind::SeqScan(scan) => scan.predicate.iter_mut().collect(),
            PlanNodeKind::IndexScan(index) => index
                .scan
                .predicate
                .iter_mut()
                .chain(index.search_keys.iter_mut())
                .collect(),
            PlanNodeKind::NestLoop { predicate } => predicate.iter_mut().collect(),
            PlanNodeKind::Aggregate { group_by, .. } => group_by.iter_mut().collect(),
            PlanNodeKind::OrderBy { keys } => keys.iter_mut().map(|k| &mut k.expression).collect(),
            PlanNodeKind::Projection
            | PlanNodeKind::Limit { .. }
            | PlanNodeKind::Distinct
            | PlanNodeKind::SetOp { .. }
            | PlanNodeKind::Send
            | PlanNodeKind::Receive { .. } => Vec::new(),
        }
    }

    /// Visit the tree in pre-order
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a PlanNode)) {
        f(self);
        for child in &self.children {
            child.walk(f);
        }
    }

    /// Number of nodes in the tree
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_| count += 1);
        count
    }

    /// All nodes of a given type, in pre-order
    pub fn find_all(&self, node_type: PlanNodeType) -> Vec<&PlanNode> {
        let mut out = Vec::new();
        self.walk(&mut |n| {
            if n.node_type() == node_type {
                out.push(n);
            }
        });
        out
    }

    /// Whether any node of the given type appears in the tree
    pub fn contains(&self, node_type: PlanNodeType) -> bool {
        !self.find_all(node_type).is_empty()
    }

    /// Number ids in pre-order starting at `next`; returns the next unused id
    pub fn assign_node_ids(&mut self, next: PlanNodeId) -> PlanNodeId {
        self.id = Some(next);
        let mut next = next + 1;
        for child in &mut self.children {
            next = child.assign_node_ids(next);
        }
        next
    }

    /// Whether some back-reference in the tree still lacks an index
    pub fn has_unresolved_references(&self) -> bool {
        let mut unresolved = false;
        self.walk(&mut |n| {
            if !n.output_schema.is_resolved() || n.expressions().iter().any(|e| !e.is_resolved()) {
                unresolved = true;
            }
        });
        unresolved
    }
}
