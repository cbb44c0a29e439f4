//! Compiled plans
//!
//! A `CompiledPlan` is one candidate while the search runs and the final
//! result once a winner is picked. Candidates are created with cost 0 and
//! no fragments; the driver fills in cost, explain text and fragments.

use serde::Serialize;

use crate::catalog::DataType;
use crate::planner::fragmentizer::Fragment;
use crate::planner::physical::{PlanNode, PlanNodeId};

/// A complete physical plan plus what is known about its results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledPlan {
    pub root: PlanNode,
    /// Statement text the plan was compiled from
    pub sql: String,
    pub cost: f64,
    /// Same rows, in some order, on every execution over the same data
    pub content_deterministic: bool,
    /// Same rows in the same order on every execution over the same data
    pub order_deterministic: bool,
    /// Whether the whole plan runs on one partition
    pub single_partition: bool,
    /// Rendered plan text, set on the winner only
    pub explained_plan: Option<String>,
    /// Parameter types indexed by parameter number
    pub parameter_types: Vec<DataType>,
    /// Execution fragments, producers first and the root fragment last
    pub fragments: Vec<Fragment>,
}

impl CompiledPlan {
    pub fn new(root: PlanNode) -> Self {
        Self {
            root,
            sql: String::new(),
            cost: 0.0,
            content_deterministic: true,
            order_deterministic: true,
            single_partition: false,
            explained_plan: None,
            parameter_types: Vec::new(),
            fragments: Vec::new(),
        }
    }

    /// Whether every execution returns the same rows in the same order
    pub fn statement_guarantees_determinism(&self) -> bool {
        self.content_deterministic && self.order_deterministic
    }

    /// Renumber the plan's nodes in pre-order starting at `start`;
    /// returns the next unused id
    pub fn reset_plan_node_ids(&mut self, start: PlanNodeId) -> PlanNodeId {
        self.root.assign_node_ids(start)
    }
}
