//! Query planner
//!
//! Searches the candidate plans for one SQL statement, keeps the cheapest,
//! and splits it into fragments for execution across partitions.
//!
//! ## Pipeline
//!
//! ```text
//! SQL text
//!   → StatementParser::parse() → ParsedStatement
//!   → CandidateGenerator::next_plan() → raw CompiledPlan (repeated)
//!   → MicroOptimizer::apply_all() → variants
//!   → resolve_column_indexes() → PlanStatistics → CostModel::plan_cost()
//!   → cheapest variant → node ids → Fragmentizer::fragmentize()
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use shardplan::planner::{DefaultCostModel, PlanRequest, QueryPlanner};
//!
//! let planner = QueryPlanner::new(&catalog);
//! let plan = planner.compile_plan(&DefaultCostModel, &PlanRequest::new("SELECT a FROM t"))?;
//! println!("{}", plan.explained_plan.unwrap_or_default());
//! ```

pub mod assembler;
pub mod compiled;
pub mod cost;
pub mod debug;
pub mod driver;
pub mod error;
pub mod explain;
pub mod fragmentizer;
pub mod optimizer;
pub mod physical;
pub mod stats;

#[cfg(test)]
pub(crate) mod test_utils;

pub use assembler::{CandidateGenerator, PartitioningForStatement, PlanAssembler};
pub use compiled::CompiledPlan;
pub use cost::{Cost, CostModel, DefaultCostModel, TrivialCostModel};
pub use debug::{
    ArtifactKey, ArtifactKind, FileDebugSink, MemoryDebugSink, NoopDebugSink, PlanDebugSink,
};
pub use driver::{PlanRequest, QueryPlanner};
pub use error::{PlannerError, PlannerResult};
pub use explain::ExplainOutput;
pub use fragmentizer::{Fragment, Fragmentizer};
pub use optimizer::MicroOptimizer;
pub use physical::{PlanNode, PlanNodeKind, PlanNodeType};
pub use stats::{PlanStatistics, ScalarValueHints};
