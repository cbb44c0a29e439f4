//! shardplan - cost-based query planning for a partitioned SQL database
//!
//! Turns one SQL statement into a single lowest-cost, fully resolved plan
//! and splits it into fragments at the points where rows move between
//! partitions and the coordinator.
//!
//! ## Layers
//!
//! - `catalog`: tables, partition columns, indexes, row estimates
//! - `sql`: parsing and semantic analysis into a `ParsedStatement`
//! - `planner`: candidate search, cost scoring, resolution, fragmentation
//! - `config`: environment-driven planner settings

pub mod catalog;
pub mod config;
pub mod planner;
pub mod sql;
