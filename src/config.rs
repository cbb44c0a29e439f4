//! Planner configuration
//!
//! Settings come from the environment so the planner can be tuned without
//! code changes:
//!
//! - `SHARDPLAN_MAX_TABLES_PER_JOIN`: tables a statement may join without an
//!   explicit join order (default 5)
//! - `SHARDPLAN_DEBUG_DIR`: directory for per-candidate debug artifacts
//! - `SHARDPLAN_QUIET`: suppress debug artifacts even when a directory is set

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::planner::debug::{FileDebugSink, NoopDebugSink, PlanDebugSink};

/// Default limit on joined tables without an explicit join order
pub const DEFAULT_MAX_TABLES_PER_JOIN: usize = 5;

/// Parse a join-table limit; zero would reject every statement
pub fn parse_table_limit(raw: &str) -> Result<usize, String> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("expected a positive table count, got '{}'", raw.trim())),
    }
}

/// Planner configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerConfig {
    pub max_tables_per_join: usize,
    pub debug_dir: Option<PathBuf>,
    pub quiet: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_tables_per_join: DEFAULT_MAX_TABLES_PER_JOIN,
            debug_dir: None,
            quiet: false,
        }
    }
}

impl PlannerConfig {
    /// Read configuration from environment variables
    pub fn from_env() -> Self {
        let max_tables_per_join = match env::var("SHARDPLAN_MAX_TABLES_PER_JOIN") {
            Ok(raw) => match parse_table_limit(&raw) {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "Ignoring invalid SHARDPLAN_MAX_TABLES_PER_JOIN");
                    DEFAULT_MAX_TABLES_PER_JOIN
                }
            },
            Err(_) => DEFAULT_MAX_TABLES_PER_JOIN,
        };

        let quiet = env::var("SHARDPLAN_QUIET")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        PlannerConfig {
            max_tables_per_join,
            debug_dir: env::var_os("SHARDPLAN_DEBUG_DIR").map(PathBuf::from),
            quiet,
        }
    }

    /// Debug sink for this configuration; no-op unless a directory is set
    /// and output is not suppressed
    pub fn debug_sink(&self) -> Arc<dyn PlanDebugSink> {
        match &self.debug_dir {
            Some(dir) if !self.quiet => Arc::new(FileDebugSink::new(dir.clone())),
            _ => Arc::new(NoopDebugSink),
        }
    }
}
