//! Planner error types

use thiserror::Error;

use crate::sql::SqlError;

/// Message returned when the candidate generator produced no plan
pub const UNABLE_TO_PLAN: &str = "Unable to plan for statement. Error unknown.";

/// Planner error
///
/// Only `Parse`, `Partitioning` and `Planning` describe problems with the
/// statement itself. `Serialization` never escapes a compile, and
/// `InvariantViolation` means the planner produced an unsafe plan.
#[derive(Error, Debug, Clone)]
pub enum PlannerError {
    /// Statement text could not be parsed or analyzed
    #[error("Parse error: {0}")]
    Parse(#[from] SqlError),

    /// Too many joined tables, or an invalid partitioning claim
    #[error("Partitioning error: {0}")]
    Partitioning(String),

    /// No viable plan
    #[error("{0}")]
    Planning(String),

    /// A debug or explain artifact could not be produced
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Schema or column resolution broke an internal guarantee
    #[error("Internal planner error: {0}")]
    InvariantViolation(String),
}

impl PlannerError {
    /// The error returned when no candidate plan was produced
    pub fn unable_to_plan() -> Self {
        PlannerError::Planning(UNABLE_TO_PLAN.to_string())
    }

    /// Whether the error describes the statement rather than the planner
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            PlannerError::Parse(_) | PlannerError::Partitioning(_) | PlannerError::Planning(_)
        )
    }
}

impl From<serde_json::Error> for PlannerError {
    fn from(err: serde_json::Error) -> Self {
        PlannerError::Serialization(err.to_string())
    }
}

/// Result type for planner operations
pub type PlannerResult<T> = Result<T, PlannerError>;
