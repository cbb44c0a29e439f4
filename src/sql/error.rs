//! Errors raised while turning SQL text into a `ParsedStatement`

use std::fmt;

/// Why a statement never reached the planner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlError {
    /// Text rejected by sqlparser, or not exactly one statement
    Parse(String),
    TableNotFound(String),
    ColumnNotFound(String),
    /// Unqualified column present in more than one range
    AmbiguousColumn(String),
    /// Join order that names no tables or is applied to a set operation
    InvalidJoinOrder(String),
    /// Set-operation branches of different widths
    SetOpMismatch(String),
    /// Statement is well formed SQL but semantically invalid
    InvalidOperation(String),
    /// SQL the planner does not handle (DML, subqueries, ...)
    Unsupported(String),
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlError::Parse(msg) => write!(f, "Failed to parse SQL statement: {}", msg),
            SqlError::TableNotFound(name) => write!(f, "Object not found: {}", name),
            SqlError::ColumnNotFound(name) => write!(f, "Column not found: {}", name),
            SqlError::AmbiguousColumn(name) => write!(f, "Column '{}' is ambiguous", name),
            SqlError::InvalidJoinOrder(msg) => write!(f, "Invalid join order: {}", msg),
            SqlError::SetOpMismatch(msg) | SqlError::InvalidOperation(msg) => {
                write!(f, "{}", msg)
            }
            SqlError::Unsupported(msg) => write!(f, "Unsupported SQL: {}", msg),
        }
    }
}

impl std::error::Error for SqlError {}

impl From<sqlparser::parser::ParserError> for SqlError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        SqlError::Parse(err.to_string())
    }
}

pub type SqlResult<T> = Result<T, SqlError>;
