//! SQL layer - parsing and semantic analysis
//!
//! This module provides:
//! - `Parser`: Parses SQL text into the sqlparser AST
//! - `Resolver`: Binds names against the catalog into a `ParsedStatement`
//! - `StatementParser`: The seam the planner parses through

pub mod ast;
pub mod error;
pub mod parser;
pub mod resolver;

pub use ast::*;
pub use error::{SqlError, SqlResult};
pub use parser::Parser;
pub use resolver::Resolver;

use crate::catalog::Catalog;

/// Turns SQL text into an analyzed statement
pub trait StatementParser: Send + Sync {
    /// Parse and analyze one statement, with an optional comma-separated
    /// join order naming table ranges
    fn parse(&self, sql: &str, join_order: Option<&str>) -> SqlResult<ParsedStatement>;
}

/// Default parser: sqlparser's MySQL dialect plus catalog resolution
pub struct SemanticParser<'a> {
    catalog: &'a Catalog,
}

impl<'a> SemanticParser<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }
}

impl StatementParser for SemanticParser<'_> {
    fn parse(&self, sql: &str, join_order: Option<&str>) -> SqlResult<ParsedStatement> {
        let stmt = Parser::parse_one(sql)?;
        Resolver::new(self.catalog).resolve(stmt, join_order)
    }
}
