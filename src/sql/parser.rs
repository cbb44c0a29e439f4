//! Statement splitting on top of sqlparser
//!
//! The planner compiles exactly one statement per call, always in the
//! MySQL dialect.

use sqlparser::ast::Statement;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser as SqlParser;

use crate::sql::error::{SqlError, SqlResult};

pub struct Parser;

impl Parser {
    /// Parse text that must hold exactly one statement
    pub fn parse_one(sql: &str) -> SqlResult<Statement> {
        let mut statements = SqlParser::parse_sql(&MySqlDialect {}, sql)?;
        match statements.len() {
            1 => Ok(statements.remove(0)),
            0 => Err(SqlError::Parse("no statement found".to_string())),
            n => Err(SqlError::Parse(format!(
                "expected one statement, found {}",
                n
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::ast as sp;

    #[test]
    fn test_parse_select() {
        let stmt = Parser::parse_one("SELECT a FROM t WHERE t.k = 5").unwrap();
        assert!(matches!(stmt, sp::Statement::Query(_)));
    }

    #[test]
    fn test_parse_join() {
        let stmt = Parser::parse_one(
            "SELECT u.name, o.total FROM users u JOIN orders o ON u.id = o.user_id",
        )
        .unwrap();
        assert!(matches!(stmt, sp::Statement::Query(_)));
    }

    #[test]
    fn test_parse_union() {
        let stmt = Parser::parse_one("SELECT a FROM t UNION ALL SELECT id FROM r").unwrap();
        match stmt {
            sp::Statement::Query(q) => {
                assert!(matches!(*q.body, sp::SetExpr::SetOperation { .. }))
            }
            _ => panic!("Expected Query"),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Parser::parse_one(""),
            Err(SqlError::Parse("no statement found".to_string()))
        );
        assert_eq!(
            Parser::parse_one("SELECT 1; SELECT 2"),
            Err(SqlError::Parse("expected one statement, found 2".to_string()))
        );
        assert!(matches!(
            Parser::parse_one("SELEKT a FROM t"),
            Err(SqlError::Parse(_))
        ));
    }
}
