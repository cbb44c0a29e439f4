//! Internal AST types
//!
//! These types represent analyzed SQL statements in the form the planner
//! consumes: every column reference is bound to a table range and typed,
//! predicates are split into conjuncts, and aggregates are lifted into
//! display columns of their own.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::catalog::{ColumnDef, DataType};

/// Table name used for columns computed by the plan itself (aggregates,
/// expressions) rather than read from a stored table
pub const TEMP_TABLE_NAME: &str = "$temp";

/// Literal value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Literal {
    /// Type of the literal; NULL is typed as the widest integer
    pub fn data_type(&self) -> DataType {
        match self {
            Literal::Null | Literal::Integer(_) => DataType::BigInt,
            Literal::Boolean(_) => DataType::Boolean,
            Literal::Float(_) => DataType::Double,
            Literal::String(_) => DataType::Text,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "NULL"),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Float(v) => write!(f, "{}", v),
            Literal::String(s) => write!(f, "'{}'", s),
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
}

impl ComparisonOp {
    /// Operator with its operands swapped (`a < b` becomes `b > a`)
    pub fn reverse(self) -> Self {
        match self {
            ComparisonOp::Lt => ComparisonOp::Gt,
            ComparisonOp::LtEq => ComparisonOp::GtEq,
            ComparisonOp::Gt => ComparisonOp::Lt,
            ComparisonOp::GtEq => ComparisonOp::LtEq,
            other => other,
        }
    }

    /// Whether the operator bounds a range an ordered index can seek on
    pub fn is_range(self) -> bool {
        matches!(
            self,
            ComparisonOp::Lt | ComparisonOp::LtEq | ComparisonOp::Gt | ComparisonOp::GtEq
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::NotEq => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::LtEq => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::GtEq => ">=",
            ComparisonOp::Like => "LIKE",
        }
    }
}

/// Boolean connectives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConjunctionOp {
    And,
    Or,
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithmeticOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "/",
            ArithmeticOp::Mod => "%",
        }
    }
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AggregateKind {
    Sum,
    Count,
    CountStar,
    Min,
    Max,
    Avg,
}

impl AggregateKind {
    pub fn name(self) -> &'static str {
        match self {
            AggregateKind::Sum => "SUM",
            AggregateKind::Count => "COUNT",
            AggregateKind::CountStar => "COUNT(*)",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
            AggregateKind::Avg => "AVG",
        }
    }

    /// Aggregate that combines per-partition partial results of `self`,
    /// or `None` when the aggregate cannot be split (AVG)
    pub fn combining_kind(self) -> Option<AggregateKind> {
        match self {
            AggregateKind::Sum | AggregateKind::Count | AggregateKind::CountStar => {
                Some(AggregateKind::Sum)
            }
            AggregateKind::Min => Some(AggregateKind::Min),
            AggregateKind::Max => Some(AggregateKind::Max),
            AggregateKind::Avg => None,
        }
    }

    /// Result type given the argument type
    pub fn result_type(self, argument: Option<&DataType>) -> DataType {
        match (self, argument) {
            (AggregateKind::Count | AggregateKind::CountStar, _) => DataType::BigInt,
            (AggregateKind::Avg, _) => DataType::Double,
            (AggregateKind::Sum, Some(t)) if t.is_integer() => DataType::BigInt,
            (AggregateKind::Sum, _) => DataType::Double,
            (_, Some(t)) => t.clone(),
            (_, None) => DataType::BigInt,
        }
    }
}

/// Back-reference to a column of some input schema
///
/// Identified by `(table, column, alias)`; `column_index` is filled in by
/// column-index resolution once the input schema is final.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TupleValue {
    pub table: String,
    pub column: String,
    pub alias: String,
    pub column_index: Option<usize>,
    pub value_type: DataType,
}

impl TupleValue {
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        alias: impl Into<String>,
        value_type: DataType,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            alias: alias.into(),
            column_index: None,
            value_type,
        }
    }

    /// Same reference with any resolved index cleared
    #[must_use]
    pub fn unresolved(&self) -> Self {
        Self {
            column_index: None,
            ..self.clone()
        }
    }

    /// Whether this refers to the same column as `other`, ignoring the index
    pub fn same_column(&self, other: &TupleValue) -> bool {
        self.table == other.table && self.column == other.column
    }
}

/// Aggregate call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateExpr {
    pub kind: AggregateKind,
    pub distinct: bool,
    /// `None` for COUNT(*)
    pub argument: Option<Box<Expression>>,
    pub value_type: DataType,
}

/// Typed expression tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expression {
    TupleValue(TupleValue),
    Constant(Literal),
    /// Statement parameter (`?`), numbered from 0 in text order
    Parameter {
        index: usize,
        value_type: DataType,
    },
    Comparison {
        op: ComparisonOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Conjunction {
        op: ConjunctionOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expression>,
        right: Box<Expression>,
        value_type: DataType,
    },
    Not(Box<Expression>),
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    Aggregate(AggregateExpr),
}

impl Expression {
    /// Shorthand for a column back-reference
    pub fn column(tv: TupleValue) -> Self {
        Expression::TupleValue(tv)
    }

    /// Build `left op right`
    pub fn compare(op: ComparisonOp, left: Expression, right: Expression) -> Self {
        Expression::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Result type of the expression
    pub fn value_type(&self) -> DataType {
        match self {
            Expression::TupleValue(tv) => tv.value_type.clone(),
            Expression::Constant(lit) => lit.data_type(),
            Expression::Parameter { value_type, .. } => value_type.clone(),
            Expression::Arithmetic { value_type, .. } => value_type.clone(),
            Expression::Aggregate(agg) => agg.value_type.clone(),
            Expression::Comparison { .. }
            | Expression::Conjunction { .. }
            | Expression::Not(_)
            | Expression::IsNull { .. } => DataType::Boolean,
        }
    }

    /// Child expressions, left to right
    fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::TupleValue(_) | Expression::Constant(_) | Expression::Parameter { .. } => {
                Vec::new()
            }
            Expression::Comparison { left, right, .. }
            | Expression::Conjunction { left, right, .. }
            | Expression::Arithmetic { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expression::Not(e) | Expression::IsNull { expr: e, .. } => vec![e.as_ref()],
            Expression::Aggregate(agg) => agg.argument.iter().map(|a| a.as_ref()).collect(),
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Expression> {
        match self {
            Expression::TupleValue(_) | Expression::Constant(_) | Expression::Parameter { .. } => {
                Vec::new()
            }
            Expression::Comparison { left, right, .. }
            | Expression::Conjunction { left, right, .. }
            | Expression::Arithmetic { left, right, .. } => vec![left.as_mut(), right.as_mut()],
            Expression::Not(e) | Expression::IsNull { expr: e, .. } => vec![e.as_mut()],
            Expression::Aggregate(agg) => agg.argument.iter_mut().map(|a| a.as_mut()).collect(),
        }
    }

    /// All back-references in the tree, in pre-order
    pub fn tuple_values(&self) -> Vec<&TupleValue> {
        let mut out = Vec::new();
        self.collect_tuple_values(&mut out);
        out
    }

    fn collect_tuple_values<'a>(&'a self, out: &mut Vec<&'a TupleValue>) {
        if let Expression::TupleValue(tv) = self {
            out.push(tv);
        }
        for child in self.children() {
            child.collect_tuple_values(out);
        }
    }

    /// Mutable access to every back-reference in the tree, in pre-order
    pub fn tuple_values_mut(&mut self) -> Vec<&mut TupleValue> {
        let mut out = Vec::new();
        self.collect_tuple_values_mut(&mut out);
        out
    }

    fn collect_tuple_values_mut<'a>(&'a mut self, out: &mut Vec<&'a mut TupleValue>) {
        match self {
            Expression::TupleValue(tv) => out.push(tv),
            other => {
                for child in other.children_mut() {
                    child.collect_tuple_values_mut(out);
                }
            }
        }
    }

    /// Table ranges the expression reads from
    pub fn tables_referenced(&self) -> BTreeSet<String> {
        self.tuple_values()
            .into_iter()
            .map(|tv| tv.table.clone())
            .collect()
    }

    /// Whether any node of the tree is an aggregate call
    pub fn contains_aggregate(&self) -> bool {
        matches!(self, Expression::Aggregate(_))
            || self.children().iter().any(|c| c.contains_aggregate())
    }

    /// Whether the expression is a constant or a parameter
    pub fn is_constant_or_parameter(&self) -> bool {
        matches!(self, Expression::Constant(_) | Expression::Parameter { .. })
    }

    /// Whether every back-reference carries a resolved index
    pub fn is_resolved(&self) -> bool {
        self.tuple_values()
            .iter()
            .all(|tv| tv.column_index.is_some())
    }

    /// Split a predicate on top-level ANDs
    pub fn split_conjuncts(self) -> Vec<Expression> {
        match self {
            Expression::Conjunction {
                op: ConjunctionOp::And,
                left,
                right,
            } => {
                let mut out = left.split_conjuncts();
                out.extend(right.split_conjuncts());
                out
            }
            other => vec![other],
        }
    }

    /// AND a list of predicates together, `None` when the list is empty
    pub fn and_all(predicates: Vec<Expression>) -> Option<Expression> {
        predicates.into_iter().reduce(|acc, p| Expression::Conjunction {
            op: ConjunctionOp::And,
            left: Box::new(acc),
            right: Box::new(p),
        })
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::TupleValue(tv) => {
                write!(f, "{}.{}", tv.table, tv.column)?;
                if let Some(idx) = tv.column_index {
                    write!(f, "#{}", idx)?;
                }
                Ok(())
            }
            Expression::Constant(lit) => write!(f, "{}", lit),
            Expression::Parameter { index, .. } => write!(f, "?{}", index),
            Expression::Comparison { op, left, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
            Expression::Conjunction { op, left, right } => {
                let word = match op {
                    ConjunctionOp::And => "AND",
                    ConjunctionOp::Or => "OR",
                };
                write!(f, "({} {} {})", left, word, right)
            }
            Expression::Arithmetic {
                op, left, right, ..
            } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expression::Not(e) => write!(f, "NOT {}", e),
            Expression::IsNull { expr, negated } => {
                if *negated {
                    write!(f, "{} IS NOT NULL", expr)
                } else {
                    write!(f, "{} IS NULL", expr)
                }
            }
            Expression::Aggregate(agg) => match (&agg.argument, agg.distinct) {
                (None, _) => write!(f, "{}", agg.kind.name()),
                (Some(arg), true) => write!(f, "{}(DISTINCT {})", agg.kind.name(), arg),
                (Some(arg), false) => write!(f, "{}({})", agg.kind.name(), arg),
            },
        }
    }
}

/// A table range in the FROM clause
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTable {
    /// Catalog table name
    pub name: String,
    /// Range name (alias, or the table name when unaliased)
    pub range_name: String,
    /// Partition column, `None` for replicated tables
    pub partition_column: Option<String>,
    pub columns: Vec<ColumnDef>,
}

impl ParsedTable {
    /// Back-reference to one of this range's columns
    pub fn tuple_value(&self, column: &str) -> Option<TupleValue> {
        self.columns.iter().find(|c| c.name == column).map(|c| {
            TupleValue::new(
                self.range_name.clone(),
                c.name.clone(),
                c.name.clone(),
                c.data_type.clone(),
            )
        })
    }

    pub fn is_replicated(&self) -> bool {
        self.partition_column.is_none()
    }
}

/// One column of the select list
///
/// Plain column references keep their source `(table, column)`; computed
/// columns (aggregates and other expressions) live in `TEMP_TABLE_NAME`
/// under a generated column name.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayColumn {
    pub table: String,
    pub column: String,
    pub alias: String,
    pub expression: Expression,
}

impl DisplayColumn {
    /// Back-reference to this column as produced by the select list
    pub fn tuple_value(&self) -> TupleValue {
        TupleValue::new(
            self.table.clone(),
            self.column.clone(),
            self.alias.clone(),
            self.expression.value_type(),
        )
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.expression, Expression::Aggregate(_))
    }
}

/// ORDER BY key, always a reference to a display column
#[derive(Debug, Clone, PartialEq)]
pub struct OrderColumn {
    pub column: TupleValue,
    pub ascending: bool,
}

/// Analyzed SELECT
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSelect {
    /// FROM-clause ranges in text order
    pub tables: Vec<ParsedTable>,
    /// Explicit join order as range names, when supplied
    pub join_order: Option<Vec<String>>,
    /// WHERE and JOIN ON predicates split on AND
    pub conjuncts: Vec<Expression>,
    pub display_columns: Vec<DisplayColumn>,
    pub group_by: Vec<TupleValue>,
    pub distinct: bool,
    pub order_by: Vec<OrderColumn>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Parameter types indexed by parameter number
    pub param_types: Vec<DataType>,
}

impl ParsedSelect {
    /// Whether the select computes aggregates or groups rows
    pub fn is_aggregate(&self) -> bool {
        !self.group_by.is_empty() || self.display_columns.iter().any(|c| c.is_aggregate())
    }

    /// Whether the result is at most one row (aggregates without GROUP BY)
    pub fn is_single_row_aggregate(&self) -> bool {
        self.group_by.is_empty() && self.display_columns.iter().any(|c| c.is_aggregate())
    }

    pub fn table(&self, range_name: &str) -> Option<&ParsedTable> {
        self.tables.iter().find(|t| t.range_name == range_name)
    }
}

/// Set operator kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SetOpKind {
    Union,
    UnionAll,
    Intersect,
    IntersectAll,
    Except,
    ExceptAll,
}

impl fmt::Display for SetOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetOpKind::Union => "UNION",
            SetOpKind::UnionAll => "UNION ALL",
            SetOpKind::Intersect => "INTERSECT",
            SetOpKind::IntersectAll => "INTERSECT ALL",
            SetOpKind::Except => "EXCEPT",
            SetOpKind::ExceptAll => "EXCEPT ALL",
        };
        write!(f, "{}", name)
    }
}

/// Analyzed set operation over two or more selects
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedUnion {
    pub op: SetOpKind,
    pub children: Vec<ParsedSelect>,
}

/// Result of semantic analysis
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedStatement {
    Select(ParsedSelect),
    Union(ParsedUnion),
}

impl ParsedStatement {
    /// The simple statements making up this statement
    pub fn selects(&self) -> Vec<&ParsedSelect> {
        match self {
            ParsedStatement::Select(s) => vec![s],
            ParsedStatement::Union(u) => u.children.iter().collect(),
        }
    }

    /// Parameter types of the whole statement
    pub fn param_types(&self) -> Vec<DataType> {
        match self {
            ParsedStatement::Select(s) => s.param_types.clone(),
            ParsedStatement::Union(u) => u
                .children
                .iter()
                .flat_map(|c| c.param_types.iter().cloned())
                .collect(),
        }
    }

    /// Human-readable dump used for debug artifacts
    pub fn describe(&self) -> String {
        match self {
            ParsedStatement::Select(s) => describe_select(s),
            ParsedStatement::Union(u) => {
                let parts: Vec<_> = u.children.iter().map(describe_select).collect();
                format!("{}\n{}", u.op, parts.join("\n"))
            }
        }
    }
}

fn describe_select(s: &ParsedSelect) -> String {
    let tables: Vec<_> = s
        .tables
        .iter()
        .map(|t| format!("{} AS {}", t.name, t.range_name))
        .collect();
    let columns: Vec<_> = s
        .display_columns
        .iter()
        .map(|c| format!("{} AS {}", c.expression, c.alias))
        .collect();
    let conjuncts: Vec<_> = s.conjuncts.iter().map(|c| c.to_string()).collect();
    format!(
        "SELECT {}\n  FROM {}\n  WHERE {}",
        columns.join(", "),
        tables.join(", "),
        if conjuncts.is_empty() {
            "true".to_string()
        } else {
            conjuncts.join(" AND ")
        }
    )
}
