//! Semantic analysis against the catalog
//!
//! The resolver takes a sqlparser statement and produces a
//! `ParsedStatement`:
//! - Table names are bound to catalog tables and given range names
//! - Column names are bound to ranges and typed
//! - WHERE and JOIN ON predicates are split into conjuncts
//! - Aggregates are lifted into their own display columns
//! - ORDER BY keys are bound to display columns
//! - Parameters are numbered in text order and typed from their context

use sqlparser::ast as sp;

use crate::catalog::{Catalog, DataType};
use crate::sql::ast::*;
use crate::sql::error::{SqlError, SqlResult};

/// Name resolver
pub struct Resolver<'a> {
    catalog: &'a Catalog,
}

impl<'a> Resolver<'a> {
    /// Create a new resolver
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Resolve a statement, applying an optional comma-separated join order
    pub fn resolve(
        &self,
        stmt: sp::Statement,
        join_order: Option<&str>,
    ) -> SqlResult<ParsedStatement> {
        let join_order = join_order.map(parse_join_order).transpose()?;
        match stmt {
            sp::Statement::Query(query) => self.resolve_query(*query, join_order),
            _ => Err(SqlError::Unsupported(
                "Only SELECT statements can be planned".to_string(),
            )),
        }
    }

    fn resolve_query(
        &self,
        query: sp::Query,
        join_order: Option<Vec<String>>,
    ) -> SqlResult<ParsedStatement> {
        if query.with.is_some() {
            return Err(SqlError::Unsupported("WITH clause".to_string()));
        }

        let mut params = Params::default();
        match *query.body {
            sp::SetExpr::Select(select) => {
                let parsed = self.resolve_select(
                    *select,
                    query.order_by,
                    query.limit_clause,
                    join_order,
                    &mut params,
                )?;
                Ok(ParsedStatement::Select(parsed))
            }
            sp::SetExpr::Query(inner) => {
                if query.order_by.is_some() || query.limit_clause.is_some() {
                    return Err(SqlError::Unsupported(
                        "ORDER BY or LIMIT around a parenthesized query".to_string(),
                    ));
                }
                self.resolve_query(*inner, join_order)
            }
            body @ sp::SetExpr::SetOperation { .. } => {
                if query.order_by.is_some() || query.limit_clause.is_some() {
                    return Err(SqlError::Unsupported(
                        "ORDER BY or LIMIT on a set operation".to_string(),
                    ));
                }
                if join_order.is_some() {
                    return Err(SqlError::InvalidJoinOrder(
                        "A join order cannot be applied to a set operation".to_string(),
                    ));
                }

                let mut op = None;
                let mut branches = Vec::new();
                flatten_set_operation(body, &mut op, &mut branches)?;
                let op = op.ok_or_else(|| {
                    SqlError::InvalidOperation("Set operation without operator".to_string())
                })?;

                let mut children = Vec::with_capacity(branches.len());
                for select in branches {
                    children.push(self.resolve_select(select, None, None, None, &mut params)?);
                }

                let width = children[0].display_columns.len();
                if children.iter().any(|c| c.display_columns.len() != width) {
                    return Err(SqlError::SetOpMismatch(format!(
                        "Each {} branch must select the same number of columns",
                        op
                    )));
                }

                Ok(ParsedStatement::Union(ParsedUnion { op, children }))
            }
            _ => Err(SqlError::Unsupported("Query body type".to_string())),
        }
    }

    /// Resolve one SELECT
    fn resolve_select(
        &self,
        select: sp::Select,
        order_by: Option<sp::OrderBy>,
        limit_clause: Option<sp::LimitClause>,
        join_order: Option<Vec<String>>,
        params: &mut Params,
    ) -> SqlResult<ParsedSelect> {
        let distinct = match select.distinct {
            None => false,
            Some(sp::Distinct::Distinct) => true,
            Some(_) => return Err(SqlError::Unsupported("DISTINCT ON".to_string())),
        };
        if select.having.is_some() {
            return Err(SqlError::Unsupported("HAVING".to_string()));
        }
        if select.from.is_empty() {
            return Err(SqlError::Unsupported("SELECT without FROM".to_string()));
        }

        // Build scope from FROM clause, collecting JOIN ON predicates
        let mut scope = Scope::default();
        let mut join_predicates = Vec::new();
        for twj in select.from {
            self.add_table_factor(twj.relation, &mut scope)?;
            for join in twj.joins {
                match join.join_operator {
                    sp::JoinOperator::Inner(constraint) | sp::JoinOperator::Join(constraint) => {
                        self.add_table_factor(join.relation, &mut scope)?;
                        match constraint {
                            sp::JoinConstraint::On(expr) => join_predicates.push(expr),
                            sp::JoinConstraint::None => {}
                            _ => {
                                return Err(SqlError::Unsupported(
                                    "JOIN ... USING and NATURAL JOIN".to_string(),
                                ))
                            }
                        }
                    }
                    sp::JoinOperator::CrossJoin(_) => {
                        self.add_table_factor(join.relation, &mut scope)?;
                    }
                    _ => return Err(SqlError::Unsupported("Outer joins".to_string())),
                }
            }
        }

        // Conjuncts, WHERE first then JOIN ON in text order
        let mut conjuncts = Vec::new();
        for expr in select.selection.into_iter().chain(join_predicates) {
            let converted = convert_expr(expr, &scope, params)?;
            conjuncts.extend(converted.split_conjuncts());
        }

        // Select list
        let mut display_columns = Vec::new();
        for item in select.projection {
            self.resolve_select_item(item, &scope, params, &mut display_columns)?;
        }

        // GROUP BY
        let group_by = match select.group_by {
            sp::GroupByExpr::Expressions(exprs, _) => {
                let mut cols = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    match convert_expr(expr, &scope, params)? {
                        Expression::TupleValue(tv) => cols.push(tv),
                        other => {
                            return Err(SqlError::Unsupported(format!(
                                "GROUP BY expression {}",
                                other
                            )))
                        }
                    }
                }
                cols
            }
            sp::GroupByExpr::All(_) => {
                return Err(SqlError::Unsupported("GROUP BY ALL".to_string()))
            }
        };

        let mut parsed = ParsedSelect {
            tables: scope.tables,
            join_order,
            conjuncts,
            display_columns,
            group_by,
            distinct,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            param_types: Vec::new(),
        };
        validate_grouping(&parsed)?;

        if let Some(order_by) = order_by {
            parsed.order_by = resolve_order_by(order_by, &parsed)?;
        }

        if let Some(limit_clause) = limit_clause {
            let (limit, offset) = match limit_clause {
                sp::LimitClause::LimitOffset { limit, offset, .. } => (limit, offset.map(|o| o.value)),
                sp::LimitClause::OffsetCommaLimit { offset, limit } => (Some(limit), Some(offset)),
            };
            parsed.limit = limit.map(integer_constant).transpose()?;
            parsed.offset = offset.map(integer_constant).transpose()?;
        }

        parsed.param_types = params.take_new();
        Ok(parsed)
    }

    /// Add a FROM-clause table to the scope
    fn add_table_factor(&self, factor: sp::TableFactor, scope: &mut Scope) -> SqlResult<()> {
        match factor {
            sp::TableFactor::Table { name, alias, .. } => {
                let table_name = object_name(&name)?;
                let table_def = self
                    .catalog
                    .get_table(&table_name)
                    .ok_or_else(|| SqlError::TableNotFound(table_name.clone()))?;

                let range_name = alias
                    .map(|a| a.name.value.to_lowercase())
                    .unwrap_or_else(|| table_name.clone());
                if scope.tables.iter().any(|t| t.range_name == range_name) {
                    return Err(SqlError::InvalidOperation(format!(
                        "Table name '{}' is used more than once",
                        range_name
                    )));
                }

                scope.tables.push(ParsedTable {
                    name: table_def.name.clone(),
                    range_name,
                    partition_column: table_def.partition_column.clone(),
                    columns: table_def.columns.clone(),
                });
                Ok(())
            }
            _ => Err(SqlError::Unsupported(
                "Subqueries and table functions in FROM".to_string(),
            )),
        }
    }

    /// Resolve one select-list item into display columns
    fn resolve_select_item(
        &self,
        item: sp::SelectItem,
        scope: &Scope,
        params: &mut Params,
        out: &mut Vec<DisplayColumn>,
    ) -> SqlResult<()> {
        match item {
            sp::SelectItem::Wildcard(_) => {
                for table in &scope.tables {
                    push_table_columns(table, out);
                }
                Ok(())
            }
            sp::SelectItem::QualifiedWildcard(kind, _) => match kind {
                sp::SelectItemQualifiedWildcardKind::ObjectName(name) => {
                    let range_name = object_name(&name)?;
                    let table = scope
                        .tables
                        .iter()
                        .find(|t| t.range_name == range_name)
                        .ok_or(SqlError::TableNotFound(range_name))?;
                    push_table_columns(table, out);
                    Ok(())
                }
                _ => Err(SqlError::Unsupported(
                    "Qualified wildcard on expression".to_string(),
                )),
            },
            sp::SelectItem::UnnamedExpr(expr) => {
                let column = display_column(expr, None, out.len(), scope, params)?;
                out.push(column);
                Ok(())
            }
            sp::SelectItem::ExprWithAlias { expr, alias } => {
                let alias = alias.value.to_lowercase();
                let column = display_column(expr, Some(alias), out.len(), scope, params)?;
                out.push(column);
                Ok(())
            }
        }
    }
}

/// Parameter numbering shared by every branch of a statement
#[derive(Default)]
struct Params {
    types: Vec<DataType>,
    /// Index of the first parameter not yet handed to a select
    taken: usize,
}

impl Params {
    fn next(&mut self) -> Expression {
        let index = self.types.len();
        self.types.push(DataType::BigInt);
        Expression::Parameter {
            index,
            value_type: DataType::BigInt,
        }
    }

    fn set_type(&mut self, index: usize, value_type: DataType) {
        if let Some(t) = self.types.get_mut(index) {
            *t = value_type;
        }
    }

    /// Types of the parameters introduced since the last call
    fn take_new(&mut self) -> Vec<DataType> {
        let new = self.types[self.taken..].to_vec();
        self.taken = self.types.len();
        new
    }
}

/// Scope for name resolution, FROM-clause order
#[derive(Default)]
struct Scope {
    tables: Vec<ParsedTable>,
}

impl Scope {
    /// Resolve column reference
    fn resolve_column(&self, table: Option<&str>, name: &str) -> SqlResult<TupleValue> {
        if let Some(range_name) = table {
            let table = self
                .tables
                .iter()
                .find(|t| t.range_name == range_name)
                .ok_or_else(|| SqlError::TableNotFound(range_name.to_string()))?;
            return table
                .tuple_value(name)
                .ok_or_else(|| SqlError::ColumnNotFound(format!("{}.{}", range_name, name)));
        }

        let mut found: Option<TupleValue> = None;
        for table in &self.tables {
            if let Some(tv) = table.tuple_value(name) {
                if found.is_some() {
                    return Err(SqlError::AmbiguousColumn(name.to_string()));
                }
                found = Some(tv);
            }
        }
        found.ok_or_else(|| SqlError::ColumnNotFound(name.to_string()))
    }
}

fn push_table_columns(table: &ParsedTable, out: &mut Vec<DisplayColumn>) {
    for col in &table.columns {
        out.push(DisplayColumn {
            table: table.range_name.clone(),
            column: col.name.clone(),
            alias: col.name.clone(),
            expression: Expression::TupleValue(TupleValue::new(
                table.range_name.clone(),
                col.name.clone(),
                col.name.clone(),
                col.data_type.clone(),
            )),
        });
    }
}

/// Build the display column for one select-list expression
///
/// Aggregates are only accepted at the top of the expression.
fn display_column(
    expr: sp::Expr,
    alias: Option<String>,
    position: usize,
    scope: &Scope,
    params: &mut Params,
) -> SqlResult<DisplayColumn> {
    let expression = match expr {
        sp::Expr::Function(func) if aggregate_kind(&func.name).is_some() => {
            convert_aggregate(func, scope, params)?
        }
        other => convert_expr(other, scope, params)?,
    };

    if let Expression::TupleValue(tv) = &expression {
        return Ok(DisplayColumn {
            table: tv.table.clone(),
            column: tv.column.clone(),
            alias: alias.unwrap_or_else(|| tv.column.clone()),
            expression,
        });
    }

    Ok(DisplayColumn {
        table: TEMP_TABLE_NAME.to_string(),
        column: format!("expr{}", position),
        alias: alias.unwrap_or_else(|| format!("c{}", position + 1)),
        expression,
    })
}

fn aggregate_kind(name: &sp::ObjectName) -> Option<AggregateKind> {
    let name = object_name(name).ok()?;
    match name.as_str() {
        "sum" => Some(AggregateKind::Sum),
        "count" => Some(AggregateKind::Count),
        "min" => Some(AggregateKind::Min),
        "max" => Some(AggregateKind::Max),
        "avg" => Some(AggregateKind::Avg),
        _ => None,
    }
}

fn convert_aggregate(func: sp::Function, scope: &Scope, params: &mut Params) -> SqlResult<Expression> {
    let mut kind = aggregate_kind(&func.name)
        .ok_or_else(|| SqlError::InvalidOperation("Not an aggregate".to_string()))?;
    if func.over.is_some() {
        return Err(SqlError::Unsupported("Window functions".to_string()));
    }

    let list = match func.args {
        sp::FunctionArguments::List(list) => list,
        _ => {
            return Err(SqlError::InvalidOperation(format!(
                "{} requires one argument",
                kind.name()
            )))
        }
    };
    let distinct = matches!(list.duplicate_treatment, Some(sp::DuplicateTreatment::Distinct));
    if list.args.len() != 1 {
        return Err(SqlError::InvalidOperation(format!(
            "{} requires one argument",
            kind.name()
        )));
    }

    let arg = match list.args.into_iter().next() {
        Some(sp::FunctionArg::Unnamed(arg)) => arg,
        _ => {
            return Err(SqlError::Unsupported(
                "Named aggregate arguments".to_string(),
            ))
        }
    };

    let argument = match arg {
        sp::FunctionArgExpr::Wildcard if kind == AggregateKind::Count && !distinct => {
            kind = AggregateKind::CountStar;
            None
        }
        sp::FunctionArgExpr::Expr(e) => Some(Box::new(convert_expr(e, scope, params)?)),
        _ => {
            return Err(SqlError::InvalidOperation(format!(
                "Invalid argument to {}",
                kind.name()
            )))
        }
    };

    let value_type = kind.result_type(argument.as_ref().map(|a| a.value_type()).as_ref());
    Ok(Expression::Aggregate(AggregateExpr {
        kind,
        distinct,
        argument,
        value_type,
    }))
}

/// Convert a scalar expression (no aggregates)
fn convert_expr(expr: sp::Expr, scope: &Scope, params: &mut Params) -> SqlResult<Expression> {
    match expr {
        sp::Expr::Identifier(ident) => Ok(Expression::TupleValue(
            scope.resolve_column(None, &ident.value.to_lowercase())?,
        )),
        sp::Expr::CompoundIdentifier(idents) => match idents.as_slice() {
            [table, column] => Ok(Expression::TupleValue(scope.resolve_column(
                Some(&table.value.to_lowercase()),
                &column.value.to_lowercase(),
            )?)),
            _ => Err(SqlError::Unsupported(format!(
                "Column reference with {} parts",
                idents.len()
            ))),
        },
        sp::Expr::Value(value) => convert_value(value.value, params),
        sp::Expr::Nested(inner) => convert_expr(*inner, scope, params),
        sp::Expr::BinaryOp { left, op, right } => {
            let left = convert_expr(*left, scope, params)?;
            let right = convert_expr(*right, scope, params)?;
            convert_binary_op(op, left, right, params)
        }
        sp::Expr::UnaryOp { op, expr } => {
            let inner = convert_expr(*expr, scope, params)?;
            match op {
                sp::UnaryOperator::Not => Ok(Expression::Not(Box::new(inner))),
                sp::UnaryOperator::Plus => Ok(inner),
                sp::UnaryOperator::Minus => match inner {
                    Expression::Constant(Literal::Integer(i)) => {
                        Ok(Expression::Constant(Literal::Integer(-i)))
                    }
                    Expression::Constant(Literal::Float(f)) => {
                        Ok(Expression::Constant(Literal::Float(-f)))
                    }
                    other => {
                        let value_type = other.value_type();
                        Ok(Expression::Arithmetic {
                            op: ArithmeticOp::Sub,
                            left: Box::new(Expression::Constant(Literal::Integer(0))),
                            right: Box::new(other),
                            value_type,
                        })
                    }
                },
                _ => Err(SqlError::Unsupported(format!("Unary operator {}", op))),
            }
        }
        sp::Expr::IsNull(inner) => Ok(Expression::IsNull {
            expr: Box::new(convert_expr(*inner, scope, params)?),
            negated: false,
        }),
        sp::Expr::IsNotNull(inner) => Ok(Expression::IsNull {
            expr: Box::new(convert_expr(*inner, scope, params)?),
            negated: true,
        }),
        sp::Expr::InList {
            expr,
            list,
            negated,
        } => {
            let probe = convert_expr(*expr, scope, params)?;
            let mut alternatives = Vec::with_capacity(list.len());
            for item in list {
                let item = convert_expr(item, scope, params)?;
                alternatives.push(comparison(ComparisonOp::Eq, probe.clone(), item, params));
            }
            let any = alternatives
                .into_iter()
                .reduce(|acc, e| Expression::Conjunction {
                    op: ConjunctionOp::Or,
                    left: Box::new(acc),
                    right: Box::new(e),
                })
                .ok_or_else(|| SqlError::InvalidOperation("Empty IN list".to_string()))?;
            Ok(negate_if(any, negated))
        }
        sp::Expr::Between {
            expr,
            negated,
            low,
            high,
        } => {
            let probe = convert_expr(*expr, scope, params)?;
            let low = convert_expr(*low, scope, params)?;
            let high = convert_expr(*high, scope, params)?;
            let range = Expression::Conjunction {
                op: ConjunctionOp::And,
                left: Box::new(comparison(ComparisonOp::GtEq, probe.clone(), low, params)),
                right: Box::new(comparison(ComparisonOp::LtEq, probe, high, params)),
            };
            Ok(negate_if(range, negated))
        }
        sp::Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => {
            let left = convert_expr(*expr, scope, params)?;
            let right = convert_expr(*pattern, scope, params)?;
            Ok(negate_if(
                comparison(ComparisonOp::Like, left, right, params),
                negated,
            ))
        }
        sp::Expr::Function(func) if aggregate_kind(&func.name).is_some() => {
            Err(SqlError::InvalidOperation(
                "Aggregate functions are only allowed as select-list items".to_string(),
            ))
        }
        other => Err(SqlError::Unsupported(format!("Expression {}", other))),
    }
}

fn convert_value(value: sp::Value, params: &mut Params) -> SqlResult<Expression> {
    let literal = match value {
        sp::Value::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Literal::Integer(i)
            } else {
                let f = n
                    .parse::<f64>()
                    .map_err(|_| SqlError::Parse(format!("Invalid number: {}", n)))?;
                Literal::Float(f)
            }
        }
        sp::Value::SingleQuotedString(s) | sp::Value::DoubleQuotedString(s) => Literal::String(s),
        sp::Value::Boolean(b) => Literal::Boolean(b),
        sp::Value::Null => Literal::Null,
        sp::Value::Placeholder(_) => return Ok(params.next()),
        other => return Err(SqlError::Unsupported(format!("Literal {}", other))),
    };
    Ok(Expression::Constant(literal))
}

fn convert_binary_op(
    op: sp::BinaryOperator,
    left: Expression,
    right: Expression,
    params: &mut Params,
) -> SqlResult<Expression> {
    let cmp = match op {
        sp::BinaryOperator::Eq => Some(ComparisonOp::Eq),
        sp::BinaryOperator::NotEq => Some(ComparisonOp::NotEq),
        sp::BinaryOperator::Lt => Some(ComparisonOp::Lt),
        sp::BinaryOperator::LtEq => Some(ComparisonOp::LtEq),
        sp::BinaryOperator::Gt => Some(ComparisonOp::Gt),
        sp::BinaryOperator::GtEq => Some(ComparisonOp::GtEq),
        _ => None,
    };
    if let Some(cmp) = cmp {
        return Ok(comparison(cmp, left, right, params));
    }

    let arith = match op {
        sp::BinaryOperator::Plus => ArithmeticOp::Add,
        sp::BinaryOperator::Minus => ArithmeticOp::Sub,
        sp::BinaryOperator::Multiply => ArithmeticOp::Mul,
        sp::BinaryOperator::Divide => ArithmeticOp::Div,
        sp::BinaryOperator::Modulo => ArithmeticOp::Mod,
        sp::BinaryOperator::And | sp::BinaryOperator::Or => {
            let op = if op == sp::BinaryOperator::And {
                ConjunctionOp::And
            } else {
                ConjunctionOp::Or
            };
            return Ok(Expression::Conjunction {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        other => return Err(SqlError::Unsupported(format!("Operator {}", other))),
    };

    let value_type = wider_numeric_type(&left.value_type(), &right.value_type());
    Ok(Expression::Arithmetic {
        op: arith,
        left: Box::new(left),
        right: Box::new(right),
        value_type,
    })
}

/// Build a comparison, typing a parameter operand from the other side
fn comparison(
    op: ComparisonOp,
    mut left: Expression,
    mut right: Expression,
    params: &mut Params,
) -> Expression {
    let left_type = left.value_type();
    let right_type = right.value_type();
    bind_parameter(&mut left, right_type, params);
    bind_parameter(&mut right, left_type, params);
    Expression::compare(op, left, right)
}

fn bind_parameter(expr: &mut Expression, other_type: DataType, params: &mut Params) {
    if let Expression::Parameter { index, value_type } = expr {
        params.set_type(*index, other_type.clone());
        *value_type = other_type;
    }
}

fn negate_if(expr: Expression, negated: bool) -> Expression {
    if negated {
        Expression::Not(Box::new(expr))
    } else {
        expr
    }
}

/// Non-aggregate display columns of a grouped select must be computed from
/// GROUP BY columns
fn validate_grouping(select: &ParsedSelect) -> SqlResult<()> {
    if !select.is_aggregate() {
        return Ok(());
    }
    for col in select.display_columns.iter().filter(|c| !c.is_aggregate()) {
        for tv in col.expression.tuple_values() {
            if !select.group_by.iter().any(|g| g.same_column(tv)) {
                return Err(SqlError::InvalidOperation(format!(
                    "Column '{}.{}' must appear in GROUP BY or be used in an aggregate",
                    tv.table, tv.column
                )));
            }
        }
    }
    Ok(())
}

/// Bind ORDER BY keys to display columns by position, alias, or column
fn resolve_order_by(order_by: sp::OrderBy, select: &ParsedSelect) -> SqlResult<Vec<OrderColumn>> {
    let exprs = match order_by.kind {
        sp::OrderByKind::Expressions(exprs) => exprs,
        sp::OrderByKind::All(_) => return Err(SqlError::Unsupported("ORDER BY ALL".to_string())),
    };

    let mut keys = Vec::with_capacity(exprs.len());
    for item in exprs {
        let ascending = item.options.asc.unwrap_or(true);
        let display = match &item.expr {
            sp::Expr::Value(sp::ValueWithSpan {
                value: sp::Value::Number(n, _),
                ..
            }) => {
                let position = n
                    .parse::<usize>()
                    .ok()
                    .filter(|p| *p >= 1 && *p <= select.display_columns.len())
                    .ok_or_else(|| {
                        SqlError::InvalidOperation(format!("ORDER BY position {} is out of range", n))
                    })?;
                &select.display_columns[position - 1]
            }
            sp::Expr::Identifier(ident) => {
                let name = ident.value.to_lowercase();
                find_display_column(select, None, &name)?
            }
            sp::Expr::CompoundIdentifier(idents) if idents.len() == 2 => {
                let table = idents[0].value.to_lowercase();
                let name = idents[1].value.to_lowercase();
                find_display_column(select, Some(&table), &name)?
            }
            other => {
                return Err(SqlError::Unsupported(format!(
                    "ORDER BY expression {}",
                    other
                )))
            }
        };
        keys.push(OrderColumn {
            column: display.tuple_value(),
            ascending,
        });
    }
    Ok(keys)
}

fn find_display_column<'s>(
    select: &'s ParsedSelect,
    table: Option<&str>,
    name: &str,
) -> SqlResult<&'s DisplayColumn> {
    if table.is_none() {
        if let Some(col) = select.display_columns.iter().find(|c| c.alias == name) {
            return Ok(col);
        }
    }
    select
        .display_columns
        .iter()
        .find(|c| {
            c.table != TEMP_TABLE_NAME
                && c.column == name
                && table.is_none_or(|t| c.table == t)
        })
        .ok_or_else(|| {
            SqlError::Unsupported(format!("ORDER BY column '{}' is not in the select list", name))
        })
}

fn integer_constant(expr: sp::Expr) -> SqlResult<u64> {
    match expr {
        sp::Expr::Value(sp::ValueWithSpan {
            value: sp::Value::Number(n, _),
            ..
        }) => n
            .parse::<u64>()
            .map_err(|_| SqlError::InvalidOperation(format!("Invalid LIMIT or OFFSET: {}", n))),
        other => Err(SqlError::Unsupported(format!(
            "LIMIT and OFFSET must be integer constants, found {}",
            other
        ))),
    }
}

/// Flatten a chain of one set operator into its branches, left to right
fn flatten_set_operation(
    expr: sp::SetExpr,
    kind: &mut Option<SetOpKind>,
    out: &mut Vec<sp::Select>,
) -> SqlResult<()> {
    match expr {
        sp::SetExpr::SetOperation {
            op,
            set_quantifier,
            left,
            right,
        } => {
            let all = match set_quantifier {
                sp::SetQuantifier::All => true,
                sp::SetQuantifier::Distinct | sp::SetQuantifier::None => false,
                other => {
                    return Err(SqlError::Unsupported(format!("Set quantifier {}", other)))
                }
            };
            let this = match (op, all) {
                (sp::SetOperator::Union, false) => SetOpKind::Union,
                (sp::SetOperator::Union, true) => SetOpKind::UnionAll,
                (sp::SetOperator::Intersect, false) => SetOpKind::Intersect,
                (sp::SetOperator::Intersect, true) => SetOpKind::IntersectAll,
                (sp::SetOperator::Except | sp::SetOperator::Minus, false) => SetOpKind::Except,
                (sp::SetOperator::Except | sp::SetOperator::Minus, true) => SetOpKind::ExceptAll,
            };
            match kind {
                Some(existing) if *existing != this => {
                    return Err(SqlError::Unsupported(format!(
                        "Mixing {} and {} in one statement",
                        existing, this
                    )))
                }
                _ => *kind = Some(this),
            }
            flatten_set_operation(*left, kind, out)?;
            flatten_set_operation(*right, kind, out)
        }
        sp::SetExpr::Select(select) => {
            out.push(*select);
            Ok(())
        }
        sp::SetExpr::Query(query) => {
            if query.with.is_some() || query.order_by.is_some() || query.limit_clause.is_some() {
                return Err(SqlError::Unsupported(
                    "ORDER BY or LIMIT inside a set operation branch".to_string(),
                ));
            }
            flatten_set_operation(*query.body, kind, out)
        }
        _ => Err(SqlError::Unsupported("Set operation branch type".to_string())),
    }
}

/// Last identifier of an object name, lowercased
fn object_name(name: &sp::ObjectName) -> SqlResult<String> {
    name.0
        .last()
        .and_then(|part| match part {
            sp::ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
            _ => None,
        })
        .ok_or_else(|| SqlError::Unsupported(format!("Object name {}", name)))
}

/// Split `"a, b ,c"` into range names
fn parse_join_order(text: &str) -> SqlResult<Vec<String>> {
    let names: Vec<String> = text
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    if names.is_empty() {
        return Err(SqlError::InvalidJoinOrder(
            "Join order names no tables".to_string(),
        ));
    }
    Ok(names)
}

/// Get the wider of two numeric types
fn wider_numeric_type(a: &DataType, b: &DataType) -> DataType {
    match (a, b) {
        (DataType::Double, _) | (_, DataType::Double) => DataType::Double,
        (DataType::Float, _) | (_, DataType::Float) => DataType::Float,
        (DataType::BigInt, _) | (_, DataType::BigInt) => DataType::BigInt,
        (DataType::Int, _) | (_, DataType::Int) => DataType::Int,
        (DataType::SmallInt, _) | (_, DataType::SmallInt) => DataType::SmallInt,
        _ => DataType::Int,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, TableDef};
    use crate::sql::Parser;

    fn test_catalog() -> Catalog {
        let mut catalog = Catalog::new();

        let orders = TableDef::new("orders")
            .column(ColumnDef::new("id", DataType::Int).nullable(false))
            .column(ColumnDef::new("user_id", DataType::Int))
            .column(ColumnDef::new("total", DataType::Double))
            .partition_on("id");

        let users = TableDef::new("users")
            .column(ColumnDef::new("id", DataType::Int).nullable(false))
            .column(ColumnDef::new("name", DataType::Varchar(100)));

        catalog.create_table(orders).unwrap();
        catalog.create_table(users).unwrap();
        catalog
    }

    fn resolve(catalog: &Catalog, sql: &str) -> SqlResult<ParsedStatement> {
        let stmt = Parser::parse_one(sql)?;
        Resolver::new(catalog).resolve(stmt, None)
    }

    fn resolve_select(catalog: &Catalog, sql: &str) -> ParsedSelect {
        match resolve(catalog, sql).unwrap() {
            ParsedStatement::Select(s) => s,
            other => panic!("Expected Select, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_select() {
        let catalog = test_catalog();
        let select = resolve_select(&catalog, "SELECT id, name FROM users WHERE id = 1");

        assert_eq!(select.tables.len(), 1);
        assert!(select.tables[0].is_replicated());
        assert_eq!(select.display_columns.len(), 2);
        assert_eq!(select.display_columns[1].alias, "name");
        assert_eq!(select.conjuncts.len(), 1);
    }

    #[test]
    fn test_resolve_table_not_found() {
        let catalog = test_catalog();
        let result = resolve(&catalog, "SELECT * FROM nonexistent");
        assert!(matches!(result, Err(SqlError::TableNotFound(_))));
    }

    #[test]
    fn test_resolve_column_not_found() {
        let catalog = test_catalog();
        let result = resolve(&catalog, "SELECT nonexistent FROM users");
        assert!(matches!(result, Err(SqlError::ColumnNotFound(_))));
    }

    #[test]
    fn test_resolve_ambiguous_column() {
        let catalog = test_catalog();
        let result = resolve(&catalog, "SELECT id FROM users, orders");
        assert!(matches!(result, Err(SqlError::AmbiguousColumn(_))));
    }

    #[test]
    fn test_resolve_join_splits_conjuncts() {
        let catalog = test_catalog();
        let select = resolve_select(
            &catalog,
            "SELECT u.name, o.total FROM users u JOIN orders o ON u.id = o.user_id \
             WHERE o.total > 10 AND u.name IS NOT NULL",
        );

        assert_eq!(select.tables[0].range_name, "u");
        assert_eq!(select.tables[1].range_name, "o");
        assert_eq!(select.tables[1].partition_column.as_deref(), Some("id"));
        // WHERE conjuncts first, then the ON predicate
        assert_eq!(select.conjuncts.len(), 3);
        assert_eq!(select.conjuncts[2].tables_referenced().len(), 2);
    }

    #[test]
    fn test_resolve_aggregate_display_column() {
        let catalog = test_catalog();
        let select = resolve_select(
            &catalog,
            "SELECT user_id, SUM(total) AS spent, COUNT(*) FROM orders GROUP BY user_id",
        );

        assert!(select.is_aggregate());
        assert!(!select.is_single_row_aggregate());
        let spent = &select.display_columns[1];
        assert_eq!(spent.table, TEMP_TABLE_NAME);
        assert_eq!(spent.alias, "spent");
        match &spent.expression {
            Expression::Aggregate(agg) => {
                assert_eq!(agg.kind, AggregateKind::Sum);
                assert_eq!(agg.value_type, DataType::Double);
            }
            other => panic!("Expected aggregate, got {:?}", other),
        }
        match &select.display_columns[2].expression {
            Expression::Aggregate(agg) => assert_eq!(agg.kind, AggregateKind::CountStar),
            other => panic!("Expected COUNT(*), got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_ungrouped_column_rejected() {
        let catalog = test_catalog();
        let result = resolve(&catalog, "SELECT user_id, SUM(total) FROM orders");
        assert!(matches!(result, Err(SqlError::InvalidOperation(_))));
    }

    #[test]
    fn test_resolve_nested_aggregate_rejected() {
        let catalog = test_catalog();
        let result = resolve(&catalog, "SELECT SUM(total) + 1 FROM orders");
        assert!(matches!(result, Err(SqlError::InvalidOperation(_))));
    }

    #[test]
    fn test_resolve_parameters_typed_from_context() {
        let catalog = test_catalog();
        let select = resolve_select(
            &catalog,
            "SELECT name FROM users WHERE id = ? AND name = ?",
        );
        assert_eq!(
            select.param_types,
            vec![DataType::Int, DataType::Varchar(100)]
        );
    }

    #[test]
    fn test_resolve_order_by_limit() {
        let catalog = test_catalog();
        let select = resolve_select(
            &catalog,
            "SELECT id, total AS t FROM orders ORDER BY t DESC, 1 LIMIT 5 OFFSET 2",
        );

        assert_eq!(select.order_by.len(), 2);
        assert_eq!(select.order_by[0].column.alias, "t");
        assert!(!select.order_by[0].ascending);
        assert_eq!(select.order_by[1].column.column, "id");
        assert_eq!(select.limit, Some(5));
        assert_eq!(select.offset, Some(2));
    }

    #[test]
    fn test_resolve_union() {
        let catalog = test_catalog();
        let stmt = resolve(
            &catalog,
            "SELECT id FROM users UNION SELECT id FROM orders UNION SELECT user_id FROM orders",
        )
        .unwrap();

        match stmt {
            ParsedStatement::Union(u) => {
                assert_eq!(u.op, SetOpKind::Union);
                assert_eq!(u.children.len(), 3);
            }
            other => panic!("Expected Union, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_union_width_mismatch() {
        let catalog = test_catalog();
        let result = resolve(&catalog, "SELECT id, name FROM users UNION ALL SELECT id FROM orders");
        assert!(matches!(result, Err(SqlError::SetOpMismatch(_))));
    }

    #[test]
    fn test_resolve_mixed_set_operators_unsupported() {
        let catalog = test_catalog();
        let result = resolve(
            &catalog,
            "SELECT id FROM users UNION SELECT id FROM orders EXCEPT SELECT user_id FROM orders",
        );
        assert!(matches!(result, Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn test_resolve_join_order() {
        let catalog = test_catalog();
        let stmt = Parser::parse_one("SELECT * FROM users, orders").unwrap();
        let parsed = Resolver::new(&catalog)
            .resolve(stmt, Some("Orders , users"))
            .unwrap();
        match parsed {
            ParsedStatement::Select(s) => assert_eq!(
                s.join_order,
                Some(vec!["orders".to_string(), "users".to_string()])
            ),
            other => panic!("Expected Select, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_join_order_rejected_on_union() {
        let catalog = test_catalog();
        let stmt = Parser::parse_one("SELECT id FROM users UNION SELECT user_id FROM orders").unwrap();
        let result = Resolver::new(&catalog).resolve(stmt, Some("users"));
        assert!(matches!(result, Err(SqlError::InvalidJoinOrder(_))));

        let stmt = Parser::parse_one("SELECT id FROM users").unwrap();
        let result = Resolver::new(&catalog).resolve(stmt, Some(" , "));
        assert!(matches!(result, Err(SqlError::InvalidJoinOrder(_))));
    }

    #[test]
    fn test_resolve_non_select_unsupported() {
        let catalog = test_catalog();
        let result = resolve(&catalog, "DELETE FROM users WHERE id = 1");
        assert!(matches!(result, Err(SqlError::Unsupported(_))));
    }
}
