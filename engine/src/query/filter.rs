//! Filter tree compilation into parameterized SQL predicates.

use super::ast::{FilterNode, FilterOp, LogicalKind, Value};
use super::ident::quote_identifier;
use crate::error::ValidationError;
use crate::schema::{ColumnType, TableSchema};

/// Deepest logical nesting a filter may use.
pub const MAX_FILTER_NESTING: usize = 64;

/// A compiled predicate: SQL text with `?` placeholders and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// SQL text, without a leading `WHERE`.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<Value>,
}

/// Compiles a filter tree against `table`.
///
/// Every comparison column is resolved against the schema and every operand
/// is type-checked against the column before it is bound. The root logical
/// group is emitted without parentheses; nested groups are parenthesized.
///
/// # Errors
///
/// Returns a [`ValidationError`] for unknown columns, operands that do not
/// match the column type, empty `in` lists, empty AND/OR groups, NOT
/// nodes without exactly one child, logical nesting deeper than
/// [`MAX_FILTER_NESTING`] and tables whose identifiers contain `?`.
///
/// # Examples
///
/// ```
/// use engine::query::{compile_filter, FilterNode, FilterOp, Value};
/// use engine::schema::{ColumnSchema, TableSchema};
///
/// let sales = TableSchema::new(
///     "sales",
///     vec![
///         ColumnSchema::new("region", "String"),
///         ColumnSchema::new("amount", "Float64"),
///     ],
/// );
/// let filter = FilterNode::and(vec![
///     FilterNode::eq("region", "North"),
///     FilterNode::compare("amount", FilterOp::Gte, 500),
/// ]);
///
/// let predicate = compile_filter(&filter, &sales).unwrap();
/// assert_eq!(predicate.sql, "region = ? AND amount >= ?");
/// assert_eq!(predicate.params, vec![Value::from("North"), Value::Integer(500)]);
/// ```
pub fn compile(node: &FilterNode, table: &TableSchema) -> Result<Predicate, ValidationError> {
    table.check_identifiers()?;
    let mut compiler = FilterCompiler {
        table,
        params: Vec::new(),
        nesting: 0,
    };
    let sql = compiler.node(node, true)?;
    Ok(Predicate {
        sql,
        params: compiler.params,
    })
}

struct FilterCompiler<'a> {
    table: &'a TableSchema,
    params: Vec<Value>,
    nesting: usize,
}

impl FilterCompiler<'_> {
    fn node(&mut self, node: &FilterNode, root: bool) -> Result<String, ValidationError> {
        match node {
            FilterNode::Comparison {
                column,
                operator,
                value,
            } => self.comparison(column, *operator, value),
            FilterNode::Logical { kind, children } => {
                if self.nesting == MAX_FILTER_NESTING {
                    return Err(ValidationError::MalformedFilter(format!(
                        "logical groups nest deeper than {MAX_FILTER_NESTING} levels"
                    )));
                }
                self.nesting += 1;
                let sql = self.logical(*kind, children, root);
                self.nesting -= 1;
                sql
            }
        }
    }

    fn logical(
        &mut self,
        kind: LogicalKind,
        children: &[FilterNode],
        root: bool,
    ) -> Result<String, ValidationError> {
        match kind {
            LogicalKind::Not => {
                let [child] = children else {
                    return Err(ValidationError::MalformedFilter(format!(
                        "NOT requires exactly one child, got {}",
                        children.len()
                    )));
                };
                let inner = self.node(child, true)?;
                Ok(format!("NOT ({inner})"))
            }
            LogicalKind::And | LogicalKind::Or => {
                if children.is_empty() {
                    return Err(ValidationError::MalformedFilter(format!(
                        "{kind} group requires at least one child"
                    )));
                }
                let parts = children
                    .iter()
                    .map(|child| self.node(child, false))
                    .collect::<Result<Vec<_>, _>>()?;
                let joined = parts.join(&format!(" {kind} "));
                if root {
                    Ok(joined)
                } else {
                    Ok(format!("({joined})"))
                }
            }
        }
    }

    fn comparison(
        &mut self,
        column: &str,
        operator: FilterOp,
        value: &Value,
    ) -> Result<String, ValidationError> {
        let schema = self.table.resolve(column)?;
        let column_type = schema.column_type();
        let ident = quote_identifier(&schema.name);

        match operator {
            FilterOp::IsNull => match value {
                Value::Boolean(true) => Ok(format!("{ident} IS NULL")),
                Value::Boolean(false) => Ok(format!("{ident} IS NOT NULL")),
                other => Err(mismatch(column, "boolean", other)),
            },
            FilterOp::In | FilterOp::NotIn => {
                let Value::List(items) = value else {
                    return Err(mismatch(
                        column,
                        &format!("list of {}", column_type.describe()),
                        value,
                    ));
                };
                if items.is_empty() {
                    return Err(ValidationError::MalformedFilter(format!(
                        "operator '{operator}' on field '{column}' requires a non-empty list"
                    )));
                }
                // On array columns each candidate is itself an array.
                if let Some(bad) = items.iter().find(|item| !column_type.accepts(item)) {
                    return Err(mismatch(column, &column_type.describe(), bad));
                }
                self.params.push(value.clone());
                Ok(format!("{ident} {} ?", operator.sql()))
            }
            FilterOp::Like | FilterOp::Ilike => {
                if matches!(column_type, ColumnType::Array(_)) {
                    return Err(mismatch(column, &column_type.describe(), value));
                }
                if !matches!(value, Value::String(_)) {
                    return Err(mismatch(column, "string pattern", value));
                }
                self.params.push(value.clone());
                Ok(format!("{ident} {} ?", operator.sql()))
            }
            FilterOp::Eq
            | FilterOp::Ne
            | FilterOp::Gt
            | FilterOp::Gte
            | FilterOp::Lt
            | FilterOp::Lte => {
                let list_on_scalar = matches!(value, Value::List(_))
                    && !matches!(column_type, ColumnType::Array(_));
                if list_on_scalar || !column_type.accepts(value) {
                    return Err(mismatch(column, &column_type.describe(), value));
                }
                self.params.push(value.clone());
                Ok(format!("{ident} {} ?", operator.sql()))
            }
        }
    }
}

fn mismatch(field: &str, expected: &str, actual: &Value) -> ValidationError {
    ValidationError::TypeMismatch {
        field: field.to_string(),
        expected: expected.to_string(),
        actual: format!("{actual} ({})", actual.kind()),
    }
}
