//! Assembly of complete SELECT statements from validated requests.

use super::ast::{
    AggregateFunction, CompiledQuery, OperationKind, OrderBy, QueryRequest, SortOrder, Value,
};
use super::filter::compile;
use super::ident::quote_identifier;
use crate::error::ValidationError;
use crate::schema::{ColumnSchema, SchemaRegistry, TableSchema};

/// Alias of the row count emitted by every aggregate statement.
pub const COUNT_ALIAS: &str = "_count";

/// Compiles [`QueryRequest`]s into [`CompiledQuery`]s against a schema registry.
///
/// Compilation is pure: the same request and registry always yield the same
/// SQL text and parameters.
#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> QueryBuilder<'a> {
    /// Creates a builder over `registry`.
    #[must_use]
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Compiles `request`.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the table, any column, or any filter
    /// operand is invalid for the target schema.
    ///
    /// # Examples
    ///
    /// ```
    /// use engine::query::{FilterNode, FilterOp, QueryBuilder, QueryRequest};
    /// use engine::schema::{ColumnSchema, SchemaRegistry, TableSchema};
    ///
    /// let registry = SchemaRegistry::new().with_table(TableSchema::new(
    ///     "sales",
    ///     vec![
    ///         ColumnSchema::new("id", "UInt64").primary_key(),
    ///         ColumnSchema::new("region", "String"),
    ///         ColumnSchema::new("amount", "Float64"),
    ///     ],
    /// ));
    ///
    /// let request = QueryRequest::list("sales")
    ///     .with_filter(FilterNode::and(vec![
    ///         FilterNode::eq("region", "North"),
    ///         FilterNode::compare("amount", FilterOp::Gte, 500),
    ///     ]))
    ///     .with_limit(10);
    ///
    /// let compiled = QueryBuilder::new(&registry).build(&request).unwrap();
    /// assert_eq!(
    ///     compiled.sql,
    ///     "SELECT id, region, amount FROM sales WHERE region = ? AND amount >= ? ORDER BY id ASC LIMIT 10"
    /// );
    /// ```
    pub fn build(&self, request: &QueryRequest) -> Result<CompiledQuery, ValidationError> {
        let table = self.registry.table(&request.table)?;
        table.check_identifiers()?;
        let statement = match request.operation {
            OperationKind::Single | OperationKind::List => rows_statement(table, request)?,
            OperationKind::Aggregate => aggregate_statement(table, request)?,
        };
        Ok(statement.finish(table, request.operation))
    }
}

#[derive(Default)]
struct Statement {
    projection: Vec<String>,
    where_clause: Option<String>,
    group_by: Vec<String>,
    having: Option<String>,
    order_by: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    params: Vec<Value>,
}

impl Statement {
    fn finish(self, table: &TableSchema, operation: OperationKind) -> CompiledQuery {
        let mut sql = format!(
            "SELECT {} FROM {}",
            self.projection.join(", "),
            quote_identifier(&table.name)
        );
        if let Some(predicate) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(predicate);
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        if let Some(predicate) = &self.having {
            sql.push_str(" HAVING ");
            sql.push_str(predicate);
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        CompiledQuery {
            sql,
            params: self.params,
            table: table.name.clone(),
            operation,
        }
    }
}

fn rows_statement(table: &TableSchema, request: &QueryRequest) -> Result<Statement, ValidationError> {
    if !request.group_by.is_empty() || !request.aggregations.is_empty() || request.having.is_some() {
        return Err(ValidationError::InvalidRequest(format!(
            "group_by, aggregations and having only apply to aggregate requests, not {}",
            request.operation
        )));
    }

    let projection = if request.fields.is_empty() {
        table.columns.iter().collect::<Vec<_>>()
    } else {
        dedup(&request.fields)
            .into_iter()
            .map(|field| table.resolve(field))
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut statement = Statement {
        projection: projection
            .iter()
            .map(|column| quote_identifier(&column.name))
            .collect(),
        ..Statement::default()
    };

    if let Some(filter) = &request.filter {
        let predicate = compile(filter, table)?;
        statement.where_clause = Some(predicate.sql);
        statement.params = predicate.params;
    }

    let explicit = resolve_order(&request.order_by, table)?;
    let primary_key: Vec<&str> = table.primary_key().map(|c| c.name.as_str()).collect();
    let identity: Vec<&str> = if primary_key.is_empty() {
        table.column_names().collect()
    } else {
        primary_key
    };
    statement.order_by = order_with_tie_break(&explicit, &identity);

    statement.limit = match request.operation {
        OperationKind::Single => Some(1),
        _ => request.limit,
    };
    statement.offset = request.offset;
    Ok(statement)
}

fn aggregate_statement(
    table: &TableSchema,
    request: &QueryRequest,
) -> Result<Statement, ValidationError> {
    if request.group_by.is_empty() {
        return Err(ValidationError::InvalidRequest(
            "aggregate requests require at least one group_by column".to_string(),
        ));
    }

    let group_columns = dedup(&request.group_by)
        .into_iter()
        .map(|name| table.resolve(name))
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(field) = request
        .fields
        .iter()
        .find(|field| !group_columns.iter().any(|c| &c.name == *field))
    {
        return Err(ValidationError::InvalidRequest(format!(
            "field '{field}' must be a group_by column in an aggregate request"
        )));
    }

    let aggregates = aggregate_columns(table, request, &group_columns)?;

    // Namespace visible to HAVING and ORDER BY after aggregation.
    let mut output_columns: Vec<ColumnSchema> =
        group_columns.iter().map(|c| (*c).clone()).collect();
    output_columns.extend(aggregates.iter().map(|a| a.output.clone()));
    output_columns.push(ColumnSchema::new(COUNT_ALIAS, "UInt64"));
    let output = TableSchema::new(table.name.clone(), output_columns);

    let mut projection: Vec<String> = group_columns
        .iter()
        .map(|c| quote_identifier(&c.name))
        .collect();
    projection.extend(aggregates.iter().map(|a| {
        format!(
            "{}({}) AS {}",
            a.function.as_str(),
            quote_identifier(&a.source),
            quote_identifier(&a.output.name)
        )
    }));
    projection.push(format!("count() AS {COUNT_ALIAS}"));

    let mut statement = Statement {
        projection,
        group_by: group_columns
            .iter()
            .map(|c| quote_identifier(&c.name))
            .collect(),
        ..Statement::default()
    };

    if let Some(filter) = &request.filter {
        let predicate = compile(filter, table)?;
        statement.where_clause = Some(predicate.sql);
        statement.params = predicate.params;
    }
    if let Some(having) = &request.having {
        let predicate = compile(having, &output)?;
        statement.having = Some(predicate.sql);
        statement.params.extend(predicate.params);
    }

    let explicit = resolve_order(&request.order_by, &output)?;
    let group_names: Vec<&str> = group_columns.iter().map(|c| c.name.as_str()).collect();
    statement.order_by = order_with_tie_break(&explicit, &group_names);

    statement.limit = request.limit;
    statement.offset = request.offset;
    Ok(statement)
}

struct AggregateColumn {
    function: AggregateFunction,
    source: String,
    output: ColumnSchema,
}

fn aggregate_columns(
    table: &TableSchema,
    request: &QueryRequest,
    group_columns: &[&ColumnSchema],
) -> Result<Vec<AggregateColumn>, ValidationError> {
    let mut requested: Vec<(&ColumnSchema, AggregateFunction)> = Vec::new();

    if request.aggregations.is_empty() {
        for column in &table.columns {
            let grouped = group_columns.iter().any(|g| g.name == column.name);
            if !grouped && column.column_type().is_numeric() {
                for function in AggregateFunction::NUMERIC_DEFAULTS {
                    requested.push((column, function));
                }
            }
        }
    } else {
        for aggregation in &request.aggregations {
            let column = table.resolve(&aggregation.column)?;
            if aggregation.functions.is_empty() {
                return Err(ValidationError::InvalidRequest(format!(
                    "aggregation on '{}' lists no functions",
                    column.name
                )));
            }
            for function in &aggregation.functions {
                if function.requires_numeric() && !column.column_type().is_numeric() {
                    return Err(ValidationError::TypeMismatch {
                        field: column.name.clone(),
                        expected: format!("numeric column for {}", function.as_str()),
                        actual: column.data_type.clone(),
                    });
                }
                requested.push((column, *function));
            }
        }
    }

    let mut aggregates: Vec<AggregateColumn> = Vec::with_capacity(requested.len());
    for (column, function) in requested {
        let alias = function.alias(&column.name);
        if aggregates.iter().any(|a| a.output.name == alias) {
            continue;
        }
        let output_type = match function {
            AggregateFunction::Avg => "Float64".to_string(),
            AggregateFunction::Count => "UInt64".to_string(),
            AggregateFunction::Sum | AggregateFunction::Min | AggregateFunction::Max => {
                column.data_type.clone()
            }
        };
        aggregates.push(AggregateColumn {
            function,
            source: column.name.clone(),
            output: ColumnSchema::new(alias, output_type),
        });
    }
    Ok(aggregates)
}

fn resolve_order<'r>(
    order_by: &'r [OrderBy],
    namespace: &TableSchema,
) -> Result<Vec<&'r OrderBy>, ValidationError> {
    let mut resolved: Vec<&OrderBy> = Vec::with_capacity(order_by.len());
    for entry in order_by {
        namespace.resolve(&entry.column)?;
        if !resolved.iter().any(|r| r.column == entry.column) {
            resolved.push(entry);
        }
    }
    Ok(resolved)
}

fn order_with_tie_break(explicit: &[&OrderBy], identity: &[&str]) -> Vec<String> {
    let mut order: Vec<String> = explicit
        .iter()
        .map(|entry| format!("{} {}", quote_identifier(&entry.column), entry.order))
        .collect();
    for column in identity {
        if !explicit.iter().any(|entry| entry.column == *column) {
            order.push(format!("{} {}", quote_identifier(column), SortOrder::Asc));
        }
    }
    order
}

fn dedup(names: &[String]) -> Vec<&str> {
    let mut seen: Vec<&str> = Vec::with_capacity(names.len());
    for name in names {
        if !seen.contains(&name.as_str()) {
            seen.push(name);
        }
    }
    seen
}
