//! Schema and request documents loaded from JSON files.

use anyhow::{Context, Result};
use engine::query::{Aggregation, FilterNode, OperationKind, OrderBy, QueryRequest, SelectionNode};
use engine::schema::{SchemaRegistry, TableSchema};
use engine::ValidationError;
use serde::Deserialize;
use std::path::Path;

/// Loads a JSON array of table schemas into a registry.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a list of tables.
pub fn load_schemas(path: &Path) -> Result<SchemaRegistry> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read schema file {}", path.display()))?;
    let tables: Vec<TableSchema> = serde_json::from_str(&text)
        .with_context(|| format!("invalid schema file {}", path.display()))?;
    Ok(tables.into_iter().collect())
}

/// Loads a request document.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_request(path: &Path) -> Result<RequestDocument> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read request file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid request file {}", path.display()))
}

/// A query request as written by hand: filters use the graph-style shape
/// (`{"_and": [...], "region": {"eq": "North"}}`) and the selection tree is
/// optional.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestDocument {
    pub table: String,
    #[serde(default = "default_operation")]
    pub operation: OperationKind,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub filter: Option<serde_json::Value>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
    #[serde(default)]
    pub having: Option<serde_json::Value>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    #[serde(default)]
    pub selection: Option<Vec<SelectionNode>>,
}

fn default_operation() -> OperationKind {
    OperationKind::List
}

impl RequestDocument {
    /// Converts the document into an engine request and its selection tree.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if a filter does not follow the
    /// graph-style shape.
    pub fn into_request(self) -> Result<(QueryRequest, Option<Vec<SelectionNode>>), ValidationError> {
        let filter = self.filter.as_ref().map(FilterNode::from_json).transpose()?;
        let having = self.having.as_ref().map(FilterNode::from_json).transpose()?;

        let request = QueryRequest {
            table: self.table,
            operation: self.operation,
            fields: self.fields,
            filter,
            group_by: self.group_by,
            aggregations: self.aggregations,
            having,
            order_by: self.order_by,
            limit: self.limit,
            offset: self.offset,
        };
        Ok((request, self.selection))
    }
}
