//! Parsing of graph-style filter input into [`FilterNode`] trees.
//!
//! The accepted shape is
//!
//! ```json
//! {
//!   "_and": [ { ... }, { ... } ],
//!   "_or":  [ { ... } ],
//!   "_not": { ... },
//!   "region": { "eq": "North" },
//!   "amount": { "gte": 500, "lt": 1000 }
//! }
//! ```
//!
//! Several keys at one level, and several operators on one column, are
//! combined with AND.

use super::ast::{FilterNode, FilterOp, Value};
use crate::error::ValidationError;
use serde_json::Map;

impl FilterNode {
    /// Parses the graph-style JSON filter shape.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownOperator`] for operators that do not
    /// exist and [`ValidationError::MalformedFilter`] for anything that does
    /// not follow the shape above.
    ///
    /// # Examples
    ///
    /// ```
    /// use engine::query::{FilterNode, FilterOp};
    /// use serde_json::json;
    ///
    /// let filter = FilterNode::from_json(&json!({"region": {"eq": "North"}})).unwrap();
    /// assert_eq!(filter, FilterNode::eq("region", "North"));
    ///
    /// let err = FilterNode::from_json(&json!({"region": {"contains": "x"}}));
    /// assert!(err.is_err());
    /// ```
    pub fn from_json(input: &serde_json::Value) -> Result<Self, ValidationError> {
        let object = input.as_object().ok_or_else(|| {
            ValidationError::MalformedFilter(format!("expected an object, got {input}"))
        })?;
        parse_object(object)
    }
}

fn parse_object(object: &Map<String, serde_json::Value>) -> Result<FilterNode, ValidationError> {
    if object.is_empty() {
        return Err(ValidationError::MalformedFilter(
            "filter object has no conditions".to_string(),
        ));
    }

    let mut nodes = Vec::with_capacity(object.len());
    for (key, value) in object {
        match key.as_str() {
            "_and" => nodes.push(FilterNode::and(parse_list(key, value)?)),
            "_or" => nodes.push(FilterNode::or(parse_list(key, value)?)),
            "_not" => nodes.push(FilterNode::not(FilterNode::from_json(value)?)),
            column => nodes.extend(parse_column(column, value)?),
        }
    }

    Ok(combine(nodes))
}

fn parse_list(key: &str, value: &serde_json::Value) -> Result<Vec<FilterNode>, ValidationError> {
    let items = value.as_array().ok_or_else(|| {
        ValidationError::MalformedFilter(format!("'{key}' expects a list of filters"))
    })?;
    if items.is_empty() {
        return Err(ValidationError::MalformedFilter(format!(
            "'{key}' expects at least one filter"
        )));
    }
    items.iter().map(FilterNode::from_json).collect()
}

fn parse_column(column: &str, value: &serde_json::Value) -> Result<Vec<FilterNode>, ValidationError> {
    let operators = value.as_object().ok_or_else(|| {
        ValidationError::MalformedFilter(format!(
            "field '{column}' expects an operator object such as {{\"eq\": ...}}"
        ))
    })?;
    if operators.is_empty() {
        return Err(ValidationError::MalformedFilter(format!(
            "field '{column}' has no operators"
        )));
    }

    operators
        .iter()
        .map(|(name, operand)| {
            let operator =
                FilterOp::from_name(name).ok_or_else(|| ValidationError::UnknownOperator {
                    field: column.to_string(),
                    operator: name.clone(),
                })?;
            let value = Value::from_json(operand).ok_or_else(|| {
                ValidationError::MalformedFilter(format!(
                    "operand of '{name}' on field '{column}' must be a scalar or a list"
                ))
            })?;
            Ok(FilterNode::compare(column, operator, value))
        })
        .collect()
}

fn combine(mut nodes: Vec<FilterNode>) -> FilterNode {
    if nodes.len() == 1 {
        nodes.remove(0)
    } else {
        FilterNode::and(nodes)
    }
}
