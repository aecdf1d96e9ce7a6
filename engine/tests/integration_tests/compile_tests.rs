//! Integration tests for request compilation.
//!
//! Tests cover:
//! - Graph-style JSON filters compiled to parameterized predicates
//! - Deterministic ordering for tables with and without a primary key
//! - Aggregate projections and HAVING over aggregate aliases
//! - Validation errors with suggestions

use engine::query::{
    AggregateFunction, Aggregation, FilterNode, FilterOp, OrderBy, QueryBuilder, QueryRequest,
    Value,
};
use engine::schema::{ColumnSchema, SchemaRegistry, TableSchema};
use engine::{CorrelationId, Error, ErrorKind, ValidationError};
use serde_json::json;

use super::common::sales_schemas;

#[test]
fn test_and_filter_with_order_and_limit() {
    let schemas = sales_schemas();
    let filter = FilterNode::from_json(&json!({
        "_and": [
            {"region": {"eq": "North"}},
            {"amount": {"gte": 500}}
        ]
    }))
    .unwrap();
    let request = QueryRequest::list("events")
        .with_filter(filter)
        .with_order(OrderBy::desc("amount"))
        .with_limit(10);

    let compiled = QueryBuilder::new(&schemas).build(&request).unwrap();

    assert_eq!(
        compiled.sql,
        "SELECT amount, region FROM events WHERE region = ? AND amount >= ? \
         ORDER BY amount DESC, region ASC LIMIT 10"
    );
    assert_eq!(
        compiled.params,
        vec![Value::String("North".to_string()), Value::Integer(500)]
    );
    assert_eq!(compiled.placeholder_count(), compiled.params.len());
}

#[test]
fn test_compilation_is_deterministic() {
    let schemas = sales_schemas();
    let builder = QueryBuilder::new(&schemas);
    let filter = FilterNode::from_json(&json!({
        "_or": [
            {"region": {"in": ["North", "East"]}},
            {"_not": {"amount": {"lt": 10}}}
        ]
    }))
    .unwrap();
    let request = QueryRequest::list("sales")
        .with_fields(vec!["region", "amount"])
        .with_filter(filter)
        .with_limit(20)
        .with_offset(40);

    let first = builder.build(&request).unwrap();
    let second = builder.build(&request).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first.sql,
        "SELECT region, amount FROM sales WHERE region IN ? OR NOT (amount < ?) \
         ORDER BY id ASC LIMIT 20 OFFSET 40"
    );
}

#[test]
fn test_single_forces_limit_one() {
    let schemas = sales_schemas();
    let request = QueryRequest::single("sales")
        .with_filter(FilterNode::eq("id", 42))
        .with_limit(50);

    let compiled = QueryBuilder::new(&schemas).build(&request).unwrap();
    assert!(compiled.sql.ends_with("WHERE id = ? ORDER BY id ASC LIMIT 1"));
    assert_eq!(compiled.params, vec![Value::Integer(42)]);
}

#[test]
fn test_aggregate_sum_with_count() {
    let schemas = sales_schemas();
    let request = QueryRequest::aggregate("sales", vec!["region"])
        .with_aggregation(Aggregation::new("amount", vec![AggregateFunction::Sum]));

    let compiled = QueryBuilder::new(&schemas).build(&request).unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT region, sum(amount) AS sum_amount, count() AS _count FROM sales \
         GROUP BY region ORDER BY region ASC"
    );
    assert!(compiled.params.is_empty());
}

#[test]
fn test_aggregate_having_params_follow_where_params() {
    let schemas = sales_schemas();
    let request = QueryRequest::aggregate("sales", vec!["region"])
        .with_filter(FilterNode::compare("quantity", FilterOp::Gt, 0))
        .with_aggregation(Aggregation::new("amount", vec![AggregateFunction::Sum]))
        .with_having(FilterNode::and(vec![
            FilterNode::compare("sum_amount", FilterOp::Gte, 1000.0),
            FilterNode::compare("_count", FilterOp::Gt, 5),
        ]))
        .with_order(OrderBy::desc("sum_amount"));

    let compiled = QueryBuilder::new(&schemas).build(&request).unwrap();
    assert!(compiled.sql.contains("WHERE quantity > ?"));
    assert!(compiled.sql.contains("HAVING sum_amount >= ? AND _count > ?"));
    assert!(compiled.sql.ends_with("ORDER BY sum_amount DESC, region ASC"));
    assert_eq!(
        compiled.params,
        vec![Value::Integer(0), Value::Float(1000.0), Value::Integer(5)]
    );
}

#[test]
fn test_unknown_column_suggests_names() {
    let schemas = sales_schemas();
    let request = QueryRequest::list("sales").with_filter(FilterNode::eq("foo", 1));

    let err = QueryBuilder::new(&schemas).build(&request).unwrap_err();
    match &err {
        ValidationError::UnknownColumn {
            table,
            column,
            suggestions,
        } => {
            assert_eq!(table, "sales");
            assert_eq!(column, "foo");
            assert_eq!(suggestions, &vec!["id".to_string()]);
        }
        other => panic!("expected unknown column, got {other:?}"),
    }

    let surfaced = Error::validation(&err, CorrelationId::new());
    assert_eq!(surfaced.kind(), ErrorKind::Validation);
    assert_eq!(surfaced.code(), "VALIDATION_ERROR");
    assert_eq!(surfaced.context()["column"], "foo");
    assert_eq!(surfaced.suggestions(), ["Did you mean 'id'?".to_string()]);
}

#[test]
fn test_unknown_column_lists_nearest_columns_when_none_is_close() {
    let schemas = SchemaRegistry::new().with_table(TableSchema::new(
        "sales",
        vec![
            ColumnSchema::new("amount", "FLOAT"),
            ColumnSchema::new("region", "VARCHAR"),
        ],
    ));
    let request = QueryRequest::list("sales").with_filter(FilterNode::eq("foo", 1));

    let err = QueryBuilder::new(&schemas).build(&request).unwrap_err();
    let surfaced = Error::validation(&err, CorrelationId::new());
    assert_eq!(
        surfaced.suggestions(),
        [
            "Did you mean 'amount'?".to_string(),
            "Did you mean 'region'?".to_string()
        ]
    );
}

#[test]
fn test_misspelled_column_suggestion() {
    let schemas = sales_schemas();
    let request = QueryRequest::list("sales").with_fields(vec!["regoin"]);

    let err = QueryBuilder::new(&schemas).build(&request).unwrap_err();
    assert!(matches!(
        err,
        ValidationError::UnknownColumn { ref suggestions, .. } if suggestions[0] == "region"
    ));
}

#[test]
fn test_unknown_table_suggests_names() {
    let schemas = sales_schemas();
    let err = QueryBuilder::new(&schemas)
        .build(&QueryRequest::list("sale"))
        .unwrap_err();
    assert!(matches!(
        err,
        ValidationError::UnknownTable { ref suggestions, .. } if suggestions == &vec!["sales".to_string()]
    ));
}

#[test]
fn test_json_filter_rejections() {
    let schemas = sales_schemas();
    let builder = QueryBuilder::new(&schemas);

    let unknown_operator = FilterNode::from_json(&json!({"region": {"contains": "x"}}));
    assert!(matches!(
        unknown_operator,
        Err(ValidationError::UnknownOperator { ref operator, .. }) if operator == "contains"
    ));

    let empty_group = FilterNode::from_json(&json!({"_and": []}));
    assert!(matches!(empty_group, Err(ValidationError::MalformedFilter(_))));

    let mismatch = FilterNode::from_json(&json!({"amount": {"gt": "lots"}})).unwrap();
    let err = builder
        .build(&QueryRequest::list("sales").with_filter(mismatch))
        .unwrap_err();
    assert!(matches!(err, ValidationError::TypeMismatch { ref field, .. } if field == "amount"));
}

#[test]
fn test_hostile_values_stay_parameters() {
    let schemas = sales_schemas();
    let hostile = "North'; DROP TABLE sales; --";
    let request = QueryRequest::list("sales").with_filter(FilterNode::eq("region", hostile));

    let compiled = QueryBuilder::new(&schemas).build(&request).unwrap();
    assert!(!compiled.sql.contains("DROP"));
    assert_eq!(compiled.params, vec![Value::String(hostile.to_string())]);
}
