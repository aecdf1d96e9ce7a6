//! Integration tests for the engine context.
//!
//! Tests cover:
//! - Start-up and shutdown
//! - Depth limits on selection trees
//! - Default limits for list requests
//! - Computed fields resolved after execution
//! - Batches with per-request validation errors

use engine::computed::ComputedFieldRegistry;
use engine::config::EngineConfig;
use engine::execution::Row;
use engine::query::{QueryRequest, SelectionNode, Value};
use engine::{ErrorKind, QueryEngine};
use serde_json::json;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use super::common::{sales_rows, sales_schemas, ScriptedConnector, UnreachableConnector};

async fn start(config: EngineConfig, connector: &ScriptedConnector) -> QueryEngine {
    start_with(config, ComputedFieldRegistry::new(), connector).await
}

async fn start_with(
    config: EngineConfig,
    computed: ComputedFieldRegistry,
    connector: &ScriptedConnector,
) -> QueryEngine {
    QueryEngine::start(config, sales_schemas(), computed, connector)
        .await
        .unwrap()
}

fn unit_price(row: &Row) -> serde_json::Value {
    let amount = row.get("amount").and_then(serde_json::Value::as_f64);
    let quantity = row.get("quantity").and_then(serde_json::Value::as_f64);
    match (amount, quantity) {
        (Some(amount), Some(quantity)) if quantity > 0.0 => json!(amount / quantity),
        _ => serde_json::Value::Null,
    }
}

#[tokio::test]
async fn test_start_fails_when_unreachable() {
    let err = QueryEngine::start(
        EngineConfig::default(),
        sales_schemas(),
        ComputedFieldRegistry::new(),
        &UnreachableConnector,
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.message().contains("refused"));
}

#[tokio::test]
async fn test_run_returns_rows_with_correlation_id() {
    let connector = ScriptedConnector::new();
    connector.push_rows(sales_rows(3));
    let engine = start(EngineConfig::default(), &connector).await;

    let result = engine
        .run(&QueryRequest::list("sales").with_limit(3), None)
        .await
        .unwrap();

    assert_eq!(result.row_count, 3);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.first().unwrap()["region"], "North");

    let history = engine
        .metrics()
        .history(&engine::metrics::HistoryFilter::all());
    assert_eq!(history[0].correlation_id, result.correlation_id);
}

#[tokio::test]
async fn test_depth_guard_rejects_deep_selection() {
    let connector = ScriptedConnector::new();
    let engine = start(EngineConfig::default().with_max_depth(2), &connector).await;

    let shallow = vec![SelectionNode::object(
        "sales",
        vec![SelectionNode::field("id"), SelectionNode::field("amount")],
    )];
    let deep = vec![SelectionNode::object(
        "sales",
        vec![SelectionNode::object(
            "customer",
            vec![SelectionNode::object(
                "address",
                vec![SelectionNode::field("city")],
            )],
        )],
    )];
    let introspection = vec![SelectionNode::object(
        "__schema",
        vec![SelectionNode::object(
            "types",
            vec![SelectionNode::object(
                "fields",
                vec![SelectionNode::field("name")],
            )],
        )],
    )];

    let request = QueryRequest::list("sales");
    assert_ok!(engine.run(&request, Some(&shallow)).await);
    assert_ok!(engine.compile(&request, Some(&introspection)));

    let err = assert_err!(engine.run(&request, Some(&deep)).await);
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        err.message(),
        "Query depth (3) exceeds maximum allowed depth (2)"
    );
    assert_eq!(err.context()["depth"], "3");
    assert_eq!(connector.call_count(), 1);
}

#[tokio::test]
async fn test_default_limit_applies_to_list_only() {
    let connector = ScriptedConnector::new();
    let engine = start(EngineConfig::default().with_default_limit(100), &connector).await;

    let unbounded = engine.compile(&QueryRequest::list("sales"), None).unwrap();
    assert!(unbounded.sql.ends_with("LIMIT 100"));

    let explicit = engine
        .compile(&QueryRequest::list("sales").with_limit(5), None)
        .unwrap();
    assert!(explicit.sql.ends_with("LIMIT 5"));

    let aggregate = engine
        .compile(&QueryRequest::aggregate("sales", vec!["region"]), None)
        .unwrap();
    assert!(!aggregate.sql.contains("LIMIT"));
}

#[tokio::test]
async fn test_computed_field_fetches_dependencies_and_hides_them() {
    let schemas = sales_schemas();
    let mut computed = ComputedFieldRegistry::new();
    computed
        .register(
            &schemas,
            "sales",
            "unit_price",
            &["amount", "quantity"],
            unit_price,
        )
        .unwrap();

    let connector = ScriptedConnector::new();
    connector.push_rows(sales_rows(2));
    let engine = start_with(EngineConfig::default(), computed, &connector).await;

    let request = QueryRequest::list("sales").with_fields(vec!["id", "unit_price"]);
    let result = engine.run(&request, None).await.unwrap();

    let (sql, _) = &connector.calls()[0];
    assert!(sql.starts_with("SELECT id, amount, quantity FROM sales"));

    assert_eq!(result.columns, vec!["id".to_string(), "unit_price".to_string()]);
    let first = result.first().unwrap();
    assert_eq!(first["unit_price"], json!(50.0));
    assert!(!first.contains_key("amount"));
    assert!(!first.contains_key("quantity"));
    assert!(first.contains_key("id"));
}

#[tokio::test]
async fn test_computed_field_keeps_requested_dependencies() {
    let schemas = sales_schemas();
    let mut computed = ComputedFieldRegistry::new();
    computed
        .register(
            &schemas,
            "sales",
            "unit_price",
            &["amount", "quantity"],
            unit_price,
        )
        .unwrap();

    let connector = ScriptedConnector::new();
    let engine = start_with(EngineConfig::default(), computed, &connector).await;

    let compiled = engine
        .compile(
            &QueryRequest::list("sales").with_fields(vec!["amount", "unit_price"]),
            None,
        )
        .unwrap();
    assert!(compiled.sql.starts_with("SELECT amount, quantity FROM sales"));
}

#[tokio::test]
async fn test_compile_reports_params() {
    let connector = ScriptedConnector::new();
    let engine = start(EngineConfig::default(), &connector).await;

    let compiled = engine
        .compile(
            &QueryRequest::list("sales")
                .with_filter(engine::query::FilterNode::eq("region", "North")),
            None,
        )
        .unwrap();
    assert_eq!(compiled.params, vec![Value::String("North".to_string())]);
    assert_eq!(connector.call_count(), 0);
}

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let connector = ScriptedConnector::new();
    let engine = start(EngineConfig::default().with_workers(3), &connector).await;
    assert_eq!(connector.connects(), 3);

    engine.shutdown().await;
    assert!(engine.is_shut_down());
    assert_eq!(connector.closed(), 3);

    let err = engine
        .run(&QueryRequest::list("sales"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(err.context()["failure"], "POOL_CLOSED");
}

#[tokio::test(start_paused = true)]
async fn test_run_many_keeps_request_order() {
    let connector = ScriptedConnector::new().with_delay(Duration::from_millis(20));
    let engine = start(EngineConfig::default().with_workers(2), &connector).await;

    let requests = vec![
        QueryRequest::list("sales").with_limit(1),
        QueryRequest::list("sales").with_fields(vec!["foo"]),
        QueryRequest::single("sales"),
        QueryRequest::list("sales").with_limit(2),
    ];
    let results = engine.run_many(&requests).await;

    assert_eq!(results.len(), 4);
    assert_ok!(&results[0]);
    let err = assert_err!(&results[1]);
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_ok!(&results[2]);
    assert_ok!(&results[3]);

    assert_eq!(connector.call_count(), 3);
    assert!(connector.max_concurrency() <= 2);
    let sqls: Vec<String> = connector.calls().into_iter().map(|(sql, _)| sql).collect();
    assert!(sqls.iter().any(|sql| sql.ends_with("LIMIT 1")));
    assert!(sqls.iter().any(|sql| sql.ends_with("LIMIT 2")));
}
