//! Integration tests for metrics collection through the engine.
//!
//! Tests cover:
//! - Bounded history with cumulative counters
//! - Slow query detection
//! - Per-table and per-operation breakdowns
//! - History filtering and pool utilization

use engine::computed::ComputedFieldRegistry;
use engine::config::{EngineConfig, MetricsConfig};
use engine::execution::EngineFailure;
use engine::metrics::HistoryFilter;
use engine::query::{AggregateFunction, Aggregation, OperationKind, QueryRequest};
use engine::QueryEngine;
use std::time::Duration;

use super::common::{sales_rows, sales_schemas, ScriptedConnector};

async fn engine_with(connector: &ScriptedConnector, metrics: MetricsConfig) -> QueryEngine {
    let mut config = EngineConfig::default().with_workers(2);
    config.metrics = metrics;
    config.retry.max_attempts = 1;
    QueryEngine::start(
        config,
        sales_schemas(),
        ComputedFieldRegistry::new(),
        connector,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_history_is_bounded_but_counters_are_not() {
    let connector = ScriptedConnector::new();
    let metrics = MetricsConfig {
        capacity: 3,
        ..MetricsConfig::default()
    };
    let engine = engine_with(&connector, metrics).await;

    for _ in 0..5 {
        engine.run(&QueryRequest::list("sales"), None).await.unwrap();
    }

    let summary = engine.summary();
    assert_eq!(summary.total_queries, 5);
    assert_eq!(summary.retained_samples, 3);
    assert_eq!(summary.capacity, 3);
    assert_eq!(summary.tables["sales"].queries, 5);
    assert_eq!(engine.metrics().history(&HistoryFilter::all()).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_slow_queries_are_reported() {
    let connector = ScriptedConnector::new().with_delay(Duration::from_millis(50));
    let metrics = MetricsConfig {
        slow_query_ms: 20,
        slow_query_limit: 2,
        ..MetricsConfig::default()
    };
    let engine = engine_with(&connector, metrics).await;

    for _ in 0..3 {
        engine.run(&QueryRequest::list("sales"), None).await.unwrap();
    }

    let summary = engine.summary();
    assert_eq!(summary.slow_queries.len(), 2);
    assert!(summary
        .slow_queries
        .iter()
        .all(|s| s.duration >= Duration::from_millis(50)));
    let durations = summary.durations_ms.unwrap();
    assert!(durations.min >= 50.0);
}

#[tokio::test]
async fn test_breakdowns_and_error_rate() {
    let connector = ScriptedConnector::new();
    connector.push_rows(sales_rows(4));
    connector.push_failure(EngineFailure::Syntax("Syntax error".to_string()));
    connector.push_rows(sales_rows(2));
    connector.push_rows(sales_rows(0));
    let engine = engine_with(&connector, MetricsConfig::default()).await;

    engine.run(&QueryRequest::list("sales"), None).await.unwrap();
    assert!(engine.run(&QueryRequest::list("events"), None).await.is_err());
    engine
        .run(
            &QueryRequest::aggregate("sales", vec!["region"])
                .with_aggregation(Aggregation::new("amount", vec![AggregateFunction::Sum])),
            None,
        )
        .await
        .unwrap();
    engine.run(&QueryRequest::single("sales"), None).await.unwrap();

    let summary = engine.summary();
    assert_eq!(summary.total_queries, 4);
    assert_eq!(summary.total_errors, 1);
    assert!((summary.error_rate - 0.25).abs() < f64::EPSILON);
    assert_eq!(summary.operations[&OperationKind::List], 2);
    assert_eq!(summary.operations[&OperationKind::Aggregate], 1);
    assert_eq!(summary.operations[&OperationKind::Single], 1);
    assert_eq!(summary.tables["events"].errors, 1);
    assert_eq!(summary.recent_errors.len(), 1);
    assert_eq!(
        summary.recent_errors[0].error_code.as_deref(),
        Some("SYNTAX_ERROR")
    );

    let rows = summary.row_counts.unwrap();
    assert_eq!(rows.total, 6);
    assert_eq!(rows.max, 4);
    assert_eq!(rows.min, 0);

    let failures = engine
        .metrics()
        .history(&HistoryFilter::all().success(false));
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].table, "events");

    let aggregates = engine
        .metrics()
        .history(&HistoryFilter::all().operation(OperationKind::Aggregate));
    assert_eq!(aggregates.len(), 1);
    assert_eq!(aggregates[0].rows, 2);
}

#[tokio::test]
async fn test_validation_failures_are_not_sampled() {
    let connector = ScriptedConnector::new();
    let engine = engine_with(&connector, MetricsConfig::default()).await;

    let err = engine
        .run(&QueryRequest::list("sales").with_fields(vec!["foo"]), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(engine.summary().total_queries, 0);
    assert_eq!(connector.call_count(), 0);
}

#[tokio::test]
async fn test_pool_utilization_is_live() {
    let connector = ScriptedConnector::new();
    let engine = engine_with(&connector, MetricsConfig::default()).await;
    engine.run(&QueryRequest::list("sales"), None).await.unwrap();

    let pool = engine.summary().pool.live.unwrap();
    assert_eq!(pool.size, 2);
    assert_eq!(pool.in_use, 0);
    assert_eq!(pool.acquisitions, 1);

    engine.metrics().reset();
    assert_eq!(engine.summary().total_queries, 0);
}
