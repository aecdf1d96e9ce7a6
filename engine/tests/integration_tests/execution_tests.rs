//! Integration tests for pooled execution and retries.
//!
//! Tests cover:
//! - Retry of retryable failures with exponential backoff
//! - Fatal failures surfaced after one attempt
//! - Exhausted retries carrying attempts and the correlation id
//! - Bounded concurrency under load
//! - Cancellation returning connections and recording a sample
//! - Backoff sleeps that hold no connection
//! - Batches executed concurrently in input order

use engine::execution::{ConnectionPool, EngineFailure, QueryExecutor, RetryPolicy};
use engine::metrics::{HistoryFilter, MetricsAggregator};
use engine::query::{CompiledQuery, QueryBuilder, QueryRequest};
use engine::{CorrelationId, ErrorKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::common::{sales_rows, sales_schemas, ScriptedConnector};

fn compiled() -> CompiledQuery {
    let schemas = sales_schemas();
    QueryBuilder::new(&schemas)
        .build(&QueryRequest::list("sales").with_limit(10))
        .unwrap()
}

async fn executor(
    connector: &ScriptedConnector,
    workers: usize,
    policy: RetryPolicy,
) -> (QueryExecutor, Arc<MetricsAggregator>) {
    let pool = ConnectionPool::open(connector, workers, None).await.unwrap();
    let metrics = Arc::new(MetricsAggregator::default());
    metrics.attach_pool(pool.clone());
    (QueryExecutor::new(pool, policy, Arc::clone(&metrics)), metrics)
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failures_back_off_then_succeed() {
    let connector = ScriptedConnector::new();
    connector.push_failure(EngineFailure::ConnectionReset("reset by peer".to_string()));
    connector.push_failure(EngineFailure::LockTimeout("table is locked".to_string()));
    connector.push_rows(sales_rows(3));

    let policy = RetryPolicy::new(3, Duration::from_millis(100), 2.0);
    let (executor, metrics) = executor(&connector, 2, policy).await;

    let started = Instant::now();
    let result = executor
        .execute(&compiled(), CorrelationId::new())
        .await
        .unwrap();

    // 100ms after the first failure, 200ms after the second
    assert_eq!(started.elapsed(), Duration::from_millis(300));
    assert_eq!(result.attempts, 3);
    assert_eq!(result.row_count, 3);
    assert_eq!(connector.call_count(), 3);

    let summary = metrics.summarize();
    assert_eq!(summary.total_queries, 1);
    assert_eq!(summary.total_errors, 0);
    assert_eq!(summary.total_retries, 2);
}

#[tokio::test]
async fn test_fatal_failure_is_not_retried() {
    let connector = ScriptedConnector::new();
    connector.push_failure(EngineFailure::from_server_message(
        "Code: 62. DB::Exception: Syntax error: failed at position 1",
    ));

    let (executor, metrics) = executor(&connector, 1, RetryPolicy::default()).await;
    let correlation_id = CorrelationId::new();
    let err = executor
        .execute(&compiled(), correlation_id)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Query);
    assert_eq!(err.attempts(), Some(1));
    assert_eq!(err.correlation_id(), correlation_id);
    assert_eq!(err.context()["failure"], "SYNTAX_ERROR");
    assert_eq!(connector.call_count(), 1);

    let history = metrics.history(&HistoryFilter::all());
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
    assert_eq!(history[0].error_code.as_deref(), Some("SYNTAX_ERROR"));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_surface_attempts() {
    let connector = ScriptedConnector::new();
    for _ in 0..3 {
        connector.push_failure(EngineFailure::Unreachable("connection refused".to_string()));
    }

    let policy = RetryPolicy::new(3, Duration::from_millis(10), 2.0);
    let (executor, _metrics) = executor(&connector, 1, policy).await;
    let correlation_id = CorrelationId::new();
    let err = executor
        .execute(&compiled(), correlation_id)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(err.code(), "CONNECTION_ERROR");
    assert_eq!(err.attempts(), Some(3));
    assert_eq!(err.correlation_id(), correlation_id);
    assert_eq!(err.context()["attempts"], "3");
    assert_eq!(err.context()["table"], "sales");
    assert!(err.context()["sql"].starts_with("SELECT id, region"));
    assert!(!err.suggestions().is_empty());
    assert!(err.to_string().contains(&correlation_id.to_string()));
    assert_eq!(connector.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_bounded_by_pool_size() {
    let connector = ScriptedConnector::new().with_delay(Duration::from_millis(50));
    let (executor, metrics) = executor(&connector, 2, RetryPolicy::default()).await;
    let executor = Arc::new(executor);
    let query = Arc::new(compiled());

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let executor = Arc::clone(&executor);
            let query = Arc::clone(&query);
            tokio::spawn(async move { executor.execute(&query, CorrelationId::new()).await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(connector.call_count(), 5);
    assert!(connector.max_concurrency() <= 2);
    assert_eq!(connector.connects(), 2);

    let stats = executor.pool().stats();
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.acquisitions, 5);
    assert_eq!(metrics.summarize().total_queries, 5);
}

#[tokio::test(start_paused = true)]
async fn test_pool_exhaustion_is_retried_then_surfaced() {
    let connector = ScriptedConnector::new();
    let pool = ConnectionPool::open(&connector, 1, Some(Duration::from_millis(20)))
        .await
        .unwrap();
    let metrics = Arc::new(MetricsAggregator::default());
    let policy = RetryPolicy::new(2, Duration::from_millis(5), 2.0);
    let executor = QueryExecutor::new(pool.clone(), policy, Arc::clone(&metrics));

    let _held = pool.acquire().await.unwrap();
    let err = executor
        .execute(&compiled(), CorrelationId::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(err.context()["failure"], "POOL_EXHAUSTED");
    assert_eq!(err.attempts(), Some(2));
    assert_eq!(connector.call_count(), 0);
    assert_eq!(pool.stats().timeouts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_execution_releases_connection() {
    let connector = ScriptedConnector::new().with_delay(Duration::from_millis(100));
    let (executor, metrics) = executor(&connector, 1, RetryPolicy::default()).await;

    let outcome = tokio::time::timeout(
        Duration::from_millis(10),
        executor.execute(&compiled(), CorrelationId::new()),
    )
    .await;
    assert!(outcome.is_err());

    let history = metrics.history(&HistoryFilter::all());
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].error_code.as_deref(), Some("CANCELLED"));

    // The in-flight attempt finishes in the background and hands its
    // connection back.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(executor.pool().stats().in_use, 0);

    let result = executor.execute(&compiled(), CorrelationId::new()).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_closed_pool_fails_without_retry() {
    let connector = ScriptedConnector::new();
    let (executor, _metrics) = executor(&connector, 2, RetryPolicy::default()).await;
    executor.pool().close().await;

    let err = executor
        .execute(&compiled(), CorrelationId::new())
        .await
        .unwrap_err();
    assert_eq!(err.context()["failure"], "POOL_CLOSED");
    assert_eq!(err.attempts(), Some(1));
    assert_eq!(connector.closed(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_holds_no_connection() {
    let connector = ScriptedConnector::new();
    connector.push_failure(EngineFailure::ConnectionReset("reset by peer".to_string()));
    connector.push_rows(sales_rows(1));

    let policy = RetryPolicy::new(2, Duration::from_millis(100), 2.0);
    let (executor, _metrics) = executor(&connector, 1, policy).await;
    let executor = Arc::new(executor);

    let handle = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.execute(&compiled(), CorrelationId::new()).await })
    };

    // Halfway through the first backoff
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.call_count(), 1);
    assert_eq!(executor.pool().stats().in_use, 0);

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_stops_retries() {
    let connector = ScriptedConnector::new();
    connector.push_failure(EngineFailure::LockTimeout("table is locked".to_string()));

    let policy = RetryPolicy::new(3, Duration::from_millis(100), 2.0);
    let (executor, metrics) = executor(&connector, 1, policy).await;

    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        executor.execute(&compiled(), CorrelationId::new()),
    )
    .await;
    assert!(outcome.is_err());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(connector.call_count(), 1);
    assert_eq!(executor.pool().stats().in_use, 0);

    let history = metrics.history(&HistoryFilter::all());
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
    assert_eq!(history[0].error_code.as_deref(), Some("CANCELLED"));
}

#[tokio::test(start_paused = true)]
async fn test_execute_many_preserves_order_and_bounds_concurrency() {
    let connector = ScriptedConnector::new().with_delay(Duration::from_millis(50));
    let (executor, metrics) = executor(&connector, 2, RetryPolicy::default()).await;

    let ids: Vec<CorrelationId> = (0..5).map(|_| CorrelationId::new()).collect();
    let batch = ids.iter().map(|id| (compiled(), *id)).collect();

    let started = Instant::now();
    let results = executor.execute_many(batch).await;

    assert_eq!(results.len(), 5);
    for (result, id) in results.iter().zip(&ids) {
        let result = result.as_ref().unwrap();
        assert_eq!(result.correlation_id, *id);
    }
    // Five 50ms statements on two connections
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(connector.max_concurrency() <= 2);
    assert_eq!(connector.call_count(), 5);
    assert_eq!(executor.pool().stats().in_use, 0);
    assert_eq!(metrics.summarize().total_queries, 5);
}
