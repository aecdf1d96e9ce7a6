//! Common test utilities and helpers for integration tests.
//!
//! Provides the sales schema used throughout and a scripted connector that
//! replays queued outcomes while recording every statement it receives.

#![allow(dead_code)]

use async_trait::async_trait;
use engine::execution::{Connection, Connector, EngineFailure, QueryRows, Row};
use engine::query::Value;
use engine::schema::{ColumnSchema, SchemaRegistry, TableSchema};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Registry with `sales` (primary key `id`) and `events` (no primary key).
pub fn sales_schemas() -> SchemaRegistry {
    SchemaRegistry::new()
        .with_table(TableSchema::new(
            "sales",
            vec![
                ColumnSchema::new("id", "UInt64").primary_key(),
                ColumnSchema::new("region", "LowCardinality(String)"),
                ColumnSchema::new("amount", "Float64"),
                ColumnSchema::new("quantity", "UInt32"),
                ColumnSchema::new("sold_at", "DateTime"),
            ],
        ))
        .with_table(TableSchema::new(
            "events",
            vec![
                ColumnSchema::new("amount", "FLOAT"),
                ColumnSchema::new("region", "VARCHAR"),
            ],
        ))
}

/// Rows shaped like `sales`, `count` of them.
pub fn sales_rows(count: usize) -> QueryRows {
    let rows = (0..count)
        .map(|i| {
            let row = json!({
                "id": i + 1,
                "region": if i % 2 == 0 { "North" } else { "South" },
                "amount": 100.0 * (i + 1) as f64,
                "quantity": 2,
            });
            serde_json::from_value::<Row>(row).unwrap()
        })
        .collect();
    QueryRows {
        columns: vec![
            "id".to_string(),
            "region".to_string(),
            "amount".to_string(),
            "quantity".to_string(),
        ],
        rows,
    }
}

#[derive(Default)]
struct Script {
    outcomes: Mutex<VecDeque<Result<QueryRows, EngineFailure>>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    delay_ms: AtomicU64,
    active: AtomicUsize,
    max_active: AtomicUsize,
    connects: AtomicUsize,
    closed: AtomicUsize,
}

/// Connector whose connections replay queued outcomes in order.
///
/// Once the queue is empty every statement returns no rows.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Script>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every statement takes `delay` before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        let millis = u64::try_from(delay.as_millis()).unwrap();
        self.script.delay_ms.store(millis, Ordering::SeqCst);
        self
    }

    pub fn push_rows(&self, rows: QueryRows) {
        self.script.outcomes.lock().unwrap().push_back(Ok(rows));
    }

    pub fn push_failure(&self, failure: EngineFailure) {
        self.script.outcomes.lock().unwrap().push_back(Err(failure));
    }

    /// Statements received so far, with their parameters.
    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.script.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.script.calls.lock().unwrap().len()
    }

    /// Highest number of statements observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.script.max_active.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.script.connects.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.script.closed.load(Ordering::SeqCst)
    }
}

struct ScriptedConnection {
    script: Arc<Script>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryRows, EngineFailure> {
        let script = &self.script;
        script
            .calls
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));

        let active = script.active.fetch_add(1, Ordering::SeqCst) + 1;
        script.max_active.fetch_max(active, Ordering::SeqCst);
        let delay = script.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        script.active.fetch_sub(1, Ordering::SeqCst);

        script
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(QueryRows::default()))
    }

    async fn close(&mut self) {
        self.script.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, EngineFailure> {
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            script: Arc::clone(&self.script),
        }))
    }
}

/// Connector that can never reach the database.
pub struct UnreachableConnector;

#[async_trait]
impl Connector for UnreachableConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, EngineFailure> {
        Err(EngineFailure::Unreachable(
            "Connection refused (os error 111)".to_string(),
        ))
    }
}
