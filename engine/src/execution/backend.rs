//! `ClickHouse` connections over the HTTP interface.

use super::connection::{Connection, Connector, EngineFailure, QueryRows, Row};
use crate::config::DatabaseConfig;
use crate::query::Value;
use async_trait::async_trait;
use clickhouse::Client;
use serde::ser::{SerializeTuple, Serializer};
use serde::Serialize;

/// Result format that keeps column order and carries a header row of names.
const RESULT_FORMAT: &str = "JSONCompactEachRowWithNames";

/// Opens [`ClickHouseConnection`]s from a [`DatabaseConfig`].
#[derive(Clone)]
pub struct ClickHouseConnector {
    client: Client,
}

impl ClickHouseConnector {
    /// Creates a connector from configuration.
    #[must_use]
    pub fn new(config: &DatabaseConfig) -> Self {
        let client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database)
            .with_user(&config.user)
            .with_password(&config.password)
            .with_option("output_format_json_quote_64bit_integers", "0");
        Self { client }
    }
}

impl std::fmt::Debug for ClickHouseConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseConnector").finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for ClickHouseConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, EngineFailure> {
        self.client
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .map_err(classify)?;
        Ok(Box::new(ClickHouseConnection {
            client: self.client.clone(),
        }))
    }
}

/// One pooled `ClickHouse` connection.
pub struct ClickHouseConnection {
    client: Client,
}

#[async_trait]
impl Connection for ClickHouseConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryRows, EngineFailure> {
        let mut query = self.client.query(sql);
        for param in params {
            query = query.bind(SqlParam(param));
        }

        let mut cursor = query.fetch_bytes(RESULT_FORMAT).map_err(classify)?;
        let body = cursor.collect().await.map_err(classify)?;
        parse_compact_rows(&body)
    }
}

/// Binds a [`Value`]; lists become tuples so they fit `IN ?`.
struct SqlParam<'a>(&'a Value);

impl Serialize for SqlParam<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Null => serializer.serialize_none(),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut tuple = serializer.serialize_tuple(items.len())?;
                for item in items {
                    tuple.serialize_element(&SqlParam(item))?;
                }
                tuple.end()
            }
        }
    }
}

fn classify(error: clickhouse::error::Error) -> EngineFailure {
    match error {
        clickhouse::error::Error::Network(source) => {
            let message = source.to_string();
            let lower = message.to_lowercase();
            if lower.contains("reset") || lower.contains("broken pipe") {
                EngineFailure::ConnectionReset(message)
            } else if lower.contains("timed out") || lower.contains("timeout") {
                EngineFailure::TransientIo(message)
            } else {
                EngineFailure::Unreachable(message)
            }
        }
        clickhouse::error::Error::BadResponse(message) => {
            EngineFailure::from_server_message(&message)
        }
        other => EngineFailure::from_server_message(&other.to_string()),
    }
}

/// Parses `JSONCompactEachRowWithNames` output: a header array of column
/// names followed by one array per row.
fn parse_compact_rows(body: &[u8]) -> Result<QueryRows, EngineFailure> {
    let text = std::str::from_utf8(body)
        .map_err(|e| EngineFailure::Other(format!("Result is not valid UTF-8: {e}")))?;
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());

    let Some(header) = lines.next() else {
        return Ok(QueryRows::default());
    };
    let columns: Vec<String> = serde_json::from_str(header)
        .map_err(|e| EngineFailure::Other(format!("Malformed result header: {e}")))?;

    let rows = lines
        .map(|line| {
            let values: Vec<serde_json::Value> = serde_json::from_str(line)
                .map_err(|e| EngineFailure::Other(format!("Malformed result row: {e}")))?;
            if values.len() != columns.len() {
                return Err(EngineFailure::Other(format!(
                    "Result row has {} values for {} columns",
                    values.len(),
                    columns.len()
                )));
            }
            Ok(columns.iter().cloned().zip(values).collect::<Row>())
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(QueryRows { columns, rows })
}
