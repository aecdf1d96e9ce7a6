//! Execution results.

use super::connection::Row;
use crate::error::CorrelationId;
use serde::{Serialize, Serializer};
use std::time::Duration;

/// Rows returned by a successful execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// Result rows in engine order.
    pub rows: Vec<Row>,
    /// Column names in result order.
    pub columns: Vec<String>,
    /// Number of rows.
    pub row_count: usize,
    /// Wall time including retries and backoff.
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Correlation identifier of the request.
    pub correlation_id: CorrelationId,
}

impl QueryResult {
    /// The first row, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Returns true if no rows were returned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
}
