//! Per-execution metric records.

use crate::error::CorrelationId;
use crate::query::OperationKind;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::time::Duration;

/// Outcome of one execution, including all of its attempts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    /// Correlation identifier of the request.
    pub correlation_id: CorrelationId,
    /// Target table.
    pub table: String,
    /// Operation kind.
    pub operation: OperationKind,
    /// Wall time from first acquisition attempt to completion.
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    /// Whether the execution returned rows.
    pub success: bool,
    /// Rows returned, zero on failure.
    pub rows: usize,
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Total time spent waiting for a pool slot across attempts.
    #[serde(rename = "pool_wait_ms", serialize_with = "as_millis")]
    pub pool_wait: Duration,
    /// Failure code, for unsuccessful executions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Completion time.
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    /// A successful execution.
    pub fn success(
        correlation_id: CorrelationId,
        table: impl Into<String>,
        operation: OperationKind,
        duration: Duration,
        rows: usize,
    ) -> Self {
        Self {
            correlation_id,
            table: table.into(),
            operation,
            duration,
            success: true,
            rows,
            attempts: 1,
            pool_wait: Duration::ZERO,
            error_code: None,
            timestamp: Utc::now(),
        }
    }

    /// A failed execution.
    pub fn failure(
        correlation_id: CorrelationId,
        table: impl Into<String>,
        operation: OperationKind,
        duration: Duration,
        error_code: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            table: table.into(),
            operation,
            duration,
            success: false,
            rows: 0,
            attempts: 1,
            pool_wait: Duration::ZERO,
            error_code: Some(error_code.into()),
            timestamp: Utc::now(),
        }
    }

    /// Sets the attempt count.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Sets the accumulated pool wait.
    #[must_use]
    pub fn with_pool_wait(mut self, pool_wait: Duration) -> Self {
        self.pool_wait = pool_wait;
        self
    }

    /// Retries performed beyond the first attempt.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

pub(crate) fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration_ms(*duration))
}
