//! Connection abstraction and engine failure classification.

use crate::error::ErrorKind;
use crate::query::Value;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// A materialized result row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Rows returned by one statement, with the column order reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryRows {
    /// Column names in result order.
    pub columns: Vec<String>,
    /// Result rows.
    pub rows: Vec<Row>,
}

/// Whether a failure may succeed if the statement is attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth retrying after a backoff.
    Retryable,
    /// Will fail the same way on every attempt.
    Fatal,
}

/// A failure reported by a connection or the pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineFailure {
    /// The connection dropped mid-request.
    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    /// The engine could not be reached.
    #[error("Engine unreachable: {0}")]
    Unreachable(String),

    /// A table lock could not be obtained in time.
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// No pool slot became free within the acquire timeout.
    #[error("Connection pool exhausted after waiting {waited_ms} ms")]
    PoolExhausted {
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// The pool has been shut down.
    #[error("Connection pool is closed")]
    PoolClosed,

    /// A network or socket operation failed transiently.
    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    /// The statement could not be parsed by the engine.
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// The engine rejected a value for a column type.
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// A constraint was violated.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// The statement referenced a table or column the engine does not know.
    #[error("Unknown identifier: {0}")]
    UnknownIdentifier(String),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl EngineFailure {
    /// Retryable or fatal.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::ConnectionReset(_)
            | Self::Unreachable(_)
            | Self::LockTimeout(_)
            | Self::PoolExhausted { .. }
            | Self::TransientIo(_) => FailureClass::Retryable,
            Self::PoolClosed
            | Self::Syntax(_)
            | Self::TypeMismatch(_)
            | Self::Constraint(_)
            | Self::UnknownIdentifier(_)
            | Self::Other(_) => FailureClass::Fatal,
        }
    }

    /// Returns true if the failure is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Retryable
    }

    /// The surfaced error category for this failure.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionReset(_)
            | Self::Unreachable(_)
            | Self::PoolExhausted { .. }
            | Self::PoolClosed => ErrorKind::Connection,
            Self::LockTimeout(_) | Self::TransientIo(_) => ErrorKind::TransientEngine,
            Self::Syntax(_)
            | Self::TypeMismatch(_)
            | Self::Constraint(_)
            | Self::UnknownIdentifier(_)
            | Self::Other(_) => ErrorKind::Query,
        }
    }

    /// Classifies a ClickHouse server exception such as
    /// `Code: 62. DB::Exception: Syntax error: ...`.
    #[must_use]
    pub fn from_server_message(message: &str) -> Self {
        let text = message.trim().to_string();
        if let Some(code) = server_code(&text) {
            match code {
                62 => return Self::Syntax(text),
                16 | 46 | 47 | 60 | 81 => return Self::UnknownIdentifier(text),
                6 | 43 | 53 | 70 | 386 => return Self::TypeMismatch(text),
                469 => return Self::Constraint(text),
                159 | 473 => return Self::LockTimeout(text),
                3 | 202 | 209 | 210 => return Self::TransientIo(text),
                _ => {}
            }
        }

        let lower = text.to_lowercase();
        if lower.contains("syntax error") {
            Self::Syntax(text)
        } else if lower.contains("unknown identifier")
            || lower.contains("unknown table")
            || lower.contains("missing columns")
        {
            Self::UnknownIdentifier(text)
        } else if lower.contains("lock") && lower.contains("timeout") {
            Self::LockTimeout(text)
        } else if lower.contains("connection reset") || lower.contains("broken pipe") {
            Self::ConnectionReset(text)
        } else if lower.contains("timed out") || lower.contains("timeout") {
            Self::TransientIo(text)
        } else {
            Self::Other(text)
        }
    }

    /// Stable code used in metric samples.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionReset(_) => "CONNECTION_RESET",
            Self::Unreachable(_) => "UNREACHABLE",
            Self::LockTimeout(_) => "LOCK_TIMEOUT",
            Self::PoolExhausted { .. } => "POOL_EXHAUSTED",
            Self::PoolClosed => "POOL_CLOSED",
            Self::TransientIo(_) => "TRANSIENT_IO",
            Self::Syntax(_) => "SYNTAX_ERROR",
            Self::TypeMismatch(_) => "TYPE_MISMATCH",
            Self::Constraint(_) => "CONSTRAINT_VIOLATION",
            Self::UnknownIdentifier(_) => "UNKNOWN_IDENTIFIER",
            Self::Other(_) => "ENGINE_ERROR",
        }
    }
}

fn server_code(message: &str) -> Option<u32> {
    let start = message.find("Code: ")? + "Code: ".len();
    let digits: String = message[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// A single engine connection.
///
/// A connection is used by at most one execution at a time; the pool
/// enforces this.
#[async_trait]
pub trait Connection: Send {
    /// Runs `sql`, binding `params` to its `?` placeholders in order.
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryRows, EngineFailure>;

    /// Releases engine-side resources. Called once at pool shutdown.
    async fn close(&mut self) {}
}

/// Opens engine connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new connection.
    async fn connect(&self) -> Result<Box<dyn Connection>, EngineFailure>;
}
