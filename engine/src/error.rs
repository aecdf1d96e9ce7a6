//! Error taxonomy for the engine.
//!
//! Compile-time problems are reported as [`ValidationError`]s. Anything that
//! leaves the engine is wrapped in an [`Error`], which carries a stable error
//! code, contextual fields, suggestions and the correlation identifier of the
//! originating request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Maximum length of SQL text carried in error context.
const MAX_SQL_CONTEXT_LEN: usize = 200;

/// Maximum edit distance for "did you mean" suggestions.
const MAX_SUGGESTION_DISTANCE: usize = 3;

/// Maximum number of suggestions attached to an unknown-name error.
const MAX_SUGGESTIONS: usize = 3;

/// Result type for operations that surface an engine [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Opaque token shared by a request, all its retry attempts and every log line
/// or error record derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Creates a new random correlation identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of a surfaced error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Unknown column/table, depth exceeded, malformed filter, type mismatch.
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    /// The engine rejected the compiled statement.
    #[serde(rename = "QUERY_ERROR")]
    Query,
    /// The engine is unreachable or the pool is exhausted.
    #[serde(rename = "CONNECTION_ERROR")]
    Connection,
    /// Lock timeout or transient I/O failure.
    #[serde(rename = "TRANSIENT_ENGINE_ERROR")]
    TransientEngine,
}

impl ErrorKind {
    /// Returns the stable error code for this kind.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Query => "QUERY_ERROR",
            Self::Connection => "CONNECTION_ERROR",
            Self::TransientEngine => "TRANSIENT_ENGINE_ERROR",
        }
    }

    /// Returns true if failures of this kind may succeed on retry.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Connection | Self::TransientEngine)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors detected while validating or compiling a request.
///
/// These never reach the executor and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The requested table is not part of the schema registry.
    #[error("Unknown table: '{table}'")]
    UnknownTable {
        /// The requested table name.
        table: String,
        /// Closest known table names.
        suggestions: Vec<String>,
    },

    /// A referenced column does not exist in the target table.
    #[error("Unknown column '{column}' in table '{table}'")]
    UnknownColumn {
        /// The table that was searched.
        table: String,
        /// The requested column name.
        column: String,
        /// Closest known column names.
        suggestions: Vec<String>,
    },

    /// A filter used an operator that does not exist.
    #[error("Unknown filter operator '{operator}' on field '{field}'")]
    UnknownOperator {
        /// The field the operator was applied to.
        field: String,
        /// The unrecognized operator.
        operator: String,
    },

    /// A filter value does not fit the column's declared type.
    #[error("Type mismatch on field '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        /// The field being compared.
        field: String,
        /// Description of the accepted type.
        expected: String,
        /// The offending value.
        actual: String,
    },

    /// The selection tree is nested deeper than allowed.
    #[error("Query depth ({actual}) exceeds maximum allowed depth ({allowed})")]
    DepthExceeded {
        /// Depth of the submitted selection.
        actual: usize,
        /// Configured maximum.
        allowed: usize,
    },

    /// The filter tree is structurally invalid.
    #[error("Malformed filter: {0}")]
    MalformedFilter(String),

    /// The request combines options that cannot be compiled.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ValidationError {
    /// Builds an [`ValidationError::UnknownColumn`] with suggestions drawn from `known`.
    pub fn unknown_column<'a>(
        table: impl Into<String>,
        column: impl Into<String>,
        known: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let column = column.into();
        let suggestions = closest_matches(&column, known);
        Self::UnknownColumn {
            table: table.into(),
            column,
            suggestions,
        }
    }

    /// Builds an [`ValidationError::UnknownTable`] with suggestions drawn from `known`.
    pub fn unknown_table<'a>(
        table: impl Into<String>,
        known: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let table = table.into();
        let suggestions = closest_matches(&table, known);
        Self::UnknownTable { table, suggestions }
    }

    /// Actionable suggestions for fixing the request.
    #[must_use]
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Self::UnknownTable { suggestions, .. } | Self::UnknownColumn { suggestions, .. } => {
                if suggestions.is_empty() {
                    vec!["Check the spelling against the table schema".to_string()]
                } else {
                    suggestions
                        .iter()
                        .map(|s| format!("Did you mean '{s}'?"))
                        .collect()
                }
            }
            Self::UnknownOperator { .. } => vec![format!(
                "Supported operators: {}",
                crate::query::FilterOp::ALL
                    .iter()
                    .map(|op| op.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )],
            Self::TypeMismatch { .. } => vec![
                "Compare numbers with numbers and strings with strings".to_string(),
                "Use is_null to test for missing values".to_string(),
            ],
            Self::DepthExceeded { allowed, .. } => vec![format!(
                "Reduce nesting to at most {allowed} levels or split the request"
            )],
            Self::MalformedFilter(_) => {
                vec!["Logical groups need children; NOT takes exactly one child".to_string()]
            }
            Self::InvalidRequest(_) => Vec::new(),
        }
    }

    /// Structured context fields describing the failure.
    #[must_use]
    pub fn context(&self) -> BTreeMap<String, String> {
        let mut context = BTreeMap::new();
        match self {
            Self::UnknownTable { table, .. } => {
                context.insert("table".to_string(), table.clone());
            }
            Self::UnknownColumn { table, column, .. } => {
                context.insert("table".to_string(), table.clone());
                context.insert("column".to_string(), column.clone());
            }
            Self::UnknownOperator { field, operator } => {
                context.insert("field".to_string(), field.clone());
                context.insert("operator".to_string(), operator.clone());
            }
            Self::TypeMismatch {
                field,
                expected,
                actual,
            } => {
                context.insert("field".to_string(), field.clone());
                context.insert("expected_type".to_string(), expected.clone());
                context.insert("actual_value".to_string(), actual.clone());
            }
            Self::DepthExceeded { actual, allowed } => {
                context.insert("depth".to_string(), actual.to_string());
                context.insert("max_depth".to_string(), allowed.to_string());
            }
            Self::MalformedFilter(_) | Self::InvalidRequest(_) => {}
        }
        context
    }
}

/// An error surfaced to callers of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("[{}] {message} (correlation_id={correlation_id})", .kind.code())]
pub struct Error {
    #[serde(rename = "error")]
    kind: ErrorKind,
    message: String,
    context: BTreeMap<String, String>,
    suggestions: Vec<String>,
    correlation_id: CorrelationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempts: Option<u32>,
}

impl Error {
    /// Creates a new error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self {
            kind,
            message: message.into(),
            context: BTreeMap::new(),
            suggestions: Vec::new(),
            correlation_id,
            attempts: None,
        }
    }

    /// Wraps a compile-time validation failure.
    #[must_use]
    pub fn validation(error: &ValidationError, correlation_id: CorrelationId) -> Self {
        Self {
            kind: ErrorKind::Validation,
            message: error.to_string(),
            context: error.context(),
            suggestions: error.suggestions(),
            correlation_id,
            attempts: None,
        }
    }

    /// Adds a context field.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Adds the SQL text to the context, truncated for readability.
    #[must_use]
    pub fn with_sql(self, sql: &str) -> Self {
        let sql = if sql.chars().count() > MAX_SQL_CONTEXT_LEN {
            let truncated: String = sql.chars().take(MAX_SQL_CONTEXT_LEN).collect();
            format!("{truncated}...")
        } else {
            sql.to_string()
        };
        self.with_context("sql", sql)
    }

    /// Adds a suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Records how many attempts were made before the error surfaced.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self.context
            .insert("attempts".to_string(), attempts.to_string());
        self
    }

    /// The error category.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// The human readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Contextual fields (table, column, SQL, ...).
    #[must_use]
    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// Suggestions for fixing the problem.
    #[must_use]
    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    /// The correlation identifier of the originating request.
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Number of attempts made, for execution errors.
    #[must_use]
    pub fn attempts(&self) -> Option<u32> {
        self.attempts
    }
}

/// Returns the known names closest to `target`, best match first.
///
/// Names within [`MAX_SUGGESTION_DISTANCE`] edits are preferred. When none
/// is that close, the nearest names are returned anyway so the caller still
/// sees what exists.
pub fn closest_matches<'a>(target: &str, known: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let target_lower = target.to_lowercase();
    let mut scored: Vec<(usize, &str)> = known
        .into_iter()
        .map(|name| (levenshtein(&target_lower, &name.to_lowercase()), name))
        .collect();
    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

    let near = scored
        .iter()
        .take_while(|(distance, _)| *distance <= MAX_SUGGESTION_DISTANCE)
        .count();
    let keep = if near == 0 { MAX_SUGGESTIONS } else { near.min(MAX_SUGGESTIONS) };
    scored
        .into_iter()
        .take(keep)
        .map(|(_, name)| name.to_string())
        .collect()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}
