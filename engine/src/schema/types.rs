//! Logical column types derived from declared engine types.

use crate::query::Value;
use serde::{Deserialize, Serialize};

/// Normalized logical type of a column.
///
/// Built from the engine's declared type string, so `Nullable(Float64)`,
/// `LowCardinality(String)` and `Decimal(10, 2)` all resolve to their
/// underlying logical type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Signed or unsigned integers of any width.
    Integer,
    /// Floating point numbers.
    Float,
    /// Fixed-point decimals.
    Decimal,
    /// Booleans.
    Boolean,
    /// Strings, fixed strings and enums.
    String,
    /// Calendar dates.
    Date,
    /// Timestamps.
    DateTime,
    /// UUIDs.
    Uuid,
    /// JSON documents.
    Json,
    /// Arrays of an inner type.
    Array(Box<ColumnType>),
    /// Any type without a dedicated mapping, with its raw name.
    Other(String),
}

impl ColumnType {
    /// Parses a declared engine type.
    ///
    /// Matching is case-insensitive and accepts both ClickHouse and common
    /// ANSI spellings.
    ///
    /// # Examples
    ///
    /// ```
    /// use engine::schema::ColumnType;
    ///
    /// assert_eq!(ColumnType::parse("Nullable(Float64)"), ColumnType::Float);
    /// assert_eq!(ColumnType::parse("LowCardinality(String)"), ColumnType::String);
    /// assert_eq!(ColumnType::parse("Decimal(10, 2)"), ColumnType::Decimal);
    /// assert_eq!(
    ///     ColumnType::parse("Array(UInt32)"),
    ///     ColumnType::Array(Box::new(ColumnType::Integer))
    /// );
    /// ```
    #[must_use]
    pub fn parse(declared: &str) -> Self {
        let trimmed = declared.trim();

        if let Some(inner) = unwrap_wrapper(trimmed, "Nullable")
            .or_else(|| unwrap_wrapper(trimmed, "LowCardinality"))
        {
            return Self::parse(inner);
        }
        if let Some(inner) = unwrap_wrapper(trimmed, "Array") {
            return Self::Array(Box::new(Self::parse(inner)));
        }

        let base = trimmed
            .split_once('(')
            .map_or(trimmed, |(head, _)| head)
            .trim()
            .to_ascii_uppercase();

        match base.as_str() {
            "INT8" | "INT16" | "INT32" | "INT64" | "INT128" | "INT256" | "UINT8" | "UINT16"
            | "UINT32" | "UINT64" | "UINT128" | "UINT256" | "TINYINT" | "SMALLINT" | "INT"
            | "INTEGER" | "BIGINT" | "HUGEINT" | "UTINYINT" | "USMALLINT" | "UINTEGER"
            | "UBIGINT" => Self::Integer,
            "FLOAT32" | "FLOAT64" | "FLOAT" | "DOUBLE" | "REAL" => Self::Float,
            "DECIMAL" | "DECIMAL32" | "DECIMAL64" | "DECIMAL128" | "DECIMAL256" | "NUMERIC" => {
                Self::Decimal
            }
            "BOOL" | "BOOLEAN" => Self::Boolean,
            "STRING" | "FIXEDSTRING" | "VARCHAR" | "CHAR" | "TEXT" | "ENUM" | "ENUM8"
            | "ENUM16" => Self::String,
            "DATE" | "DATE32" => Self::Date,
            "DATETIME" | "DATETIME64" | "TIMESTAMP" | "TIMESTAMPTZ" => Self::DateTime,
            "UUID" => Self::Uuid,
            "JSON" | "OBJECT" => Self::Json,
            _ => Self::Other(trimmed.to_string()),
        }
    }

    /// Returns true for types that support sum/avg.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float | Self::Decimal)
    }

    /// Human readable description used in type mismatch errors.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Integer => "integer".to_string(),
            Self::Float => "float".to_string(),
            Self::Decimal => "decimal".to_string(),
            Self::Boolean => "boolean".to_string(),
            Self::String => "string".to_string(),
            Self::Date => "date (YYYY-MM-DD)".to_string(),
            Self::DateTime => "datetime (RFC 3339 or YYYY-MM-DD HH:MM:SS)".to_string(),
            Self::Uuid => "uuid".to_string(),
            Self::Json => "json".to_string(),
            Self::Array(inner) => format!("array of {}", inner.describe()),
            Self::Other(raw) => raw.clone(),
        }
    }

    /// Returns true if `value` can be compared against a column of this type.
    ///
    /// `Null` is never accepted; nullness is tested with `is_null`.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => false,
            (Self::Integer, Value::Integer(_))
            | (Self::Float | Self::Decimal, Value::Integer(_) | Value::Float(_))
            | (Self::Boolean, Value::Boolean(_) | Value::Integer(0 | 1))
            | (Self::String | Self::Json, Value::String(_))
            | (Self::Other(_), _) => true,
            (Self::Date, Value::String(s)) => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
            (Self::DateTime, Value::String(s)) => is_datetime(s),
            (Self::Uuid, Value::String(s)) => uuid::Uuid::parse_str(s).is_ok(),
            (Self::Array(inner), Value::List(items)) => items.iter().all(|item| inner.accepts(item)),
            _ => false,
        }
    }
}

fn unwrap_wrapper<'a>(declared: &'a str, wrapper: &str) -> Option<&'a str> {
    let rest = declared.strip_prefix(wrapper)?;
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    Some(inner.trim())
}

fn is_datetime(s: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(s).is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}
