//! ClickQL Engine
//!
//! Compiles structured, graph-style query requests into parameterized
//! `ClickHouse` SQL and executes them through a bounded connection pool
//! with retries, collecting per-query metrics along the way.
//!
//! # Modules
//!
//! - [`schema`] - Table and column metadata, the source of truth for validation
//! - [`query`] - Request model, filter compilation, SQL building and depth limits
//! - [`execution`] - Connection pool, retry policy and the query executor
//! - [`metrics`] - Bounded sample history and summaries
//! - [`computed`] - Fields derived from fetched rows
//! - [`config`] - Environment-driven configuration
//! - [`context`] - The [`QueryEngine`] tying everything together
//!
//! # Example
//!
//! ```
//! use engine::query::{FilterNode, FilterOp, QueryBuilder, QueryRequest};
//! use engine::schema::{ColumnSchema, SchemaRegistry, TableSchema};
//!
//! let schemas = SchemaRegistry::new().with_table(TableSchema::new(
//!     "sales",
//!     vec![
//!         ColumnSchema::new("id", "UInt64").primary_key(),
//!         ColumnSchema::new("region", "String"),
//!         ColumnSchema::new("amount", "Float64"),
//!     ],
//! ));
//!
//! let request = QueryRequest::list("sales")
//!     .with_filter(FilterNode::compare("amount", FilterOp::Gte, 100.0))
//!     .with_limit(10);
//!
//! let compiled = QueryBuilder::new(&schemas).build(&request).unwrap();
//! assert_eq!(
//!     compiled.sql,
//!     "SELECT id, region, amount FROM sales WHERE amount >= ? ORDER BY id ASC LIMIT 10"
//! );
//! assert_eq!(compiled.params.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod computed;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod metrics;
pub mod query;
pub mod schema;

pub use context::{QueryEngine, RequestCompiler};
pub use error::{CorrelationId, Error, ErrorKind, ValidationError};

/// Re-export common dependencies for convenience.
pub use chrono;
pub use serde;
pub use serde_json;
pub use validator;
