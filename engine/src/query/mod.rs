//! Query compilation.
//!
//! Requests are described by [`QueryRequest`] and compiled by
//! [`QueryBuilder`] into a [`CompiledQuery`]: SQL text with `?` placeholders
//! and an ordered parameter list. Filter trees are compiled by
//! [`compile_filter`] and may be parsed from graph-style JSON with
//! [`FilterNode::from_json`]. [`DepthGuard`] rejects over-deep selection
//! trees before any of this runs.
//!
//! # Example
//!
//! ```
//! use engine::query::{FilterNode, QueryBuilder, QueryRequest};
//! use engine::schema::{ColumnSchema, SchemaRegistry, TableSchema};
//! use serde_json::json;
//!
//! let registry = SchemaRegistry::new().with_table(TableSchema::new(
//!     "sales",
//!     vec![
//!         ColumnSchema::new("id", "UInt64").primary_key(),
//!         ColumnSchema::new("region", "String"),
//!     ],
//! ));
//!
//! let filter = FilterNode::from_json(&json!({"region": {"in": ["North", "South"]}})).unwrap();
//! let request = QueryRequest::list("sales").with_filter(filter).with_limit(5);
//! let compiled = QueryBuilder::new(&registry).build(&request).unwrap();
//!
//! assert_eq!(
//!     compiled.sql,
//!     "SELECT id, region FROM sales WHERE region IN ? ORDER BY id ASC LIMIT 5"
//! );
//! assert_eq!(compiled.params.len(), 1);
//! ```

mod ast;
mod builder;
mod depth;
mod filter;
mod ident;
mod input;

pub use ast::*;
pub use builder::{QueryBuilder, COUNT_ALIAS};
pub use depth::{DepthGuard, SelectionNode};
pub use filter::{compile as compile_filter, Predicate, MAX_FILTER_NESTING};
pub use ident::quote_identifier;
