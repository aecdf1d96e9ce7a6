//! Typed description of the tables the engine may query.
//!
//! Schemas are supplied from outside (introspection or a schema file) and are
//! immutable once registered.

mod table;
mod types;

pub use table::{ColumnSchema, SchemaRegistry, TableSchema};
pub use types::ColumnType;
