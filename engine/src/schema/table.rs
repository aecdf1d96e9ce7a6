//! Table descriptors and the schema registry.

use super::ColumnType;
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name as known to the engine.
    pub name: String,
    /// Declared engine type, e.g. `Float64` or `Nullable(String)`.
    #[serde(rename = "type")]
    pub data_type: String,
    /// Whether the column may hold nulls.
    #[serde(default)]
    pub nullable: bool,
    /// Whether the column is part of the primary key.
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnSchema {
    /// Creates a non-nullable, non-key column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let data_type = data_type.into();
        let nullable = data_type.trim_start().starts_with("Nullable(");
        Self {
            name: name.into(),
            data_type,
            nullable,
            primary_key: false,
        }
    }

    /// Marks the column as part of the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Marks the column as nullable.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// The normalized logical type.
    #[must_use]
    pub fn column_type(&self) -> ColumnType {
        ColumnType::parse(&self.data_type)
    }
}

/// Read-only description of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    /// Creates a table descriptor.
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSchema>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Looks up a column by exact name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Looks up a column, failing with suggestions when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownColumn`] if the table has no such column.
    pub fn resolve(&self, name: &str) -> Result<&ColumnSchema, ValidationError> {
        self.column(name).ok_or_else(|| {
            ValidationError::unknown_column(&self.name, name, self.column_names())
        })
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Rejects table and column names containing `?`, which the database
    /// client reads as a parameter placeholder even inside backticks.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidRequest`] naming the first such identifier.
    pub fn check_identifiers(&self) -> Result<(), ValidationError> {
        match std::iter::once(self.name.as_str())
            .chain(self.column_names())
            .find(|name| name.contains('?'))
        {
            Some(name) => Err(ValidationError::InvalidRequest(format!(
                "identifier '{name}' of table '{}' contains '?', which is reserved for parameters",
                self.name
            ))),
            None => Ok(()),
        }
    }

    /// Primary key columns in declaration order.
    pub fn primary_key(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.iter().filter(|c| c.primary_key)
    }
}

/// Data-driven registry of every queryable table.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table, replacing any previous descriptor with the same name.
    pub fn register(&mut self, table: TableSchema) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Adds a table, builder style.
    #[must_use]
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.register(table);
        self
    }

    /// Looks up a table, failing with suggestions when it is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownTable`] if the table is not registered.
    pub fn table(&self, name: &str) -> Result<&TableSchema, ValidationError> {
        self.tables.get(name).ok_or_else(|| {
            ValidationError::unknown_table(name, self.tables.keys().map(String::as_str))
        })
    }

    /// Iterates over registered tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Number of registered tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if no table is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl FromIterator<TableSchema> for SchemaRegistry {
    fn from_iter<I: IntoIterator<Item = TableSchema>>(iter: I) -> Self {
        let mut registry = Self::new();
        for table in iter {
            registry.register(table);
        }
        registry
    }
}
