//! Computed fields: values derived from materialized rows.
//!
//! A computed field is registered for one table under a name that does not
//! clash with any column, together with the columns it reads. When a request
//! selects it, the engine fetches those columns instead and fills the
//! computed value in after the rows come back.

use crate::error::ValidationError;
use crate::execution::Row;
use crate::schema::SchemaRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Function computing a field from a row holding its dependencies.
pub type ComputeFn = Arc<dyn Fn(&Row) -> serde_json::Value + Send + Sync>;

#[derive(Clone)]
struct ComputedField {
    name: String,
    dependencies: Vec<String>,
    compute: ComputeFn,
}

impl std::fmt::Debug for ComputedField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputedField")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Registry of computed fields, keyed by table.
#[derive(Debug, Clone, Default)]
pub struct ComputedFieldRegistry {
    fields: BTreeMap<String, Vec<ComputedField>>,
}

impl ComputedFieldRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` on `table`, computed by `compute` from `dependencies`.
    ///
    /// # Errors
    ///
    /// Fails if the table is unknown, a dependency is not a column of the
    /// table, or `name` is already a column or computed field.
    ///
    /// # Examples
    ///
    /// ```
    /// use engine::computed::ComputedFieldRegistry;
    /// use engine::schema::{ColumnSchema, SchemaRegistry, TableSchema};
    /// use serde_json::json;
    ///
    /// let schemas = SchemaRegistry::new().with_table(TableSchema::new(
    ///     "sales",
    ///     vec![
    ///         ColumnSchema::new("amount", "Float64"),
    ///         ColumnSchema::new("quantity", "UInt32"),
    ///     ],
    /// ));
    ///
    /// let mut computed = ComputedFieldRegistry::new();
    /// computed
    ///     .register(&schemas, "sales", "unit_price", &["amount", "quantity"], |row| {
    ///         let amount = row["amount"].as_f64().unwrap_or(0.0);
    ///         let quantity = row["quantity"].as_f64().unwrap_or(1.0);
    ///         json!(amount / quantity)
    ///     })
    ///     .unwrap();
    ///
    /// assert!(computed.is_computed("sales", "unit_price"));
    /// ```
    pub fn register<F>(
        &mut self,
        schemas: &SchemaRegistry,
        table: &str,
        name: &str,
        dependencies: &[&str],
        compute: F,
    ) -> Result<(), ValidationError>
    where
        F: Fn(&Row) -> serde_json::Value + Send + Sync + 'static,
    {
        let schema = schemas.table(table)?;
        if schema.column(name).is_some() {
            return Err(ValidationError::InvalidRequest(format!(
                "computed field '{name}' shadows a column of table '{table}'"
            )));
        }
        if self.is_computed(table, name) {
            return Err(ValidationError::InvalidRequest(format!(
                "computed field '{name}' is already registered on table '{table}'"
            )));
        }
        for dependency in dependencies {
            schema.resolve(dependency)?;
        }

        self.fields
            .entry(table.to_string())
            .or_default()
            .push(ComputedField {
                name: name.to_string(),
                dependencies: dependencies.iter().map(|d| (*d).to_string()).collect(),
                compute: Arc::new(compute),
            });
        tracing::debug!(table, field = name, ?dependencies, "Registered computed field");
        Ok(())
    }

    /// Returns true if `name` is a computed field of `table`.
    #[must_use]
    pub fn is_computed(&self, table: &str, name: &str) -> bool {
        self.field(table, name).is_some()
    }

    /// Columns read by the computed field, in registration order.
    #[must_use]
    pub fn dependencies(&self, table: &str, name: &str) -> Option<&[String]> {
        self.field(table, name).map(|f| f.dependencies.as_slice())
    }

    /// Names of the computed fields of `table`.
    pub fn names<'a>(&'a self, table: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .get(table)
            .into_iter()
            .flatten()
            .map(|f| f.name.as_str())
    }

    /// Fills `fields` into every row. Unknown names are ignored.
    pub fn apply(&self, table: &str, fields: &[String], rows: &mut [Row]) {
        let selected: Vec<&ComputedField> = fields
            .iter()
            .filter_map(|name| self.field(table, name))
            .collect();
        if selected.is_empty() {
            return;
        }
        for row in rows.iter_mut() {
            for field in &selected {
                let value = (field.compute)(row);
                row.insert(field.name.clone(), value);
            }
        }
    }

    fn field(&self, table: &str, name: &str) -> Option<&ComputedField> {
        self.fields.get(table)?.iter().find(|f| f.name == name)
    }
}
