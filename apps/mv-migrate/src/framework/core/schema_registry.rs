//! Registry of declared tables and materialized views.
//!
//! Declarations are collected with a [`SchemaBuilder`]. Every successful
//! [`SchemaBuilder::register_view`] returns an immutable [`SchemaRegistry`]
//! snapshot, and the differ only ever reads snapshots, so the declared schema
//! cannot change under a running diff.

use std::collections::{BTreeMap, BTreeSet};

use super::infrastructure::materialized_view::DeclaredView;
use super::infrastructure::table::Table;
use crate::infrastructure::olap::clickhouse::errors::{
    validate_clickhouse_identifier, ClickhouseError,
};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SchemaError {
    #[error("Materialized view '{name}' is declared more than once")]
    DuplicateView { name: String },

    #[error("Table '{name}' is declared more than once")]
    DuplicateTable { name: String },

    #[error("Query parameter '{name}' has no bound value")]
    UnboundParameter { name: String },

    #[error("Bound value '{name}' is not referenced by the query")]
    UnusedParameter { name: String },

    #[error("Invalid view query: {reason}")]
    InvalidQuery { reason: String },

    #[error("Table '{table}' has no columns")]
    EmptyTable { table: String },

    #[error(transparent)]
    Clickhouse(#[from] ClickhouseError),

    #[error("Failed to read schema file")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse schema file")]
    Parse(#[from] serde_yaml::Error),
}

/// Immutable view of the declared schema
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaRegistry {
    tables: BTreeMap<String, Table>,
    views: BTreeMap<String, DeclaredView>,
}

impl SchemaRegistry {
    pub fn view_names(&self) -> BTreeSet<String> {
        self.views.keys().cloned().collect()
    }

    pub fn view(&self, name: &str) -> Option<&DeclaredView> {
        self.views.get(name)
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Plain tables. Inner tables of views are never listed here.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }
}

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    tables: BTreeMap<String, Table>,
    views: BTreeMap<String, DeclaredView>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a plain table. A table whose name belongs to a registered view
    /// is that view's inner table and is not tracked on its own.
    pub fn add_table(&mut self, table: Table) -> Result<(), SchemaError> {
        validate_clickhouse_identifier(&table.name, "table name")?;

        if self.views.contains_key(&table.name) {
            tracing::debug!(
                "Table '{}' is the inner table of a materialized view, skipping",
                table.name
            );
            return Ok(());
        }
        if self.tables.contains_key(&table.name) {
            return Err(SchemaError::DuplicateTable { name: table.name });
        }

        self.tables.insert(table.name.clone(), table);
        Ok(())
    }

    /// Registers a view and returns a snapshot of the schema including it.
    ///
    /// The view's inner table is removed from the plain tables if it was
    /// declared there.
    pub fn register_view(&mut self, view: DeclaredView) -> Result<SchemaRegistry, SchemaError> {
        let name = view.name().to_string();
        if self.views.contains_key(&name) {
            return Err(SchemaError::DuplicateView { name });
        }

        if self.tables.remove(&name).is_some() {
            tracing::debug!("Table '{}' is now owned by materialized view '{}'", name, name);
        }
        self.views.insert(name, view);

        Ok(self.build())
    }

    pub fn build(&self) -> SchemaRegistry {
        SchemaRegistry {
            tables: self.tables.clone(),
            views: self.views.clone(),
        }
    }
}
