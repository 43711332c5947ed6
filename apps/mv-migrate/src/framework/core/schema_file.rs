//! YAML schema declarations.
//!
//! ```yaml
//! tables:
//!   - name: events
//!     columns:
//!       - { name: ts, type: DateTime }
//!       - { name: site, type: String }
//! views:
//!   - name: daily_hits
//!     engine: { type: SummingMergeTree }
//!     order_by: [day, site]
//!     columns:
//!       - { name: day, type: Date }
//!       - { name: site, type: String }
//!       - { name: hits, type: UInt64 }
//!     query:
//!       sql: SELECT toDate(ts) AS day, site, count() AS hits FROM events WHERE site != {excluded:String} GROUP BY day, site
//!       params: { excluded: internal }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::infrastructure::materialized_view::{DeclaredView, SelectQuery};
use super::infrastructure::table::Table;
use super::schema_registry::{SchemaBuilder, SchemaError, SchemaRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ViewDeclaration {
    query: SelectQuery,
    #[serde(flatten)]
    inner_table: Table,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    tables: Vec<Table>,
    #[serde(default)]
    views: Vec<ViewDeclaration>,
}

pub fn parse_schema(contents: &str) -> Result<SchemaRegistry, SchemaError> {
    let file: SchemaFile = serde_yaml::from_str(contents)?;

    let mut builder = SchemaBuilder::new();
    for table in file.tables {
        builder.add_table(table)?;
    }
    for declaration in file.views {
        let view = DeclaredView::new(declaration.inner_table, declaration.query)?;
        builder.register_view(view)?;
    }

    let registry = builder.build();
    tracing::info!(
        "Loaded schema with {} materialized views and {} tables",
        registry.view_names().len(),
        registry.tables().count()
    );
    Ok(registry)
}

pub fn load_schema(path: &Path) -> Result<SchemaRegistry, SchemaError> {
    tracing::debug!("Reading schema from {}", path.display());
    let contents = std::fs::read_to_string(path)?;
    parse_schema(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::core::infrastructure::materialized_view::QueryParam;
    use crate::infrastructure::olap::clickhouse::queries::ClickhouseEngine;

    const SCHEMA: &str = r#"
tables:
  - name: events
    columns:
      - { name: ts, type: DateTime }
      - { name: site, type: String }
  - name: daily_hits
    columns:
      - { name: day, type: Date }
views:
  - name: daily_hits
    engine: { type: SummingMergeTree }
    order_by: [day, site]
    columns:
      - { name: day, type: Date }
      - { name: site, type: "LowCardinality(String)" }
      - { name: hits, type: UInt64, comment: "page hits" }
    query:
      sql: SELECT toDate(ts) AS day, site, count() AS hits FROM events WHERE site != {excluded:String} GROUP BY day, site
      params: { excluded: internal }
"#;

    #[test]
    fn test_parse_schema() {
        let registry = parse_schema(SCHEMA).unwrap();

        assert!(registry.table("events").is_some());
        assert!(registry.table("daily_hits").is_none());

        let view = registry.view("daily_hits").unwrap();
        assert_eq!(
            view.inner_table().engine,
            ClickhouseEngine::SummingMergeTree { columns: vec![] }
        );
        assert_eq!(
            view.query().params.get("excluded"),
            Some(&QueryParam::String("internal".to_string()))
        );
        assert_eq!(
            view.selectable(),
            "SELECT toDate(ts) AS day, site, count() AS hits FROM events WHERE site != 'internal' GROUP BY day, site"
        );
        assert_eq!(
            view.engine_clause(),
            "SummingMergeTree ORDER BY (day, site)"
        );
        assert_eq!(
            view.inner_table().columns[2].comment.as_deref(),
            Some("page hits")
        );
    }

    #[test]
    fn test_empty_schema() {
        let registry = parse_schema("{}").unwrap();
        assert!(registry.view_names().is_empty());
    }

    #[test]
    fn test_unknown_column_type() {
        let result = parse_schema(
            r#"
views:
  - name: broken
    columns:
      - { name: x, type: NotAType }
    query:
      sql: SELECT 1 AS x
"#,
        );
        assert!(matches!(result, Err(SchemaError::Parse(_))));
    }

    #[test]
    fn test_load_schema_missing_file() {
        let result = load_schema(Path::new("/definitely/not/here.yaml"));
        assert!(matches!(result, Err(SchemaError::Io(_))));
    }
}
