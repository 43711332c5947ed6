//! Declared materialized views.
//!
//! A materialized view with an inner engine stores its rows in an implicit
//! inner table that the server creates alongside the view. The declared side
//! models that inner table explicitly, together with the SELECT that feeds it.
//!
//! The defining query is kept abstract (SQL text plus bound parameters) and
//! is rendered once, with every parameter inlined as a SQL literal, when the
//! view is constructed. That rendered text is what ends up after `AS` in the
//! generated DDL.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::Statement;
use sqlparser::dialect::ClickHouseDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use super::table::Table;
use crate::framework::core::schema_registry::SchemaError;
use crate::infrastructure::olap::clickhouse::errors::validate_clickhouse_identifier;

/// Matches ClickHouse query parameters such as `{start:Date}`
static QUERY_PARAM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*:\s*([^{}]+?)\s*\}")
        .expect("query parameter regex is valid")
});

/// A literal value bound to a query parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
}

impl fmt::Display for QueryParam {
    /// Renders the value as a ClickHouse SQL literal
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryParam::Null => write!(f, "NULL"),
            QueryParam::Bool(b) => write!(f, "{b}"),
            QueryParam::Int(i) => write!(f, "{i}"),
            QueryParam::UInt(u) => write!(f, "{u}"),
            QueryParam::Float(v) if v.is_finite() => write!(f, "{v:?}"),
            QueryParam::Float(v) if v.is_nan() => write!(f, "nan"),
            QueryParam::Float(v) if *v > 0.0 => write!(f, "inf"),
            QueryParam::Float(_) => write!(f, "-inf"),
            QueryParam::String(s) => {
                write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
            }
        }
    }
}

/// The defining SELECT of a view, with named `{name:Type}` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectQuery {
    pub sql: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, QueryParam>,
}

impl SelectQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: QueryParam) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Inlines every parameter as a literal and checks that the result is a single SELECT.
    pub fn render_with_literal_binds(&self) -> Result<String, SchemaError> {
        let mut unbound = None;
        let mut used = BTreeSet::new();

        let rendered = QUERY_PARAM_REGEX.replace_all(&self.sql, |caps: &regex::Captures| {
            let name = &caps[1];
            match self.params.get(name) {
                Some(value) => {
                    used.insert(name.to_string());
                    value.to_string()
                }
                None => {
                    unbound.get_or_insert_with(|| name.to_string());
                    caps[0].to_string()
                }
            }
        });

        if let Some(name) = unbound {
            return Err(SchemaError::UnboundParameter { name });
        }
        if let Some(name) = self.params.keys().find(|name| !used.contains(*name)) {
            return Err(SchemaError::UnusedParameter { name: name.clone() });
        }

        let sql = rendered.trim().trim_end_matches(';').trim_end().to_string();
        validate_select(&sql)?;
        Ok(sql)
    }
}

fn validate_select(sql: &str) -> Result<(), SchemaError> {
    let statements = Parser::parse_sql(&ClickHouseDialect {}, sql).map_err(|e| {
        SchemaError::InvalidQuery {
            reason: e.to_string(),
        }
    })?;

    match statements.as_slice() {
        [Statement::Query(_)] => Ok(()),
        [] => Err(SchemaError::InvalidQuery {
            reason: "query is empty".to_string(),
        }),
        [_] => Err(SchemaError::InvalidQuery {
            reason: "query is not a SELECT statement".to_string(),
        }),
        _ => Err(SchemaError::InvalidQuery {
            reason: format!("expected a single statement, found {}", statements.len()),
        }),
    }
}

/// A materialized view as declared by the application.
///
/// The view and its inner table share a name. Both the rendered query and
/// the engine clause are computed at construction, so a `DeclaredView` that
/// exists is always renderable.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredView {
    query: SelectQuery,
    inner_table: Table,
    selectable: String,
    engine_clause: String,
}

impl DeclaredView {
    pub fn new(inner_table: Table, query: SelectQuery) -> Result<Self, SchemaError> {
        validate_clickhouse_identifier(&inner_table.name, "view name")?;
        if inner_table.columns.is_empty() {
            return Err(SchemaError::EmptyTable {
                table: inner_table.name,
            });
        }

        let selectable = query.render_with_literal_binds()?;
        let engine_clause = inner_table.engine_clause()?;

        Ok(Self {
            query,
            inner_table,
            selectable,
            engine_clause,
        })
    }

    pub fn name(&self) -> &str {
        &self.inner_table.name
    }

    pub fn query(&self) -> &SelectQuery {
        &self.query
    }

    pub fn inner_table(&self) -> &Table {
        &self.inner_table
    }

    /// The defining query with literals inlined
    pub fn selectable(&self) -> &str {
        &self.selectable
    }

    pub fn engine_clause(&self) -> &str {
        &self.engine_clause
    }
}
