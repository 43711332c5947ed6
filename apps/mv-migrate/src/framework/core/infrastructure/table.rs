use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::infrastructure::olap::clickhouse::errors::ClickhouseError;
use crate::infrastructure::olap::clickhouse::model::ClickHouseColumn;
use crate::infrastructure::olap::clickhouse::queries::{engine_clause_query, ClickhouseEngine};

#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderBy {
    Fields(Vec<String>),
    SingleExpr(String),
}

impl Default for OrderBy {
    fn default() -> Self {
        OrderBy::Fields(Vec::new())
    }
}

impl PartialEq for OrderBy {
    fn eq(&self, other: &Self) -> bool {
        self.to_expr() == other.to_expr()
    }
}

impl OrderBy {
    pub fn to_expr(&self) -> Cow<'_, str> {
        match self {
            OrderBy::Fields(v) if v.is_empty() => "tuple()".into(),
            OrderBy::Fields(v) if v.len() == 1 => (&v[0]).into(),
            OrderBy::Fields(v) => format!("({})", v.join(", ")).into(),
            OrderBy::SingleExpr(expr) => expr.as_str().into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            OrderBy::Fields(v) => v.is_empty(),
            OrderBy::SingleExpr(expr) => expr.trim().is_empty(),
        }
    }

    fn as_fields(&self) -> Vec<String> {
        match self {
            OrderBy::Fields(v) => v.clone(),
            OrderBy::SingleExpr(expr) if expr.trim().is_empty() => Vec::new(),
            OrderBy::SingleExpr(expr) => vec![expr.clone()],
        }
    }
}

/// A storage table. For a materialized view this is the inner table
/// that holds the view's rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<ClickHouseColumn>,
    #[serde(default)]
    pub engine: ClickhouseEngine,
    #[serde(default)]
    pub order_by: OrderBy,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub partition_by: Option<String>,
    /// Rendered after the engine as `SETTINGS k = v, ...`
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub table_settings: Option<BTreeMap<String, String>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<ClickHouseColumn>) -> Self {
        Self {
            name: name.into(),
            columns,
            engine: ClickhouseEngine::default(),
            order_by: OrderBy::default(),
            partition_by: None,
            table_settings: None,
        }
    }

    pub fn with_engine(mut self, engine: ClickhouseEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn column(&self, name: &str) -> Option<&ClickHouseColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Engine text as it follows `ENGINE =` in a CREATE statement,
    /// e.g. `MergeTree PARTITION BY toYYYYMM(day) ORDER BY (day, site)`.
    pub fn engine_clause(&self) -> Result<String, ClickhouseError> {
        engine_clause_query(
            &self.engine,
            &self.order_by.as_fields(),
            self.partition_by.as_deref(),
            self.table_settings.as_ref(),
        )
    }
}
