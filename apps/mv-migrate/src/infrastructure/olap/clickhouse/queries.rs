use handlebars::{no_escape, Handlebars};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

use super::errors::{quote_identifier, validate_clickhouse_identifier, ClickhouseError};
use super::model::{ClickHouseColumn, ColumnDefaultKind};

static CREATE_MATERIALIZED_VIEW_TEMPLATE: &str = r#"CREATE MATERIALIZED VIEW {{#if if_not_exists}}IF NOT EXISTS {{/if}}{{view_name}}{{#if cluster_name}} ON CLUSTER {{cluster_name}}{{/if}}{{#if columns}} ({{columns}}){{/if}} ENGINE = {{engine}} AS {{selectable}}"#;

static ATTACH_MATERIALIZED_VIEW_TEMPLATE: &str = r#"ATTACH MATERIALIZED VIEW {{#if if_not_exists}}IF NOT EXISTS {{/if}}{{view_name}}{{#if cluster_name}} ON CLUSTER {{cluster_name}}{{/if}}{{#if columns}} ({{columns}}){{/if}} ENGINE = {{engine}} AS {{selectable}}"#;

// The inner table goes with the view, so DROP TABLE is used rather than DROP VIEW
static DROP_MATERIALIZED_VIEW_TEMPLATE: &str = r#"DROP TABLE {{#if if_exists}}IF EXISTS {{/if}}{{view_name}}{{#if cluster_name}} ON CLUSTER {{cluster_name}}{{/if}}"#;

static DETACH_VIEW_TEMPLATE: &str = r#"DETACH VIEW {{#if if_exists}}IF EXISTS {{/if}}{{view_name}}{{#if cluster_name}} ON CLUSTER {{cluster_name}}{{/if}}{{#if permanently}} PERMANENTLY{{/if}}"#;

static ALTER_TABLE_ADD_COLUMN_TEMPLATE: &str = r#"ALTER TABLE {{table_name}}{{#if cluster_name}} ON CLUSTER {{cluster_name}}{{/if}} ADD COLUMN {{column}} {{#if after_column}}AFTER {{after_column}}{{else}}FIRST{{/if}}"#;

static ALTER_TABLE_DROP_COLUMN_TEMPLATE: &str = r#"ALTER TABLE {{table_name}}{{#if cluster_name}} ON CLUSTER {{cluster_name}}{{/if}} DROP COLUMN {{column_name}}"#;

static ALTER_TABLE_MODIFY_COLUMN_TEMPLATE: &str = r#"ALTER TABLE {{table_name}}{{#if cluster_name}} ON CLUSTER {{cluster_name}}{{/if}} MODIFY COLUMN {{column}}"#;

static ENGINE_CLAUSE_TEMPLATE: &str = r#"{{engine}}{{#if partition_by}} PARTITION BY {{partition_by}}{{/if}} ORDER BY {{order_by}}{{#if settings}} SETTINGS {{settings}}{{/if}}"#;

fn render_template(template: &str, context: &Value) -> Result<String, ClickhouseError> {
    let mut reg = Handlebars::new();
    reg.register_escape_fn(no_escape);

    Ok(reg.render_template(template, context)?)
}

fn cluster_context(cluster_name: Option<&str>) -> Result<Option<&str>, ClickhouseError> {
    if let Some(cluster) = cluster_name {
        validate_clickhouse_identifier(cluster, "cluster name")?;
    }
    Ok(cluster_name)
}

/// Storage engine of a materialized view's inner table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type")]
pub enum ClickhouseEngine {
    #[default]
    MergeTree,
    ReplacingMergeTree {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ver: Option<String>,
    },
    AggregatingMergeTree,
    SummingMergeTree {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        columns: Vec<String>,
    },
}

impl ClickhouseEngine {
    pub fn requires_order_by(&self) -> bool {
        matches!(self, ClickhouseEngine::ReplacingMergeTree { .. })
    }
}

impl fmt::Display for ClickhouseEngine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClickhouseEngine::MergeTree => write!(f, "MergeTree"),
            ClickhouseEngine::ReplacingMergeTree { ver: None } => write!(f, "ReplacingMergeTree"),
            ClickhouseEngine::ReplacingMergeTree { ver: Some(ver) } => {
                write!(f, "ReplacingMergeTree({ver})")
            }
            ClickhouseEngine::AggregatingMergeTree => write!(f, "AggregatingMergeTree"),
            ClickhouseEngine::SummingMergeTree { columns } => match columns.as_slice() {
                [] => write!(f, "SummingMergeTree"),
                [single] => write!(f, "SummingMergeTree({single})"),
                many => write!(f, "SummingMergeTree(({}))", many.join(", ")),
            },
        }
    }
}

/// Renders the text that follows `ENGINE =`, in the same shape as `system.tables.engine_full`.
pub fn engine_clause_query(
    engine: &ClickhouseEngine,
    order_by: &[String],
    partition_by: Option<&str>,
    settings: Option<&BTreeMap<String, String>>,
) -> Result<String, ClickhouseError> {
    if engine.requires_order_by() && order_by.is_empty() {
        return Err(ClickhouseError::InvalidParameters {
            message: format!("{engine} requires an order by clause"),
        });
    }

    let order_by_string = match order_by {
        [] => "tuple()".to_string(),
        [single] => single.clone(),
        many => format!("({})", many.join(", ")),
    };

    // BTreeMap keeps the settings in a deterministic order
    let settings_string = settings
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.iter()
                .map(|(key, value)| format!("{key} = {value}"))
                .collect::<Vec<String>>()
                .join(", ")
        });

    let context = json!({
        "engine": engine.to_string(),
        "partition_by": partition_by,
        "order_by": order_by_string,
        "settings": settings_string,
    });

    render_template(ENGINE_CLAUSE_TEMPLATE, &context)
}

/// A single column definition as it appears in a column list or an ALTER statement
pub fn column_definition(column: &ClickHouseColumn) -> String {
    let mut definition = format!("{} {}", quote_identifier(&column.name), column.column_type);
    match &column.default {
        Some(default) => definition.push_str(&format!(" {} {default}", column.default_kind)),
        None if column.default_kind == ColumnDefaultKind::Ephemeral => {
            definition.push_str(" EPHEMERAL")
        }
        None => {}
    }
    if let Some(comment) = &column.comment {
        // Escape single quotes in comments for SQL safety
        definition.push_str(&format!(" COMMENT '{}'", comment.replace('\'', "''")));
    }
    definition
}

fn columns_list(columns: &[ClickHouseColumn]) -> String {
    columns
        .iter()
        .map(column_definition)
        .collect::<Vec<String>>()
        .join(", ")
}

fn mat_view_definition_context(
    view_name: &str,
    columns: &[ClickHouseColumn],
    engine: &str,
    selectable: &str,
    if_not_exists: bool,
    cluster_name: Option<&str>,
) -> Result<Value, ClickhouseError> {
    if engine.trim().is_empty() || selectable.trim().is_empty() {
        return Err(ClickhouseError::InvalidParameters {
            message: format!("materialized view '{view_name}' needs both an engine and a query"),
        });
    }

    Ok(json!({
        "view_name": quote_identifier(view_name),
        "if_not_exists": if_not_exists,
        "cluster_name": cluster_context(cluster_name)?,
        "columns": columns_list(columns),
        "engine": engine,
        "selectable": selectable,
    }))
}

pub fn create_mat_view_query(
    view_name: &str,
    columns: &[ClickHouseColumn],
    engine: &str,
    selectable: &str,
    if_not_exists: bool,
    cluster_name: Option<&str>,
) -> Result<String, ClickhouseError> {
    let context = mat_view_definition_context(
        view_name,
        columns,
        engine,
        selectable,
        if_not_exists,
        cluster_name,
    )?;
    render_template(CREATE_MATERIALIZED_VIEW_TEMPLATE, &context)
}

pub fn attach_mat_view_query(
    view_name: &str,
    columns: &[ClickHouseColumn],
    engine: &str,
    selectable: &str,
    if_not_exists: bool,
    cluster_name: Option<&str>,
) -> Result<String, ClickhouseError> {
    let context = mat_view_definition_context(
        view_name,
        columns,
        engine,
        selectable,
        if_not_exists,
        cluster_name,
    )?;
    render_template(ATTACH_MATERIALIZED_VIEW_TEMPLATE, &context)
}

pub fn drop_mat_view_query(
    view_name: &str,
    if_exists: bool,
    cluster_name: Option<&str>,
) -> Result<String, ClickhouseError> {
    let context = json!({
        "view_name": quote_identifier(view_name),
        "if_exists": if_exists,
        "cluster_name": cluster_context(cluster_name)?,
    });

    render_template(DROP_MATERIALIZED_VIEW_TEMPLATE, &context)
}

pub fn detach_view_query(
    view_name: &str,
    if_exists: bool,
    cluster_name: Option<&str>,
    permanently: bool,
) -> Result<String, ClickhouseError> {
    let context = json!({
        "view_name": quote_identifier(view_name),
        "if_exists": if_exists,
        "cluster_name": cluster_context(cluster_name)?,
        "permanently": permanently,
    });

    render_template(DETACH_VIEW_TEMPLATE, &context)
}

/// `position_after` of `None` places the column first.
pub fn alter_table_add_column_query(
    table_name: &str,
    column: &ClickHouseColumn,
    position_after: Option<&str>,
    cluster_name: Option<&str>,
) -> Result<String, ClickhouseError> {
    let context = json!({
        "table_name": quote_identifier(table_name),
        "cluster_name": cluster_context(cluster_name)?,
        "column": column_definition(column),
        "after_column": position_after.map(quote_identifier),
    });

    render_template(ALTER_TABLE_ADD_COLUMN_TEMPLATE, &context)
}

pub fn alter_table_drop_column_query(
    table_name: &str,
    column_name: &str,
    cluster_name: Option<&str>,
) -> Result<String, ClickhouseError> {
    let context = json!({
        "table_name": quote_identifier(table_name),
        "cluster_name": cluster_context(cluster_name)?,
        "column_name": quote_identifier(column_name),
    });

    render_template(ALTER_TABLE_DROP_COLUMN_TEMPLATE, &context)
}

pub fn alter_table_modify_column_query(
    table_name: &str,
    column: &ClickHouseColumn,
    cluster_name: Option<&str>,
) -> Result<String, ClickhouseError> {
    let context = json!({
        "table_name": quote_identifier(table_name),
        "cluster_name": cluster_context(cluster_name)?,
        "column": column_definition(column),
    });

    render_template(ALTER_TABLE_MODIFY_COLUMN_TEMPLATE, &context)
}
