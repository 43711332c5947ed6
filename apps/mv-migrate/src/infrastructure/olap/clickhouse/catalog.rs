//! Resolution of live materialized views against the system catalog.
//!
//! A materialized view with an inner engine writes into a table the server
//! creates for it. On an `Ordinary` database that table is `.inner.<view>`.
//! On an `Atomic` database it is `.inner_id.<uuid>`, where the UUID is the
//! view's own and is only known to the server. The resolver reads it from
//! `system.tables` and hands out an [`IdentityToken`] for the inner table.

use sqlparser::dialect::ClickHouseDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::model::{
    ClickHouseColumn, ClickHouseColumnType, ColumnDefaultKind, SystemColumnRow,
    ViewDefinitionRow,
};
use crate::infrastructure::olap::{OlapChangesError, OlapOperations};

const INNER_NAME_PREFIX: &str = ".inner.";
const INNER_UUID_PREFIX: &str = ".inner_id.";

/// Physical identity of a view's inner table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityToken {
    ByName(String),
    ByUuid(Uuid),
}

impl IdentityToken {
    /// The nil UUID is what the server reports for views without one.
    pub fn from_uuid(view_name: &str, uuid: Uuid) -> Self {
        if uuid.is_nil() {
            IdentityToken::ByName(view_name.to_string())
        } else {
            IdentityToken::ByUuid(uuid)
        }
    }

    pub fn parse(table_name: &str) -> Option<Self> {
        if let Some(uuid) = table_name.strip_prefix(INNER_UUID_PREFIX) {
            return Uuid::parse_str(uuid).ok().map(IdentityToken::ByUuid);
        }
        table_name
            .strip_prefix(INNER_NAME_PREFIX)
            .filter(|name| !name.is_empty())
            .map(|name| IdentityToken::ByName(name.to_string()))
    }

    pub fn table_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IdentityToken::ByName(name) => write!(f, "{INNER_NAME_PREFIX}{name}"),
            IdentityToken::ByUuid(uuid) => write!(f, "{INNER_UUID_PREFIX}{uuid}"),
        }
    }
}

/// A view as it currently exists on the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveViewRecord {
    pub name: String,
    /// Persisted select, literals already inlined
    pub defining_query: String,
    pub engine_clause: String,
    pub inner_identity: IdentityToken,
    pub inner_columns: Vec<ClickHouseColumn>,
}

pub struct CatalogResolver<'a, C: OlapOperations + Sync + ?Sized> {
    olap: &'a C,
    definitions: HashMap<String, ViewDefinitionRow>,
}

impl<'a, C: OlapOperations + Sync + ?Sized> CatalogResolver<'a, C> {
    pub fn new(olap: &'a C) -> Self {
        Self {
            olap,
            definitions: HashMap::new(),
        }
    }

    pub async fn list_live_view_names(&self) -> Result<BTreeSet<String>, OlapChangesError> {
        let names = self.olap.list_materialized_view_names().await?;
        debug!("Found {} live materialized views", names.len());
        Ok(names.into_iter().collect())
    }

    pub async fn resolve_inner_identity(
        &self,
        view_name: &str,
    ) -> Result<IdentityToken, OlapChangesError> {
        let uuid = self
            .olap
            .fetch_table_uuid(view_name)
            .await?
            .ok_or_else(|| OlapChangesError::UnresolvableView {
                view: view_name.to_string(),
                reason: "view is missing from system.tables".to_string(),
            })?;

        let token = IdentityToken::from_uuid(view_name, uuid);
        debug!("Inner table of '{}' is '{}'", view_name, token);
        Ok(token)
    }

    /// Loads the persisted definitions of `view_names` with a single query.
    pub async fn fetch_live_definitions(
        &mut self,
        view_names: &[String],
    ) -> Result<(), OlapChangesError> {
        if view_names.is_empty() {
            return Ok(());
        }

        let rows = self.olap.fetch_view_definitions(view_names).await?;
        for row in rows {
            self.definitions.insert(row.name.clone(), row);
        }
        Ok(())
    }

    /// Returns `(selectable, engine)` for a view loaded by [`Self::fetch_live_definitions`].
    pub fn fetch_live_definition(&self, view_name: &str) -> Result<(String, String), OlapChangesError> {
        let row = self
            .definitions
            .get(view_name)
            .ok_or_else(|| OlapChangesError::UnresolvableView {
                view: view_name.to_string(),
                reason: "no persisted definition in system.tables".to_string(),
            })?;

        let selectable = row.as_select.trim();
        let engine = row.engine_full.trim();

        if selectable.is_empty() {
            return Err(OlapChangesError::MalformedLiveDefinition {
                view: view_name.to_string(),
                reason: "persisted select is empty".to_string(),
            });
        }
        if engine.is_empty() {
            return Err(OlapChangesError::MalformedLiveDefinition {
                view: view_name.to_string(),
                reason: "persisted engine is empty".to_string(),
            });
        }

        // Kept verbatim even when the parser rejects it
        if let Err(e) = Parser::parse_sql(&ClickHouseDialect {}, selectable) {
            warn!(
                "Persisted select of materialized view '{}' could not be parsed, keeping it as is: {}",
                view_name, e
            );
        }

        Ok((selectable.to_string(), engine.to_string()))
    }

    /// Columns of the inner table of `view_name`. Errors name the view.
    pub async fn introspect_columns(
        &self,
        view_name: &str,
        identity: &IdentityToken,
    ) -> Result<Vec<ClickHouseColumn>, OlapChangesError> {
        let table_name = identity.table_name();
        let rows = self.olap.fetch_table_columns(&table_name).await?;

        if rows.is_empty() {
            return Err(OlapChangesError::UnresolvableView {
                view: view_name.to_string(),
                reason: format!("inner table '{table_name}' has no columns in system.columns"),
            });
        }

        rows.into_iter()
            .map(|row| column_from_row(view_name, &table_name, row))
            .collect()
    }

    /// Everything needed to drop a live view and recreate it on rollback.
    /// Definitions must have been loaded with [`Self::fetch_live_definitions`].
    pub async fn live_view_record(
        &self,
        view_name: &str,
    ) -> Result<LiveViewRecord, OlapChangesError> {
        let (defining_query, engine_clause) = self.fetch_live_definition(view_name)?;
        let inner_identity = self.resolve_inner_identity(view_name).await?;
        let inner_columns = self.introspect_columns(view_name, &inner_identity).await?;

        Ok(LiveViewRecord {
            name: view_name.to_string(),
            defining_query,
            engine_clause,
            inner_identity,
            inner_columns,
        })
    }
}

fn column_from_row(
    view_name: &str,
    table: &str,
    row: SystemColumnRow,
) -> Result<ClickHouseColumn, OlapChangesError> {
    let column_type = ClickHouseColumnType::from_type_str(&row.column_type).ok_or_else(|| {
        OlapChangesError::UnsupportedColumnType {
            table: table.to_string(),
            column: row.name.clone(),
            type_name: row.column_type.clone(),
        }
    })?;

    let default_kind = match row.default_kind.as_str() {
        "" => ColumnDefaultKind::Default,
        kind => ColumnDefaultKind::from_catalog(kind).ok_or_else(|| {
            OlapChangesError::MalformedLiveDefinition {
                view: view_name.to_string(),
                reason: format!(
                    "column '{}' of '{}' has unknown default kind {}",
                    row.name, table, kind
                ),
            }
        })?,
    };

    Ok(ClickHouseColumn {
        name: row.name,
        column_type,
        default: Some(row.default_expression).filter(|e| !e.is_empty()),
        default_kind,
        comment: Some(row.comment).filter(|c| !c.is_empty()),
    })
}
