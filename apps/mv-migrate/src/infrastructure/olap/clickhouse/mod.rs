//! # ClickHouse OLAP Implementation
//!
//! ClickHouse-specific side of materialized view migrations: the client used
//! to read the system catalog and run DDL, the operations that make up a
//! migration plan, and the differ that produces them.
//!
//! ## Usage Example
//! ```ignore
//! let client = create_client(config);
//! let mut operations = Vec::new();
//! compare_mat_views(&client, &registry, None, &mut operations).await?;
//! ```

use clickhouse::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use errors::ClickhouseError;
use model::{SystemColumnRow, SystemTableNameRow, SystemTableUuidRow, ViewDefinitionRow};
use operations::{ColumnOperation, MatViewOperation};

use crate::infrastructure::olap::{OlapChangesError, OlapOperations};

pub mod catalog;
pub mod config;
pub mod errors;
pub mod model;
pub mod mv_diff;
pub mod operations;
pub mod queries;

pub use config::ClickHouseConfig;

/// Represents errors that can occur during ClickHouse operations
#[derive(Debug, thiserror::Error)]
pub enum ClickhouseChangesError {
    /// Error when rendering an operation
    #[error("Error interacting with Clickhouse")]
    Clickhouse(#[from] ClickhouseError),

    /// Error from the ClickHouse client library
    #[error("Error interacting with Clickhouse{}", .resource.as_ref().map(|t| format!(" for '{t}'")).unwrap_or_default())]
    ClickhouseClient {
        #[source]
        error: clickhouse::error::Error,
        resource: Option<String>,
    },
}

/// A single step of a migration plan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SerializableOlapOperation {
    MaterializedView(MatViewOperation),
    Column(ColumnOperation),
}

impl SerializableOlapOperation {
    pub fn render(&self) -> Result<String, ClickhouseError> {
        match self {
            SerializableOlapOperation::MaterializedView(op) => op.render(),
            SerializableOlapOperation::Column(op) => op.render(),
        }
    }

    pub fn reverse(&self) -> Self {
        match self {
            SerializableOlapOperation::MaterializedView(op) => {
                SerializableOlapOperation::MaterializedView(op.reverse())
            }
            SerializableOlapOperation::Column(op) => SerializableOlapOperation::Column(op.reverse()),
        }
    }

    /// Name of the view or table the operation acts on
    pub fn resource(&self) -> &str {
        match self {
            SerializableOlapOperation::MaterializedView(op) => &op.name,
            SerializableOlapOperation::Column(
                ColumnOperation::AddColumn { table, .. }
                | ColumnOperation::DropColumn { table, .. }
                | ColumnOperation::ModifyColumn { table, .. },
            ) => table,
        }
    }
}

/// Returns a human-readable description of an operation for logging/display
pub fn describe_operation(operation: &SerializableOlapOperation) -> String {
    match operation {
        SerializableOlapOperation::MaterializedView(op) => op.describe(),
        SerializableOlapOperation::Column(op) => op.describe(),
    }
}

/// Executes operations one at a time, in the given order, stopping at the first failure.
pub async fn execute_changes(
    clickhouse_config: &ClickHouseConfig,
    operations: &[SerializableOlapOperation],
) -> Result<(), ClickhouseChangesError> {
    let client = create_client(clickhouse_config.clone());
    check_ready(&client)
        .await
        .map_err(|e| ClickhouseChangesError::ClickhouseClient {
            error: e,
            resource: None,
        })?;

    info!("Executing {} OLAP operations", operations.len());
    for operation in operations {
        execute_operation(operation, &client).await?;
    }

    info!("OLAP Change execution complete");
    Ok(())
}

pub async fn execute_operation(
    operation: &SerializableOlapOperation,
    client: &ConfiguredDBClient,
) -> Result<(), ClickhouseChangesError> {
    info!("{}", describe_operation(operation));
    let query = operation.render()?;
    run_query(&query, client)
        .await
        .map_err(|e| ClickhouseChangesError::ClickhouseClient {
            error: e,
            resource: Some(operation.resource().to_string()),
        })
}

pub struct ConfiguredDBClient {
    pub client: Client,
    pub config: ClickHouseConfig,
}

/// Creates a configured ClickHouse client with the provided configuration
pub fn create_client(clickhouse_config: ClickHouseConfig) -> ConfiguredDBClient {
    ConfiguredDBClient {
        client: Client::default()
            .with_url(clickhouse_config.url())
            .with_user(clickhouse_config.user.to_string())
            .with_password(clickhouse_config.password.to_string())
            .with_database(clickhouse_config.db_name.to_string()),
        config: clickhouse_config,
    }
}

/// Executes a SQL query against the ClickHouse database
pub async fn run_query(
    query: &str,
    configured_client: &ConfiguredDBClient,
) -> Result<(), clickhouse::error::Error> {
    debug!("Running query: {:?}", query);
    let client = &configured_client.client;
    client.query(query).execute().await
}

const READY_RETRIES: u32 = 20;
const READY_RETRY_DELAY: tokio::time::Duration = tokio::time::Duration::from_millis(200);

/// Checks if the ClickHouse database is ready for operations
///
/// Retries on connection-level network errors, up to 20 times with a 200ms delay.
pub async fn check_ready(
    configured_client: &ConfiguredDBClient,
) -> Result<(), clickhouse::error::Error> {
    let dummy_query = "SELECT version()";
    let mut attempt = 0;
    loop {
        match run_query(dummy_query, configured_client).await {
            Ok(()) => return Ok(()),
            Err(clickhouse::error::Error::Network(e)) if attempt < READY_RETRIES => {
                debug!("Network error is {}, retrying", e);
                attempt += 1;
                tokio::time::sleep(READY_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn catalog_unavailable(source: clickhouse::error::Error) -> OlapChangesError {
    OlapChangesError::CatalogUnavailable { source }
}

#[async_trait::async_trait]
impl OlapOperations for ConfiguredDBClient {
    async fn list_materialized_view_names(&self) -> Result<Vec<String>, OlapChangesError> {
        let query = "SELECT name FROM system.tables WHERE database = currentDatabase() AND engine = 'MaterializedView'";
        debug!("Listing materialized views: {}", query);

        let rows = self
            .client
            .query(query)
            .fetch_all::<SystemTableNameRow>()
            .await
            .map_err(catalog_unavailable)?;
        Ok(rows.into_iter().map(|row| row.name).collect())
    }

    async fn fetch_view_definitions(
        &self,
        names: &[String],
    ) -> Result<Vec<ViewDefinitionRow>, OlapChangesError> {
        let query = "SELECT name, as_select, engine_full FROM system.tables WHERE database = currentDatabase() AND name IN ?";
        debug!("Fetching definitions of {:?}: {}", names, query);

        self.client
            .query(query)
            .bind(names)
            .fetch_all::<ViewDefinitionRow>()
            .await
            .map_err(catalog_unavailable)
    }

    async fn fetch_table_uuid(&self, table: &str) -> Result<Option<uuid::Uuid>, OlapChangesError> {
        let query =
            "SELECT uuid FROM system.tables WHERE database = currentDatabase() AND name = ?";
        debug!("Fetching uuid of {}: {}", table, query);

        let row = self
            .client
            .query(query)
            .bind(table)
            .fetch_optional::<SystemTableUuidRow>()
            .await
            .map_err(catalog_unavailable)?;
        Ok(row.map(|row| row.uuid))
    }

    async fn fetch_table_columns(
        &self,
        table: &str,
    ) -> Result<Vec<SystemColumnRow>, OlapChangesError> {
        let query = "SELECT name, type, default_kind, default_expression, comment FROM system.columns WHERE database = currentDatabase() AND table = ? ORDER BY position";
        debug!("Fetching columns of {}: {}", table, query);

        self.client
            .query(query)
            .bind(table)
            .fetch_all::<SystemColumnRow>()
            .await
            .map_err(catalog_unavailable)
    }
}
