use self::clickhouse::config::ClickHouseConfig;
use self::clickhouse::errors::ClickhouseError;
use self::clickhouse::model::{SystemColumnRow, ViewDefinitionRow};
use self::clickhouse::{ClickhouseChangesError, SerializableOlapOperation};

pub mod clickhouse;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum OlapChangesError {
    #[error("Failed to read the ClickHouse system catalog")]
    CatalogUnavailable {
        #[source]
        source: ::clickhouse::error::Error,
    },

    #[error("Cannot resolve materialized view '{view}': {reason}")]
    UnresolvableView { view: String, reason: String },

    #[error("Persisted definition of materialized view '{view}' is malformed: {reason}")]
    MalformedLiveDefinition { view: String, reason: String },

    #[error("Column '{column}' of table '{table}' has unsupported type {type_name}")]
    UnsupportedColumnType {
        table: String,
        column: String,
        type_name: String,
    },

    #[error(transparent)]
    Query(#[from] ClickhouseError),

    #[error("Failed to execute the changes on Clickhouse")]
    ClickhouseChanges(#[from] ClickhouseChangesError),
}

/// Raw reads of the system catalog of the current database.
///
/// Implementations only fetch rows; turning them into view records and
/// inner-table identities is the job of the catalog resolver.
#[async_trait::async_trait]
pub trait OlapOperations {
    /// Names of every table whose engine is `MaterializedView`
    async fn list_materialized_view_names(&self) -> Result<Vec<String>, OlapChangesError>;

    /// Persisted `as_select` and `engine_full` for the given views, in one query.
    /// Views that do not exist are absent from the result.
    async fn fetch_view_definitions(
        &self,
        names: &[String],
    ) -> Result<Vec<ViewDefinitionRow>, OlapChangesError>;

    async fn fetch_table_uuid(&self, table: &str) -> Result<Option<uuid::Uuid>, OlapChangesError>;

    /// Columns of `table` in declaration order
    async fn fetch_table_columns(
        &self,
        table: &str,
    ) -> Result<Vec<SystemColumnRow>, OlapChangesError>;
}

/// This method dispatches the execution of the changes to the right olap storage.
pub async fn execute_changes(
    clickhouse_config: &ClickHouseConfig,
    operations: &[SerializableOlapOperation],
) -> Result<(), OlapChangesError> {
    clickhouse::execute_changes(clickhouse_config, operations).await?;
    Ok(())
}
