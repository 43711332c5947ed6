use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::infrastructure::olap::clickhouse::errors::ClickhouseError;
use crate::infrastructure::olap::clickhouse::SerializableOlapOperation;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MigrationPlan {
    pub created_at: DateTime<Utc>,
    pub operations: Vec<SerializableOlapOperation>,
}

impl MigrationPlan {
    pub fn new(operations: Vec<SerializableOlapOperation>) -> Self {
        MigrationPlan {
            created_at: Utc::now(),
            operations,
        }
    }

    pub fn total_operations(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Operations that undo this plan: reversed order, each one inverted.
    pub fn downgrade(&self) -> Vec<SerializableOlapOperation> {
        self.operations.iter().rev().map(|op| op.reverse()).collect()
    }

    pub fn upgrade_sql(&self) -> Result<Vec<String>, ClickhouseError> {
        self.operations.iter().map(|op| op.render()).collect()
    }

    pub fn downgrade_sql(&self) -> Result<Vec<String>, ClickhouseError> {
        self.downgrade().iter().map(|op| op.render()).collect()
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        let plan_json = serde_json::to_value(self)?;
        let plan_yaml = serde_yaml::to_string(&plan_json)?;
        Ok(plan_yaml)
    }

    pub fn from_yaml(plan_content: &str) -> anyhow::Result<Self> {
        let plan = serde_json::from_value(serde_yaml::from_str::<serde_json::Value>(plan_content)?)?;
        Ok(plan)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let plan_content = std::fs::read_to_string(path)?;
        Self::from_yaml(&plan_content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::olap::clickhouse::model::{
        ClickHouseColumn, ClickHouseColumnType, ClickHouseInt,
    };
    use crate::infrastructure::olap::clickhouse::operations::{ColumnOperation, MatViewOperation};

    fn column(name: &str) -> ClickHouseColumn {
        ClickHouseColumn::new(
            name,
            ClickHouseColumnType::ClickhouseInt(ClickHouseInt::UInt8),
        )
    }

    fn create_test_plan() -> MigrationPlan {
        let columns = vec![column("a"), column("b")];
        MigrationPlan::new(vec![
            SerializableOlapOperation::MaterializedView(MatViewOperation::create(
                "fresh",
                "SELECT 1 AS a, 2 AS b",
                "MergeTree ORDER BY a",
                columns.clone(),
            )),
            SerializableOlapOperation::MaterializedView(MatViewOperation::detach(
                "v",
                "SELECT a, b FROM t",
                "MergeTree ORDER BY a",
                columns.clone(),
            )),
            SerializableOlapOperation::Column(ColumnOperation::AddColumn {
                table: ".inner.v".to_string(),
                column: column("b"),
                position_after: Some("a".to_string()),
                cluster_name: None,
            }),
            SerializableOlapOperation::MaterializedView(MatViewOperation::attach(
                "v",
                "SELECT a, b FROM t",
                "MergeTree ORDER BY a",
                columns,
            )),
        ])
    }

    #[test]
    fn test_upgrade_sql_keeps_emission_order() {
        let sql = create_test_plan().upgrade_sql().unwrap();
        assert_eq!(sql.len(), 4);
        assert!(sql[0].starts_with("CREATE MATERIALIZED VIEW `fresh`"));
        assert_eq!(sql[1], "DETACH VIEW `v`");
        assert_eq!(sql[2], "ALTER TABLE `.inner.v` ADD COLUMN `b` UInt8 AFTER `a`");
        assert!(sql[3].starts_with("ATTACH MATERIALIZED VIEW `v`"));
    }

    #[test]
    fn test_downgrade_sql_is_reversed_inverse() {
        let sql = create_test_plan().downgrade_sql().unwrap();
        assert_eq!(
            sql,
            vec![
                "DETACH VIEW `v`".to_string(),
                "ALTER TABLE `.inner.v` DROP COLUMN `b`".to_string(),
                "ATTACH MATERIALIZED VIEW `v` (`a` UInt8, `b` UInt8) ENGINE = MergeTree ORDER BY a AS SELECT a, b FROM t".to_string(),
                "DROP TABLE `fresh`".to_string(),
            ]
        );
    }

    #[test]
    fn test_yaml_round_trip() {
        let plan = create_test_plan();
        let yaml = plan.to_yaml().unwrap();
        assert!(yaml.contains("MaterializedView"));

        let loaded = MigrationPlan::from_yaml(&yaml).unwrap();
        assert_eq!(loaded, plan);
    }

    #[test]
    fn test_save_and_load() {
        let dir = assert_fs::TempDir::new().unwrap();
        let path = dir.path().join("plan.yaml");

        let plan = create_test_plan();
        plan.save(&path).unwrap();
        assert_eq!(MigrationPlan::load(&path).unwrap(), plan);
    }
}
