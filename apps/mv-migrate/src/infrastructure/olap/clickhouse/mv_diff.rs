//! Materialized view reconciliation.
//!
//! Declared views are compared with the live ones by name. Views that only
//! exist on one side are created or dropped. Views on both sides are compared
//! through their inner tables: the live inner table is introspected and
//! diffed column by column against the declared one, and any column change is
//! applied between a detach and an attach of the view.

use std::collections::BTreeSet;
use tracing::{debug, info};

use super::catalog::CatalogResolver;
use super::operations::{
    ColumnOperation, MatViewModifiers, MatViewOperation, MatViewOperationKind,
};
use super::SerializableOlapOperation;
use crate::framework::core::infrastructure::materialized_view::DeclaredView;
use crate::framework::core::schema_registry::SchemaRegistry;
use crate::framework::core::table_diff::compute_table_columns_diff;
use crate::infrastructure::olap::{OlapChangesError, OlapOperations};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatViewClassification {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub common: Vec<String>,
}

/// Partitions the union of both name sets. Every list comes out sorted.
pub fn classify_mat_views(
    declared: &BTreeSet<String>,
    live: &BTreeSet<String>,
) -> MatViewClassification {
    MatViewClassification {
        added: declared.difference(live).cloned().collect(),
        removed: live.difference(declared).cloned().collect(),
        common: declared.intersection(live).cloned().collect(),
    }
}

fn modifiers(cluster_name: Option<&str>) -> MatViewModifiers {
    MatViewModifiers {
        on_cluster: cluster_name.map(str::to_string),
        ..MatViewModifiers::default()
    }
}

fn declared_operation(
    view: &DeclaredView,
    kind: MatViewOperationKind,
    cluster_name: Option<&str>,
) -> MatViewOperation {
    let name = view.name();
    let selectable = view.selectable();
    let engine = view.engine_clause();
    let columns = view.inner_table().columns.clone();

    let op = match kind {
        MatViewOperationKind::Create => MatViewOperation::create(name, selectable, engine, columns),
        MatViewOperationKind::Drop => MatViewOperation::drop(name, selectable, engine, columns),
        MatViewOperationKind::Attach => MatViewOperation::attach(name, selectable, engine, columns),
        MatViewOperationKind::Detach => MatViewOperation::detach(name, selectable, engine, columns),
    };
    op.with_modifiers(modifiers(cluster_name))
}

/// Appends the operations that bring the live materialized views in line
/// with `registry` to `upgrade_ops`.
///
/// Nothing is appended unless the whole comparison succeeds.
pub async fn compare_mat_views<C: OlapOperations + Sync + ?Sized>(
    olap: &C,
    registry: &SchemaRegistry,
    cluster_name: Option<&str>,
    upgrade_ops: &mut Vec<SerializableOlapOperation>,
) -> Result<(), OlapChangesError> {
    let mut resolver = CatalogResolver::new(olap);
    let mut ops = Vec::new();

    let live = resolver.list_live_view_names().await?;
    let classification = classify_mat_views(&registry.view_names(), &live);

    for name in &classification.added {
        let Some(view) = registry.view(name) else {
            continue;
        };
        info!("Detected added materialized view '{}'", name);
        ops.push(SerializableOlapOperation::MaterializedView(
            declared_operation(view, MatViewOperationKind::Create, cluster_name),
        ));
    }

    resolver.fetch_live_definitions(&classification.removed).await?;
    for name in &classification.removed {
        let record = resolver.live_view_record(name).await?;
        info!(
            "Detected removed materialized view '{}' (inner table '{}')",
            name, record.inner_identity
        );
        ops.push(SerializableOlapOperation::MaterializedView(
            MatViewOperation::drop(
                record.name,
                record.defining_query,
                record.engine_clause,
                record.inner_columns,
            )
            .with_modifiers(modifiers(cluster_name)),
        ));
    }

    for name in &classification.common {
        let Some(view) = registry.view(name) else {
            continue;
        };
        let identity = resolver.resolve_inner_identity(name).await?;
        let live_columns = resolver.introspect_columns(name, &identity).await?;
        let changes = compute_table_columns_diff(&live_columns, &view.inner_table().columns);

        if changes.is_empty() {
            debug!("Materialized view '{}' is unchanged", name);
            continue;
        }

        info!(
            "Detected {} column changes in materialized view '{}'",
            changes.len(),
            name
        );
        ops.push(SerializableOlapOperation::MaterializedView(
            declared_operation(view, MatViewOperationKind::Detach, cluster_name),
        ));
        let table_name = identity.table_name();
        for change in changes {
            ops.push(SerializableOlapOperation::Column(ColumnOperation::from_change(
                &table_name,
                change,
                cluster_name,
            )));
        }
        ops.push(SerializableOlapOperation::MaterializedView(
            declared_operation(view, MatViewOperationKind::Attach, cluster_name),
        ));
    }

    upgrade_ops.extend(ops);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::core::infrastructure::materialized_view::SelectQuery;
    use crate::framework::core::infrastructure::table::{OrderBy, Table};
    use crate::framework::core::schema_registry::SchemaBuilder;
    use crate::infrastructure::olap::clickhouse::model::{
        ClickHouseColumn, ClickHouseColumnType, ClickHouseInt,
    };
    use crate::test_utils::{column_row, InMemoryCatalog};
    use uuid::Uuid;

    fn uint8(name: &str) -> ClickHouseColumn {
        ClickHouseColumn::new(
            name,
            ClickHouseColumnType::ClickhouseInt(ClickHouseInt::UInt8),
        )
    }

    fn declared(name: &str, columns: Vec<ClickHouseColumn>) -> DeclaredView {
        let select = format!(
            "SELECT {} FROM source",
            columns
                .iter()
                .map(|c| c.name.clone())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let table = Table::new(name, columns)
            .with_order_by(OrderBy::Fields(vec!["a".to_string()]));
        DeclaredView::new(table, SelectQuery::new(select)).unwrap()
    }

    fn registry(views: Vec<DeclaredView>) -> SchemaRegistry {
        let mut builder = SchemaBuilder::new();
        for view in views {
            builder.register_view(view).unwrap();
        }
        builder.build()
    }

    fn mat_view(op: &SerializableOlapOperation) -> &MatViewOperation {
        match op {
            SerializableOlapOperation::MaterializedView(op) => op,
            other => panic!("expected a materialized view operation, got {other:?}"),
        }
    }

    #[test]
    fn test_classification_partitions_names() {
        let declared: BTreeSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let live: BTreeSet<String> = ["b", "c", "d"].iter().map(|s| s.to_string()).collect();

        let classification = classify_mat_views(&declared, &live);
        assert_eq!(classification.added, vec!["a".to_string()]);
        assert_eq!(classification.removed, vec!["d".to_string()]);
        assert_eq!(classification.common, vec!["b".to_string(), "c".to_string()]);

        let union: BTreeSet<String> = declared.union(&live).cloned().collect();
        let mut all: Vec<String> = classification
            .added
            .iter()
            .chain(&classification.removed)
            .chain(&classification.common)
            .cloned()
            .collect();
        all.sort();
        assert_eq!(all, union.into_iter().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_added_view_is_created_without_catalog_lookups() {
        let catalog = InMemoryCatalog::new();
        let registry = registry(vec![declared("v1", vec![uint8("a")])]);

        let mut ops = Vec::new();
        compare_mat_views(&catalog, &registry, None, &mut ops)
            .await
            .unwrap();

        assert_eq!(ops.len(), 1);
        let create = mat_view(&ops[0]);
        assert_eq!(create.kind, MatViewOperationKind::Create);
        assert_eq!(create.name, "v1");
        assert_eq!(create.selectable, "SELECT a FROM source");
        assert_eq!(create.engine, "MergeTree ORDER BY a");
        assert_eq!(
            catalog.calls(),
            vec!["list_materialized_view_names".to_string()]
        );
    }

    #[tokio::test]
    async fn test_removed_view_is_dropped_with_live_definition() {
        let catalog = InMemoryCatalog::new().with_view(
            "v2",
            Uuid::parse_str("0b7d1c5e-8f3a-4e2b-9c6d-3a1f5e7b9d20").unwrap(),
            "SELECT a, b FROM source",
            "MergeTree ORDER BY a SETTINGS index_granularity = 8192",
            vec![column_row("a", "UInt8"), column_row("b", "String")],
        );

        let mut ops = Vec::new();
        compare_mat_views(&catalog, &registry(vec![]), None, &mut ops)
            .await
            .unwrap();

        assert_eq!(ops.len(), 1);
        let drop = mat_view(&ops[0]);
        assert_eq!(drop.kind, MatViewOperationKind::Drop);
        assert_eq!(drop.selectable, "SELECT a, b FROM source");
        assert_eq!(
            drop.engine,
            "MergeTree ORDER BY a SETTINGS index_granularity = 8192"
        );
        assert_eq!(drop.render().unwrap(), "DROP TABLE `v2`");
        assert_eq!(
            drop.reverse().render().unwrap(),
            "CREATE MATERIALIZED VIEW `v2` (`a` UInt8, `b` String) ENGINE = MergeTree ORDER BY a SETTINGS index_granularity = 8192 AS SELECT a, b FROM source"
        );
    }

    #[tokio::test]
    async fn test_changed_view_is_bracketed_by_detach_and_attach() {
        let catalog = InMemoryCatalog::new().with_view(
            "v3",
            Uuid::nil(),
            "SELECT a FROM source",
            "MergeTree ORDER BY a",
            vec![column_row("a", "UInt8")],
        );
        let registry = registry(vec![declared("v3", vec![uint8("a"), uint8("b")])]);

        let mut ops = Vec::new();
        compare_mat_views(&catalog, &registry, Some("main"), &mut ops)
            .await
            .unwrap();

        assert_eq!(ops.len(), 3);
        assert_eq!(mat_view(&ops[0]).kind, MatViewOperationKind::Detach);
        assert_eq!(
            ops[1],
            SerializableOlapOperation::Column(ColumnOperation::AddColumn {
                table: ".inner.v3".to_string(),
                column: uint8("b"),
                position_after: Some("a".to_string()),
                cluster_name: Some("main".to_string()),
            })
        );
        assert_eq!(mat_view(&ops[2]).kind, MatViewOperationKind::Attach);

        let rendered: Vec<String> = ops.iter().map(|op| op.render().unwrap()).collect();
        assert_eq!(
            rendered,
            vec![
                "DETACH VIEW `v3` ON CLUSTER main",
                "ALTER TABLE `.inner.v3` ON CLUSTER main ADD COLUMN `b` UInt8 AFTER `a`",
                "ATTACH MATERIALIZED VIEW `v3` ON CLUSTER main (`a` UInt8, `b` UInt8) ENGINE = MergeTree ORDER BY a AS SELECT a, b FROM source",
            ]
        );
    }

    #[tokio::test]
    async fn test_changed_view_uses_uuid_inner_table() {
        let uuid = Uuid::parse_str("9e2f4a6b-1c3d-4e5f-8a7b-6c5d4e3f2a10").unwrap();
        let catalog = InMemoryCatalog::new().with_view(
            "v4",
            uuid,
            "SELECT a, old FROM source",
            "MergeTree ORDER BY a",
            vec![column_row("a", "UInt8"), column_row("old", "String")],
        );
        let registry = registry(vec![declared("v4", vec![uint8("a")])]);

        let mut ops = Vec::new();
        compare_mat_views(&catalog, &registry, None, &mut ops)
            .await
            .unwrap();

        assert_eq!(ops.len(), 3);
        assert_eq!(
            ops[1].render().unwrap(),
            format!("ALTER TABLE `.inner_id.{uuid}` DROP COLUMN `old`")
        );
    }

    #[tokio::test]
    async fn test_unchanged_view_produces_nothing() {
        let catalog = InMemoryCatalog::new().with_view(
            "v5",
            Uuid::nil(),
            "SELECT a FROM source",
            "MergeTree ORDER BY a",
            vec![column_row("a", "UInt8")],
        );
        let registry = registry(vec![declared("v5", vec![uint8("a")])]);

        let mut ops = Vec::new();
        compare_mat_views(&catalog, &registry, None, &mut ops)
            .await
            .unwrap();
        assert!(ops.is_empty());
    }

    #[tokio::test]
    async fn test_downgrade_reverses_changed_view() {
        let catalog = InMemoryCatalog::new().with_view(
            "v3",
            Uuid::nil(),
            "SELECT a FROM source",
            "MergeTree ORDER BY a",
            vec![column_row("a", "UInt8")],
        );
        let registry = registry(vec![declared("v3", vec![uint8("a"), uint8("b")])]);

        let mut ops = Vec::new();
        compare_mat_views(&catalog, &registry, None, &mut ops)
            .await
            .unwrap();

        let downgrade: Vec<String> = ops
            .iter()
            .rev()
            .map(|op| op.reverse().render().unwrap())
            .collect();
        assert_eq!(downgrade[0], "DETACH VIEW `v3`");
        assert_eq!(downgrade[1], "ALTER TABLE `.inner.v3` DROP COLUMN `b`");
        assert!(downgrade[2].starts_with("ATTACH MATERIALIZED VIEW `v3`"));
    }

    #[tokio::test]
    async fn test_catalog_failure_appends_nothing() {
        let catalog = InMemoryCatalog::new()
            .with_view(
                "gone",
                Uuid::nil(),
                "SELECT a FROM source",
                "MergeTree ORDER BY a",
                vec![column_row("a", "UInt8")],
            )
            .failing_on("fetch_table_columns");
        let registry = registry(vec![declared("fresh", vec![uint8("a")])]);

        let mut ops = vec![SerializableOlapOperation::MaterializedView(
            MatViewOperation::create("existing", "SELECT 1 AS a", "MergeTree", vec![uint8("a")]),
        )];
        let result = compare_mat_views(&catalog, &registry, None, &mut ops).await;

        assert!(matches!(
            result,
            Err(OlapChangesError::CatalogUnavailable { .. })
        ));
        assert_eq!(ops.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_live_definition_names_the_view() {
        let catalog = InMemoryCatalog::new().with_view(
            "broken",
            Uuid::nil(),
            "SELECT a FROM source",
            "",
            vec![column_row("a", "UInt8")],
        );

        let mut ops = Vec::new();
        let result = compare_mat_views(&catalog, &registry(vec![]), None, &mut ops).await;

        assert!(matches!(
            result,
            Err(OlapChangesError::MalformedLiveDefinition { view, .. }) if view == "broken"
        ));
        assert!(ops.is_empty());
    }

    #[tokio::test]
    async fn test_removed_view_keeps_alias_column_on_rollback() {
        let mut alias = column_row("b", "UInt16");
        alias.default_kind = "ALIAS".to_string();
        alias.default_expression = "a * 2".to_string();
        let catalog = InMemoryCatalog::new().with_view(
            "gone",
            Uuid::nil(),
            "SELECT a FROM s",
            "MergeTree ORDER BY a",
            vec![column_row("a", "UInt8"), alias],
        );

        let mut ops = Vec::new();
        compare_mat_views(&catalog, &registry(vec![]), None, &mut ops)
            .await
            .unwrap();

        assert_eq!(ops.len(), 1);
        assert_eq!(
            ops[0].reverse().render().unwrap(),
            "CREATE MATERIALIZED VIEW `gone` (`a` UInt8, `b` UInt16 ALIAS a * 2) ENGINE = MergeTree ORDER BY a AS SELECT a FROM s"
        );
    }

    #[tokio::test]
    async fn test_missing_inner_table_of_common_view_names_the_view() {
        let catalog = InMemoryCatalog::new().with_view(
            "v9",
            Uuid::parse_str("9e2f4a6b-1c3d-4e5f-8a7b-6c5d4e3f2a10").unwrap(),
            "SELECT a FROM source",
            "MergeTree ORDER BY a",
            vec![],
        );
        let registry = registry(vec![declared("v9", vec![uint8("a")])]);

        let mut ops = Vec::new();
        let result = compare_mat_views(&catalog, &registry, None, &mut ops).await;

        assert!(matches!(
            result,
            Err(OlapChangesError::UnresolvableView { view, .. }) if view == "v9"
        ));
        assert!(ops.is_empty());
    }
}
