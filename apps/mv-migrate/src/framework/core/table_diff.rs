use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::infrastructure::olap::clickhouse::model::ClickHouseColumn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnChange {
    Added {
        column: ClickHouseColumn,
        position_after: Option<String>,
    },
    /// `position_after` is where the column sat before removal, so it can be put back.
    Removed {
        column: ClickHouseColumn,
        position_after: Option<String>,
    },
    Updated {
        before: ClickHouseColumn,
        after: ClickHouseColumn,
    },
}

fn columns_are_equivalent(before: &ClickHouseColumn, after: &ClickHouseColumn) -> bool {
    before.column_type == after.column_type
        && before.default == after.default
        && before.default_kind == after.default_kind
        && before.comment == after.comment
}

fn preceding_column(columns: &[ClickHouseColumn], index: usize) -> Option<String> {
    index
        .checked_sub(1)
        .and_then(|i| columns.get(i))
        .map(|c| c.name.clone())
}

/// Computes the column changes that turn `before` into `after`.
///
/// Additions and updates come first, in `after` order, so an added column's
/// `position_after` always exists when it is applied. Removals follow in
/// reverse `before` order so that undoing them in reverse re-adds each
/// column after a column that is already back in place.
pub fn compute_table_columns_diff(
    before: &[ClickHouseColumn],
    after: &[ClickHouseColumn],
) -> Vec<ColumnChange> {
    let mut diff = Vec::new();

    let before_columns: HashMap<&String, &ClickHouseColumn> =
        before.iter().map(|col| (&col.name, col)).collect();

    let after_columns: HashMap<&String, &ClickHouseColumn> =
        after.iter().map(|col| (&col.name, col)).collect();

    for (i, after_col) in after.iter().enumerate() {
        if let Some(&before_col) = before_columns.get(&after_col.name) {
            if !columns_are_equivalent(before_col, after_col) {
                tracing::debug!(
                    "Column '{}' modified from {:?} to {:?}",
                    after_col.name,
                    before_col,
                    after_col
                );
                diff.push(ColumnChange::Updated {
                    before: before_col.clone(),
                    after: after_col.clone(),
                });
            } else {
                tracing::debug!("Column '{}' unchanged", after_col.name);
            }
        } else {
            tracing::debug!("Column '{}' has been added", after_col.name);
            diff.push(ColumnChange::Added {
                column: after_col.clone(),
                position_after: preceding_column(after, i),
            });
        }
    }

    for (i, before_col) in before.iter().enumerate().rev() {
        if !after_columns.contains_key(&before_col.name) {
            tracing::debug!("Column '{}' has been removed", before_col.name);
            diff.push(ColumnChange::Removed {
                column: before_col.clone(),
                position_after: preceding_column(before, i),
            });
        }
    }

    diff
}
