//! Reversible migration operations for materialized views and their inner tables.
//!
//! Every operation renders itself to a single DDL statement and knows its
//! structural inverse. Operations never talk to the database themselves.

use serde::{Deserialize, Serialize};

use super::errors::ClickhouseError;
use super::model::ClickHouseColumn;
use super::queries::{
    alter_table_add_column_query, alter_table_drop_column_query, alter_table_modify_column_query,
    attach_mat_view_query, create_mat_view_query, detach_view_query, drop_mat_view_query,
};
use crate::framework::core::table_diff::ColumnChange;

type Renderer = fn(&MatViewOperation) -> Result<String, ClickhouseError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatViewOperationKind {
    Create,
    Drop,
    Attach,
    Detach,
}

impl MatViewOperationKind {
    pub const fn inverse(self) -> Self {
        match self {
            MatViewOperationKind::Create => MatViewOperationKind::Drop,
            MatViewOperationKind::Drop => MatViewOperationKind::Create,
            MatViewOperationKind::Attach => MatViewOperationKind::Detach,
            MatViewOperationKind::Detach => MatViewOperationKind::Attach,
        }
    }

    pub const fn operation_name(self) -> &'static str {
        match self {
            MatViewOperationKind::Create => "create_mat_view",
            MatViewOperationKind::Drop => "drop_mat_view",
            MatViewOperationKind::Attach => "attach_mat_view",
            MatViewOperationKind::Detach => "detach_mat_view",
        }
    }

    const fn renderer(self) -> Renderer {
        match self {
            MatViewOperationKind::Create => render_create,
            MatViewOperationKind::Drop => render_drop,
            MatViewOperationKind::Attach => render_attach,
            MatViewOperationKind::Detach => render_detach,
        }
    }
}

/// Keyword modifiers. `if_exists` renders as `IF NOT EXISTS` on create and attach.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatViewModifiers {
    #[serde(default)]
    pub if_exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_cluster: Option<String>,
    /// Only meaningful for detach
    #[serde(default)]
    pub permanently: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatViewOperation {
    pub kind: MatViewOperationKind,
    pub name: String,
    /// Defining query with literals inlined
    pub selectable: String,
    /// Engine clause text, everything after `ENGINE =`
    pub engine: String,
    pub columns: Vec<ClickHouseColumn>,
    #[serde(default)]
    pub modifiers: MatViewModifiers,
}

impl MatViewOperation {
    fn new(
        kind: MatViewOperationKind,
        name: impl Into<String>,
        selectable: impl Into<String>,
        engine: impl Into<String>,
        columns: Vec<ClickHouseColumn>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            selectable: selectable.into(),
            engine: engine.into(),
            columns,
            modifiers: MatViewModifiers::default(),
        }
    }

    pub fn create(
        name: impl Into<String>,
        selectable: impl Into<String>,
        engine: impl Into<String>,
        columns: Vec<ClickHouseColumn>,
    ) -> Self {
        Self::new(MatViewOperationKind::Create, name, selectable, engine, columns)
    }

    pub fn drop(
        name: impl Into<String>,
        selectable: impl Into<String>,
        engine: impl Into<String>,
        columns: Vec<ClickHouseColumn>,
    ) -> Self {
        Self::new(MatViewOperationKind::Drop, name, selectable, engine, columns)
    }

    pub fn attach(
        name: impl Into<String>,
        selectable: impl Into<String>,
        engine: impl Into<String>,
        columns: Vec<ClickHouseColumn>,
    ) -> Self {
        Self::new(MatViewOperationKind::Attach, name, selectable, engine, columns)
    }

    pub fn detach(
        name: impl Into<String>,
        selectable: impl Into<String>,
        engine: impl Into<String>,
        columns: Vec<ClickHouseColumn>,
    ) -> Self {
        Self::new(MatViewOperationKind::Detach, name, selectable, engine, columns)
    }

    pub fn with_modifiers(mut self, modifiers: MatViewModifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn operation_name(&self) -> &'static str {
        self.kind.operation_name()
    }

    pub fn render(&self) -> Result<String, ClickhouseError> {
        (self.kind.renderer())(self)
    }

    /// Same operation with the inverse kind; every other field is kept.
    pub fn reverse(&self) -> Self {
        Self {
            kind: self.kind.inverse(),
            ..self.clone()
        }
    }

    pub fn describe(&self) -> String {
        let action = match self.kind {
            MatViewOperationKind::Create => "Creating",
            MatViewOperationKind::Drop => "Dropping",
            MatViewOperationKind::Attach => "Attaching",
            MatViewOperationKind::Detach => "Detaching",
        };
        format!("{} materialized view {}", action, self.name)
    }
}

fn render_create(op: &MatViewOperation) -> Result<String, ClickhouseError> {
    create_mat_view_query(
        &op.name,
        &op.columns,
        &op.engine,
        &op.selectable,
        op.modifiers.if_exists,
        op.modifiers.on_cluster.as_deref(),
    )
}

fn render_attach(op: &MatViewOperation) -> Result<String, ClickhouseError> {
    attach_mat_view_query(
        &op.name,
        &op.columns,
        &op.engine,
        &op.selectable,
        op.modifiers.if_exists,
        op.modifiers.on_cluster.as_deref(),
    )
}

fn render_drop(op: &MatViewOperation) -> Result<String, ClickhouseError> {
    drop_mat_view_query(
        &op.name,
        op.modifiers.if_exists,
        op.modifiers.on_cluster.as_deref(),
    )
}

fn render_detach(op: &MatViewOperation) -> Result<String, ClickhouseError> {
    detach_view_query(
        &op.name,
        op.modifiers.if_exists,
        op.modifiers.on_cluster.as_deref(),
        op.modifiers.permanently,
    )
}

/// Column change on a physical table. For a view's inner table, `table`
/// holds the inner identity text (`.inner.<view>` or `.inner_id.<uuid>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnOperation {
    AddColumn {
        table: String,
        column: ClickHouseColumn,
        /// `None` adds the column first
        position_after: Option<String>,
        cluster_name: Option<String>,
    },
    DropColumn {
        table: String,
        column: ClickHouseColumn,
        /// Where the column goes back on reverse
        position_after: Option<String>,
        cluster_name: Option<String>,
    },
    ModifyColumn {
        table: String,
        before_column: ClickHouseColumn,
        after_column: ClickHouseColumn,
        cluster_name: Option<String>,
    },
}

impl ColumnOperation {
    pub fn from_change(table: &str, change: ColumnChange, cluster_name: Option<&str>) -> Self {
        let table = table.to_string();
        let cluster_name = cluster_name.map(str::to_string);
        match change {
            ColumnChange::Added {
                column,
                position_after,
            } => ColumnOperation::AddColumn {
                table,
                column,
                position_after,
                cluster_name,
            },
            ColumnChange::Removed {
                column,
                position_after,
            } => ColumnOperation::DropColumn {
                table,
                column,
                position_after,
                cluster_name,
            },
            ColumnChange::Updated { before, after } => ColumnOperation::ModifyColumn {
                table,
                before_column: before,
                after_column: after,
                cluster_name,
            },
        }
    }

    pub fn render(&self) -> Result<String, ClickhouseError> {
        match self {
            ColumnOperation::AddColumn {
                table,
                column,
                position_after,
                cluster_name,
            } => alter_table_add_column_query(
                table,
                column,
                position_after.as_deref(),
                cluster_name.as_deref(),
            ),
            ColumnOperation::DropColumn {
                table,
                column,
                cluster_name,
                ..
            } => alter_table_drop_column_query(table, &column.name, cluster_name.as_deref()),
            ColumnOperation::ModifyColumn {
                table,
                after_column,
                cluster_name,
                ..
            } => alter_table_modify_column_query(table, after_column, cluster_name.as_deref()),
        }
    }

    pub fn reverse(&self) -> Self {
        match self.clone() {
            ColumnOperation::AddColumn {
                table,
                column,
                position_after,
                cluster_name,
            } => ColumnOperation::DropColumn {
                table,
                column,
                position_after,
                cluster_name,
            },
            ColumnOperation::DropColumn {
                table,
                column,
                position_after,
                cluster_name,
            } => ColumnOperation::AddColumn {
                table,
                column,
                position_after,
                cluster_name,
            },
            ColumnOperation::ModifyColumn {
                table,
                before_column,
                after_column,
                cluster_name,
            } => ColumnOperation::ModifyColumn {
                table,
                before_column: after_column,
                after_column: before_column,
                cluster_name,
            },
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ColumnOperation::AddColumn { table, column, .. } => {
                format!("Adding column {} to {}", column.name, table)
            }
            ColumnOperation::DropColumn { table, column, .. } => {
                format!("Dropping column {} from {}", column.name, table)
            }
            ColumnOperation::ModifyColumn {
                table,
                after_column,
                ..
            } => format!("Modifying column {} in {}", after_column.name, table),
        }
    }
}
