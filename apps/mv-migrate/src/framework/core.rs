pub mod infrastructure;
pub mod migration_plan;
pub mod schema_file;
pub mod schema_registry;
pub mod table_diff;
