mod commands;
pub mod logger;
pub mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use commands::Commands;
use std::path::Path;
use tracing::info;

use crate::framework::core::migration_plan::MigrationPlan;
use crate::framework::core::schema_file::load_schema;
use crate::infrastructure::olap;
use crate::infrastructure::olap::clickhouse::config::{
    parse_clickhouse_connection_string_with_metadata, ClickHouseConfig,
};
use crate::infrastructure::olap::clickhouse::create_client;
use crate::infrastructure::olap::clickhouse::mv_diff::compare_mat_views;
use settings::Settings;

#[derive(Parser)]
#[command(name = "mv-migrate", author, version, about, long_about = None, arg_required_else_help(true))]
pub struct Cli {
    /// Turn debugging information on
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Connection settings, with `--clickhouse-url` taking precedence over the settings file.
/// A cluster configured in the settings is kept unless the URL names its own.
fn resolve_clickhouse_config(
    settings: &Settings,
    clickhouse_url: Option<&str>,
) -> Result<ClickHouseConfig> {
    let Some(url) = clickhouse_url else {
        return Ok(settings.clickhouse.clone());
    };

    let parsed = parse_clickhouse_connection_string_with_metadata(url)
        .context("Invalid ClickHouse connection URL")?;
    if parsed.was_native_protocol {
        info!("Native protocol URL converted to the HTTP interface");
    }

    let mut config = parsed.config;
    if config.cluster.is_none() {
        config.cluster = settings.clickhouse.cluster.clone();
    }
    Ok(config)
}

fn print_statements(statements: &[String]) {
    for statement in statements {
        println!("{statement};");
    }
}

fn load_plan(path: &Path) -> Result<MigrationPlan> {
    MigrationPlan::load(path)
        .with_context(|| format!("Failed to load migration plan from {}", path.display()))
}

pub async fn top_command_handler(settings: Settings, commands: &Commands) -> Result<()> {
    match commands {
        Commands::Plan {
            schema,
            clickhouse_url,
            save,
        } => {
            let registry = load_schema(schema)
                .with_context(|| format!("Failed to load schema from {}", schema.display()))?;
            let config = resolve_clickhouse_config(&settings, clickhouse_url.as_deref())?;
            info!("Comparing {} with {}", schema.display(), config.display_url());

            let client = create_client(config.clone());
            let mut operations = Vec::new();
            compare_mat_views(
                &client,
                &registry,
                config.cluster.as_deref(),
                &mut operations,
            )
            .await
            .context("Failed to compare materialized views")?;

            let plan = MigrationPlan::new(operations);
            if plan.is_empty() {
                eprintln!("Materialized views are up to date");
            } else {
                print_statements(&plan.upgrade_sql()?);
            }

            if let Some(path) = save {
                plan.save(path).with_context(|| {
                    format!("Failed to write migration plan to {}", path.display())
                })?;
                info!(
                    "Saved plan with {} operations to {}",
                    plan.total_operations(),
                    path.display()
                );
            }
            Ok(())
        }
        Commands::Sql { plan, downgrade } => {
            let plan = load_plan(plan)?;
            let statements = if *downgrade {
                plan.downgrade_sql()?
            } else {
                plan.upgrade_sql()?
            };
            print_statements(&statements);
            Ok(())
        }
        Commands::Migrate {
            plan,
            clickhouse_url,
        } => {
            let plan = load_plan(plan)?;
            let config = resolve_clickhouse_config(&settings, clickhouse_url.as_deref())?;
            olap::execute_changes(&config, &plan.operations)
                .await
                .context("Migration failed")?;
            eprintln!("Applied {} operations", plan.total_operations());
            Ok(())
        }
        Commands::Rollback {
            plan,
            clickhouse_url,
        } => {
            let plan = load_plan(plan)?;
            let config = resolve_clickhouse_config(&settings, clickhouse_url.as_deref())?;
            olap::execute_changes(&config, &plan.downgrade())
                .await
                .context("Rollback failed")?;
            eprintln!("Reverted {} operations", plan.total_operations());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_plan_command() {
        let cli = Cli::try_parse_from([
            "mv-migrate",
            "plan",
            "--schema",
            "views.yaml",
            "--clickhouse-url",
            "http://localhost:8123/db",
        ])
        .unwrap();

        match cli.command {
            Commands::Plan {
                schema,
                clickhouse_url,
                save,
            } => {
                assert_eq!(schema, Path::new("views.yaml"));
                assert_eq!(clickhouse_url.as_deref(), Some("http://localhost:8123/db"));
                assert!(save.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_url_overrides_settings_but_keeps_cluster() {
        let settings = Settings {
            clickhouse: ClickHouseConfig {
                cluster: Some("main".to_string()),
                ..ClickHouseConfig::default()
            },
            ..Settings::default()
        };

        let config =
            resolve_clickhouse_config(&settings, Some("https://u:p@remote:8443/analytics"))
                .unwrap();
        assert_eq!(config.host, "remote");
        assert_eq!(config.db_name, "analytics");
        assert_eq!(config.cluster.as_deref(), Some("main"));

        let config = resolve_clickhouse_config(&settings, None).unwrap();
        assert_eq!(config, settings.clickhouse);
    }
}
