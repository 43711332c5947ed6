//! # Settings
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. built-in defaults
//! 2. `mv-migrate.toml` in the working directory, if present
//! 3. environment variables prefixed with `MV_MIGRATE`, nested with `__`,
//!    e.g. `MV_MIGRATE_CLICKHOUSE__HOST=ch.internal`
//!
//! ```toml
//! [logger]
//! level = "Info"
//!
//! [clickhouse]
//! host = "localhost"
//! host_port = 8123
//! db_name = "analytics"
//! cluster = "main"
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use super::logger::LoggerSettings;
use crate::infrastructure::olap::clickhouse::config::ClickHouseConfig;

pub const CONFIG_FILE: &str = "mv-migrate.toml";
pub const ENVIRONMENT_VARIABLE_PREFIX: &str = "MV_MIGRATE";

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub logger: LoggerSettings,
    #[serde(default)]
    pub clickhouse: ClickHouseConfig,
}

pub fn read_settings() -> Result<Settings, ConfigError> {
    read_settings_from(Path::new(CONFIG_FILE))
}

pub fn read_settings_from(config_file_location: &Path) -> Result<Settings, ConfigError> {
    let s = Config::builder()
        .add_source(File::from(config_file_location).required(false))
        .add_source(
            Environment::with_prefix(ENVIRONMENT_VARIABLE_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    s.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = assert_fs::TempDir::new().unwrap();
        let settings = read_settings_from(&dir.path().join(CONFIG_FILE)).unwrap();

        assert_eq!(settings.clickhouse, ClickHouseConfig::default());
    }

    #[test]
    fn test_reads_toml_file() {
        let dir = assert_fs::TempDir::new().unwrap();
        let file = dir.child(CONFIG_FILE);
        file.write_str(
            r#"
[logger]
level = "Debug"

[clickhouse]
host = "ch.internal"
host_port = 8124
db_name = "analytics"
cluster = "main"
"#,
        )
        .unwrap();

        let settings = read_settings_from(file.path()).unwrap();
        assert_eq!(settings.clickhouse.host, "ch.internal");
        assert_eq!(settings.clickhouse.host_port, 8124);
        assert_eq!(settings.clickhouse.db_name, "analytics");
        assert_eq!(settings.clickhouse.cluster.as_deref(), Some("main"));
        assert_eq!(settings.clickhouse.user, "default");
    }
}
