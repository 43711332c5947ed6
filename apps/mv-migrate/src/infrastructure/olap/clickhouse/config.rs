//! # Clickhouse Config
//! Connection settings for the ClickHouse HTTP interface.

use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_DATABASE_NAME: &str = "default";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ClickHouseConfig {
    pub db_name: String,
    pub user: String,
    pub password: String,
    pub use_ssl: bool,
    pub host: String,
    /// HTTP port, e.g. 8123
    pub host_port: u16,
    /// Cluster used for `ON CLUSTER` when set
    pub cluster: Option<String>,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            db_name: DEFAULT_DATABASE_NAME.to_string(),
            user: "default".to_string(),
            password: String::new(),
            use_ssl: false,
            host: "localhost".to_string(),
            host_port: 8123,
            cluster: None,
        }
    }
}

impl ClickHouseConfig {
    pub fn url(&self) -> String {
        let protocol = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}:{}", protocol, self.host, self.host_port)
    }

    /// Returns a display-safe connection URL with the password masked.
    pub fn display_url(&self) -> String {
        let protocol = if self.use_ssl { "https" } else { "http" };
        if self.password.is_empty() {
            format!(
                "{}://{}@{}:{}/?database={}",
                protocol, self.user, self.host, self.host_port, self.db_name
            )
        } else {
            format!(
                "{}://{}:******@{}:{}/?database={}",
                protocol, self.user, self.host, self.host_port, self.db_name
            )
        }
    }
}

/// Result of parsing a ClickHouse connection string, including conversion metadata
#[derive(Debug, Clone)]
pub struct ParsedConnectionString {
    pub config: ClickHouseConfig,
    pub was_native_protocol: bool,
    pub database_was_explicit: bool,
}

/// Parses a ClickHouse connection string (URL) into a ClickHouseConfig
///
/// Supports http, https and clickhouse schemes and extracts the database name from the path or
/// the `database` query parameter. Native `clickhouse://` URLs are mapped to the HTTP interface
/// on the matching default port. Username and password are percent-decoded.
pub fn parse_clickhouse_connection_string(conn_str: &str) -> anyhow::Result<ClickHouseConfig> {
    parse_clickhouse_connection_string_with_metadata(conn_str).map(|parsed| parsed.config)
}

pub fn parse_clickhouse_connection_string_with_metadata(
    conn_str: &str,
) -> anyhow::Result<ParsedConnectionString> {
    let url = Url::parse(conn_str)?;
    let was_native_protocol = url.scheme() == "clickhouse";

    let user = percent_encoding::percent_decode_str(url.username())
        .decode_utf8_lossy()
        .to_string();
    let password = url
        .password()
        .map(|p| {
            percent_encoding::percent_decode_str(p)
                .decode_utf8_lossy()
                .to_string()
        })
        .unwrap_or_default();
    let host = url.host_str().unwrap_or("localhost").to_string();

    let (use_ssl, host_port) = match url.scheme() {
        "https" => (true, url.port().unwrap_or(443)),
        "http" => (false, url.port().unwrap_or(80)),
        "clickhouse" => {
            let secure = url.port().unwrap_or(9000) == 9440;
            (secure, if secure { 8443 } else { 8123 })
        }
        other => anyhow::bail!("Unsupported ClickHouse URL scheme '{other}'"),
    };

    let query_param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.to_string())
            .filter(|v| !v.is_empty())
    };

    let user = if user.is_empty() {
        query_param("user").unwrap_or_else(|| "default".to_string())
    } else {
        user
    };

    let path = url.path().trim_matches('/');
    let (db_name, database_was_explicit) = if !path.is_empty() {
        (path.to_string(), true)
    } else {
        match query_param("database") {
            Some(db) => (db, true),
            None => (DEFAULT_DATABASE_NAME.to_string(), false),
        }
    };

    Ok(ParsedConnectionString {
        config: ClickHouseConfig {
            db_name,
            user,
            password,
            use_ssl,
            host,
            host_port,
            cluster: query_param("cluster"),
        },
        was_native_protocol,
        database_was_explicit,
    })
}
