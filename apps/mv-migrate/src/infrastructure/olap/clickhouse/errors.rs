#[derive(Debug, thiserror::Error)]
#[error("failed interact with clickhouse")]
#[non_exhaustive]
pub enum ClickhouseError {
    #[error("Clickhouse - Invalid parameters: {message}")]
    InvalidParameters {
        message: String,
    },
    #[error("Clickhouse - Invalid {identifier_type}: '{name}' - {reason}")]
    InvalidIdentifier {
        identifier_type: String,
        name: String,
        reason: String,
    },
    QueryRender(#[from] handlebars::RenderError),
}

/// Checks if a string is a valid ClickHouse identifier.
///
/// ClickHouse identifiers (view names, column names, cluster names, etc.) must:
/// - Be non-empty
/// - Contain only alphanumeric characters and underscores
/// - Not start with a digit
///
/// Inner table names (`.inner.<view>`, `.inner_id.<uuid>`) are generated by the
/// server and deliberately fail this check; they are always backtick-quoted instead.
pub fn is_valid_clickhouse_identifier(name: &str) -> bool {
    match name.chars().next() {
        Some(first) => {
            !first.is_ascii_digit() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

/// Validates that a string is a valid ClickHouse identifier, returning a typed error on failure.
pub fn validate_clickhouse_identifier(
    name: &str,
    identifier_type: &str,
) -> Result<(), ClickhouseError> {
    if is_valid_clickhouse_identifier(name) {
        return Ok(());
    }

    let reason = match name.chars().next() {
        None => "cannot be empty",
        Some(c) if c.is_ascii_digit() => "cannot start with a digit",
        Some(_) => "contains invalid characters (only alphanumeric and underscore allowed)",
    };

    Err(ClickhouseError::InvalidIdentifier {
        identifier_type: identifier_type.to_string(),
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

/// Wraps a name in backticks, escaping embedded backticks and backslashes.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}
