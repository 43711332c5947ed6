use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::LazyLock;

use super::errors::is_valid_clickhouse_identifier;

static ENUM_MEMBER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^'((?:[^'\\]|\\.)*)'\s*=\s*(-?\d+)$").expect("enum member regex is valid")
});

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AggregationFunction<T> {
    /// Function with its parameters, as written, e.g. `sum` or `quantiles(0.5, 0.9)`
    pub function_name: String,
    pub argument_types: Vec<T>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EnumWidth {
    Enum8,
    Enum16,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClickHouseEnum {
    pub width: EnumWidth,
    pub members: Vec<(String, i16)>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TupleField {
    pub name: Option<String>,
    pub field_type: ClickHouseColumnType,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ClickHouseColumnType {
    String,
    FixedString(u64),
    Boolean,
    ClickhouseInt(ClickHouseInt),
    ClickhouseFloat(ClickHouseFloat),
    Decimal {
        precision: u8,
        scale: u8,
    },
    DateTime {
        timezone: Option<String>,
    },
    DateTime64 {
        precision: u8,
        timezone: Option<String>,
    },
    Date,
    Date32,
    Uuid,
    IpV4,
    IpV6,
    Json,
    Array(Box<ClickHouseColumnType>),
    Nullable(Box<ClickHouseColumnType>),
    LowCardinality(Box<ClickHouseColumnType>),
    Map(Box<ClickHouseColumnType>, Box<ClickHouseColumnType>),
    Tuple(Vec<TupleField>),
    Enum(ClickHouseEnum),
    AggregateFunction(AggregationFunction<ClickHouseColumnType>),
    SimpleAggregateFunction {
        function_name: String,
        argument_type: Box<ClickHouseColumnType>,
    },
}

/// Returns the content between `wrapper(` and the final `)`.
fn unwrap_type<'a>(t: &'a str, wrapper: &str) -> Option<&'a str> {
    t.strip_prefix(wrapper)?
        .strip_prefix('(')?
        .strip_suffix(')')
        .map(str::trim)
}

/// Splits on commas that are not nested in parentheses or quoted.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quote = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        if in_quote {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '\'' => in_quote = false,
                _ => {}
            }
            continue;
        }
        match c {
            '\'' => in_quote = true,
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = s[start..].trim();
    if !last.is_empty() || !parts.is_empty() {
        parts.push(last);
    }
    parts
}

fn unquote(s: &str) -> Option<String> {
    s.trim()
        .strip_prefix('\'')?
        .strip_suffix('\'')
        .map(|inner| inner.replace("\\'", "'"))
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

impl ClickHouseColumnType {
    /// Parses a type as reported by `system.columns.type`.
    pub fn from_type_str(type_str: &str) -> Option<Self> {
        let t = type_str.trim();
        let simple = match t {
            "String" => Some(Self::String),
            "Bool" | "Boolean" => Some(Self::Boolean),
            "Int8" => Some(Self::ClickhouseInt(ClickHouseInt::Int8)),
            "Int16" => Some(Self::ClickhouseInt(ClickHouseInt::Int16)),
            "Int32" => Some(Self::ClickhouseInt(ClickHouseInt::Int32)),
            "Int64" => Some(Self::ClickhouseInt(ClickHouseInt::Int64)),
            "Int128" => Some(Self::ClickhouseInt(ClickHouseInt::Int128)),
            "Int256" => Some(Self::ClickhouseInt(ClickHouseInt::Int256)),
            "UInt8" => Some(Self::ClickhouseInt(ClickHouseInt::UInt8)),
            "UInt16" => Some(Self::ClickhouseInt(ClickHouseInt::UInt16)),
            "UInt32" => Some(Self::ClickhouseInt(ClickHouseInt::UInt32)),
            "UInt64" => Some(Self::ClickhouseInt(ClickHouseInt::UInt64)),
            "UInt128" => Some(Self::ClickhouseInt(ClickHouseInt::UInt128)),
            "UInt256" => Some(Self::ClickhouseInt(ClickHouseInt::UInt256)),
            "Float32" => Some(Self::ClickhouseFloat(ClickHouseFloat::Float32)),
            "Float64" => Some(Self::ClickhouseFloat(ClickHouseFloat::Float64)),
            "Date" => Some(Self::Date),
            "Date32" => Some(Self::Date32),
            "DateTime" => Some(Self::DateTime { timezone: None }),
            "UUID" => Some(Self::Uuid),
            "IPv4" => Some(Self::IpV4),
            "IPv6" => Some(Self::IpV6),
            "JSON" => Some(Self::Json),
            _ => None,
        };
        if simple.is_some() {
            return simple;
        }

        if let Some(inner) = unwrap_type(t, "Nullable") {
            return Some(Self::Nullable(Box::new(Self::from_type_str(inner)?)));
        }
        if let Some(inner) = unwrap_type(t, "Array") {
            return Some(Self::Array(Box::new(Self::from_type_str(inner)?)));
        }
        if let Some(inner) = unwrap_type(t, "LowCardinality") {
            return Some(Self::LowCardinality(Box::new(Self::from_type_str(inner)?)));
        }
        if let Some(inner) = unwrap_type(t, "FixedString") {
            return inner.parse().ok().map(Self::FixedString);
        }
        if let Some(inner) = unwrap_type(t, "DateTime64") {
            let parts = split_top_level(inner);
            let precision = parts.first()?.parse().ok()?;
            let timezone = match parts.get(1) {
                Some(tz) => Some(unquote(tz)?),
                None => None,
            };
            return Some(Self::DateTime64 {
                precision,
                timezone,
            });
        }
        if let Some(inner) = unwrap_type(t, "DateTime") {
            return Some(Self::DateTime {
                timezone: Some(unquote(inner)?),
            });
        }
        if let Some(inner) = unwrap_type(t, "Decimal") {
            let parts = split_top_level(inner);
            let precision = parts.first()?.parse().ok()?;
            let scale = match parts.get(1) {
                Some(s) => s.parse().ok()?,
                None => 0,
            };
            return Some(Self::Decimal { precision, scale });
        }
        if let Some(inner) = unwrap_type(t, "Map") {
            let parts = split_top_level(inner);
            if parts.len() != 2 {
                return None;
            }
            return Some(Self::Map(
                Box::new(Self::from_type_str(parts[0])?),
                Box::new(Self::from_type_str(parts[1])?),
            ));
        }
        if let Some(inner) = unwrap_type(t, "Tuple") {
            let fields = split_top_level(inner)
                .into_iter()
                .map(parse_tuple_field)
                .collect::<Option<Vec<_>>>()?;
            return Some(Self::Tuple(fields));
        }
        for (prefix, width) in [("Enum8", EnumWidth::Enum8), ("Enum16", EnumWidth::Enum16)] {
            if let Some(inner) = unwrap_type(t, prefix) {
                let members = split_top_level(inner)
                    .into_iter()
                    .map(|member| {
                        let caps = ENUM_MEMBER_REGEX.captures(member)?;
                        let name = caps[1].replace("\\'", "'");
                        let value = caps[2].parse::<i16>().ok()?;
                        Some((name, value))
                    })
                    .collect::<Option<Vec<_>>>()?;
                return Some(Self::Enum(ClickHouseEnum { width, members }));
            }
        }
        if let Some(inner) = unwrap_type(t, "SimpleAggregateFunction") {
            let parts = split_top_level(inner);
            if parts.len() != 2 {
                return None;
            }
            return Some(Self::SimpleAggregateFunction {
                function_name: parts[0].to_string(),
                argument_type: Box::new(Self::from_type_str(parts[1])?),
            });
        }
        if let Some(inner) = unwrap_type(t, "AggregateFunction") {
            let parts = split_top_level(inner);
            let (function_name, arguments) = parts.split_first()?;
            let argument_types = arguments
                .iter()
                .map(|a| Self::from_type_str(a))
                .collect::<Option<Vec<_>>>()?;
            return Some(Self::AggregateFunction(AggregationFunction {
                function_name: function_name.to_string(),
                argument_types,
            }));
        }

        None
    }

}

fn parse_tuple_field(part: &str) -> Option<TupleField> {
    if let Some((name, rest)) = part.split_once(' ') {
        if is_valid_clickhouse_identifier(name) {
            if let Some(field_type) = ClickHouseColumnType::from_type_str(rest) {
                return Some(TupleField {
                    name: Some(name.to_string()),
                    field_type,
                });
            }
        }
    }
    ClickHouseColumnType::from_type_str(part).map(|field_type| TupleField {
        name: None,
        field_type,
    })
}

/// Renders the type the way the server spells it in `system.columns`.
impl fmt::Display for ClickHouseColumnType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::String => write!(f, "String"),
            Self::FixedString(n) => write!(f, "FixedString({n})"),
            Self::Boolean => write!(f, "Bool"),
            Self::ClickhouseInt(int) => write!(f, "{int}"),
            Self::ClickhouseFloat(float) => write!(f, "{float}"),
            Self::Decimal { precision, scale } => write!(f, "Decimal({precision}, {scale})"),
            Self::DateTime { timezone: None } => write!(f, "DateTime"),
            Self::DateTime { timezone: Some(tz) } => write!(f, "DateTime({})", quote(tz)),
            Self::DateTime64 {
                precision,
                timezone: None,
            } => write!(f, "DateTime64({precision})"),
            Self::DateTime64 {
                precision,
                timezone: Some(tz),
            } => write!(f, "DateTime64({precision}, {})", quote(tz)),
            Self::Date => write!(f, "Date"),
            Self::Date32 => write!(f, "Date32"),
            Self::Uuid => write!(f, "UUID"),
            Self::IpV4 => write!(f, "IPv4"),
            Self::IpV6 => write!(f, "IPv6"),
            Self::Json => write!(f, "JSON"),
            Self::Array(inner) => write!(f, "Array({inner})"),
            Self::Nullable(inner) => write!(f, "Nullable({inner})"),
            Self::LowCardinality(inner) => write!(f, "LowCardinality({inner})"),
            Self::Map(key, value) => write!(f, "Map({key}, {value})"),
            Self::Tuple(fields) => {
                let fields = fields
                    .iter()
                    .map(|field| match &field.name {
                        Some(name) => format!("{name} {}", field.field_type),
                        None => field.field_type.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "Tuple({fields})")
            }
            Self::Enum(e) => {
                let members = e
                    .members
                    .iter()
                    .map(|(name, value)| format!("{} = {value}", quote(name)))
                    .collect::<Vec<_>>()
                    .join(", ");
                let prefix = match e.width {
                    EnumWidth::Enum8 => "Enum8",
                    EnumWidth::Enum16 => "Enum16",
                };
                write!(f, "{prefix}({members})")
            }
            Self::AggregateFunction(AggregationFunction {
                function_name,
                argument_types,
            }) => {
                write!(f, "AggregateFunction({function_name}")?;
                for arg in argument_types {
                    write!(f, ", {arg}")?;
                }
                write!(f, ")")
            }
            Self::SimpleAggregateFunction {
                function_name,
                argument_type,
            } => write!(f, "SimpleAggregateFunction({function_name}, {argument_type})"),
        }
    }
}

impl Serialize for ClickHouseColumnType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClickHouseColumnType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let type_str = String::deserialize(deserializer)?;
        ClickHouseColumnType::from_type_str(&type_str).ok_or_else(|| {
            serde::de::Error::custom(format!("unsupported ClickHouse type: {type_str}"))
        })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ClickHouseInt {
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    Int256,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    UInt128,
    UInt256,
}

impl fmt::Display for ClickHouseInt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ClickHouseFloat {
    Float32,
    Float64,
}

impl fmt::Display for ClickHouseFloat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// How a column's expression is applied, as in `system.columns.default_kind`
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum ColumnDefaultKind {
    #[default]
    #[serde(alias = "DEFAULT")]
    Default,
    #[serde(alias = "MATERIALIZED")]
    Materialized,
    #[serde(alias = "ALIAS")]
    Alias,
    #[serde(alias = "EPHEMERAL")]
    Ephemeral,
}

impl ColumnDefaultKind {
    /// Parses a non-empty `default_kind` value
    pub fn from_catalog(kind: &str) -> Option<Self> {
        match kind {
            "DEFAULT" => Some(Self::Default),
            "MATERIALIZED" => Some(Self::Materialized),
            "ALIAS" => Some(Self::Alias),
            "EPHEMERAL" => Some(Self::Ephemeral),
            _ => None,
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Self::Default
    }
}

impl fmt::Display for ColumnDefaultKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Default => write!(f, "DEFAULT"),
            Self::Materialized => write!(f, "MATERIALIZED"),
            Self::Alias => write!(f, "ALIAS"),
            Self::Ephemeral => write!(f, "EPHEMERAL"),
        }
    }
}

// ClickHouse column defaults are expressed as raw SQL strings

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClickHouseColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ClickHouseColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Applies to `default`. An `Ephemeral` column may have no expression.
    #[serde(default, skip_serializing_if = "ColumnDefaultKind::is_default")]
    pub default_kind: ColumnDefaultKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ClickHouseColumn {
    pub fn new(name: impl Into<String>, column_type: ClickHouseColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            default: None,
            default_kind: ColumnDefaultKind::Default,
            comment: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_default_kind(mut self, default_kind: ColumnDefaultKind) -> Self {
        self.default_kind = default_kind;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, clickhouse::Row)]
pub struct SystemTableNameRow {
    pub name: String,
}

/// Row of `SELECT name, as_select, engine_full FROM system.tables`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, clickhouse::Row)]
pub struct ViewDefinitionRow {
    pub name: String,
    pub as_select: String,
    pub engine_full: String,
}

/// Row of `system.columns` for a single table, in `position` order
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, clickhouse::Row)]
pub struct SystemColumnRow {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub default_kind: String,
    pub default_expression: String,
    pub comment: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, clickhouse::Row)]
pub struct SystemTableUuidRow {
    #[serde(with = "clickhouse::serde::uuid")]
    pub uuid: uuid::Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(t: &str) -> ClickHouseColumnType {
        ClickHouseColumnType::from_type_str(t)
            .unwrap_or_else(|| panic!("failed to parse type {t}"))
    }

    #[test]
    fn test_parse_simple_types() {
        assert_eq!(parse("String"), ClickHouseColumnType::String);
        assert_eq!(
            parse("UInt64"),
            ClickHouseColumnType::ClickhouseInt(ClickHouseInt::UInt64)
        );
        assert_eq!(parse("Bool"), ClickHouseColumnType::Boolean);
        assert_eq!(
            parse("DateTime"),
            ClickHouseColumnType::DateTime { timezone: None }
        );
    }

    #[test]
    fn test_parse_nested_wrappers() {
        assert_eq!(
            parse("LowCardinality(Nullable(String))"),
            ClickHouseColumnType::LowCardinality(Box::new(ClickHouseColumnType::Nullable(
                Box::new(ClickHouseColumnType::String)
            )))
        );
        assert_eq!(
            parse("Map(String, Array(UInt8))"),
            ClickHouseColumnType::Map(
                Box::new(ClickHouseColumnType::String),
                Box::new(ClickHouseColumnType::Array(Box::new(
                    ClickHouseColumnType::ClickhouseInt(ClickHouseInt::UInt8)
                )))
            )
        );
    }

    #[test]
    fn test_parse_datetime_with_timezone() {
        assert_eq!(
            parse("DateTime64(3, 'UTC')"),
            ClickHouseColumnType::DateTime64 {
                precision: 3,
                timezone: Some("UTC".to_string())
            }
        );
        assert_eq!(
            parse("DateTime('Europe/Paris')").to_string(),
            "DateTime('Europe/Paris')"
        );
    }

    #[test]
    fn test_parse_enum_with_commas_in_names() {
        let t = parse("Enum8('a, b' = 1, 'c' = -2)");
        match &t {
            ClickHouseColumnType::Enum(e) => {
                assert_eq!(e.width, EnumWidth::Enum8);
                assert_eq!(
                    e.members,
                    vec![("a, b".to_string(), 1), ("c".to_string(), -2)]
                );
            }
            other => panic!("unexpected type {other:?}"),
        }
        assert_eq!(t.to_string(), "Enum8('a, b' = 1, 'c' = -2)");
    }

    #[test]
    fn test_parse_aggregate_functions() {
        let t = parse("AggregateFunction(quantiles(0.5, 0.9), UInt64)");
        match &t {
            ClickHouseColumnType::AggregateFunction(agg) => {
                assert_eq!(agg.function_name, "quantiles(0.5, 0.9)");
                assert_eq!(
                    agg.argument_types,
                    vec![ClickHouseColumnType::ClickhouseInt(ClickHouseInt::UInt64)]
                );
            }
            other => panic!("unexpected type {other:?}"),
        }
        assert_eq!(
            parse("SimpleAggregateFunction(sum, Float64)").to_string(),
            "SimpleAggregateFunction(sum, Float64)"
        );
    }

    #[test]
    fn test_parse_tuples() {
        assert_eq!(
            parse("Tuple(a String, b Nullable(UInt8))").to_string(),
            "Tuple(a String, b Nullable(UInt8))"
        );
        assert_eq!(
            parse("Tuple(String, UInt8)").to_string(),
            "Tuple(String, UInt8)"
        );
    }

    #[test]
    fn test_unknown_types_are_rejected() {
        assert!(ClickHouseColumnType::from_type_str("Polygon").is_none());
        assert!(ClickHouseColumnType::from_type_str("Nullable(Nope)").is_none());
        assert!(ClickHouseColumnType::from_type_str("Map(String)").is_none());
    }

    #[test]
    fn test_column_serde_uses_type_strings() {
        let column = ClickHouseColumn::new(
            "amount",
            ClickHouseColumnType::Decimal {
                precision: 18,
                scale: 4,
            },
        )
        .with_default("0");
        let json = serde_json::to_value(&column).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "amount", "type": "Decimal(18, 4)", "default": "0"})
        );
        let back: ClickHouseColumn = serde_json::from_value(json).unwrap();
        assert_eq!(back, column);
    }

    #[test]
    fn test_column_default_kind_serde() {
        let column: ClickHouseColumn = serde_json::from_value(
            serde_json::json!({"name": "b", "type": "UInt16", "default": "a * 2", "default_kind": "ALIAS"}),
        )
        .unwrap();
        assert_eq!(column.default_kind, ColumnDefaultKind::Alias);
        assert_eq!(
            serde_json::to_value(&column).unwrap()["default_kind"],
            "Alias"
        );

        assert_eq!(
            ColumnDefaultKind::from_catalog("MATERIALIZED"),
            Some(ColumnDefaultKind::Materialized)
        );
        assert_eq!(ColumnDefaultKind::from_catalog("STORED"), None);
    }
}
