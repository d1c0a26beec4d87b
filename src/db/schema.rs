//! Catalog introspection and native type normalization.

use crate::db::result::ResultSet;
use crate::db::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lists every table visible to the connected database.
pub const SOURCES_QUERY: &str = "SELECT TABLE_NAME FROM [INFORMATION_SCHEMA].[TABLES]";

/// Native length the catalog reports for `(max)` columns.
pub const UNBOUNDED_LENGTH: i64 = -1;

/// Column schemas of one table, in catalog order.
pub type Schema = IndexMap<String, ColumnSchema>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbstractType {
    String,
    Text,
    Integer,
    Float,
    DateTime,
    Timestamp,
    Time,
    Date,
    Binary,
    Boolean,
}

impl AbstractType {
    pub const ALL: [AbstractType; 10] = [
        AbstractType::String,
        AbstractType::Text,
        AbstractType::Integer,
        AbstractType::Float,
        AbstractType::DateTime,
        AbstractType::Timestamp,
        AbstractType::Time,
        AbstractType::Date,
        AbstractType::Binary,
        AbstractType::Boolean,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AbstractType::String => "string",
            AbstractType::Text => "text",
            AbstractType::Integer => "integer",
            AbstractType::Float => "float",
            AbstractType::DateTime => "datetime",
            AbstractType::Timestamp => "timestamp",
            AbstractType::Time => "time",
            AbstractType::Date => "date",
            AbstractType::Binary => "binary",
            AbstractType::Boolean => "boolean",
        }
    }

    /// Native column definition used when rendering `CREATE TABLE`.
    pub fn native_definition(&self) -> (&'static str, Option<Length>) {
        match self {
            AbstractType::String => ("varchar", Some(Length::Size(255))),
            AbstractType::Text => ("varchar", Some(Length::Max)),
            AbstractType::Integer => ("integer", None),
            AbstractType::Float => ("float", None),
            AbstractType::DateTime => ("datetime", None),
            AbstractType::Timestamp => ("timestamp", None),
            AbstractType::Time | AbstractType::Date => ("datetime", None),
            AbstractType::Binary => ("varbinary", Some(Length::Max)),
            AbstractType::Boolean => ("bit", None),
        }
    }

    /// chrono format used when writing values of this type as literals.
    pub fn value_format(&self) -> Option<&'static str> {
        match self {
            AbstractType::DateTime => Some("%Y-%m-%d %H:%M:%S%.3f"),
            AbstractType::Timestamp => Some("%Y-%m-%d %H:%M:%S"),
            AbstractType::Time => Some("%H:%M:%S"),
            AbstractType::Date => Some("%Y-%m-%d"),
            _ => None,
        }
    }
}

impl fmt::Display for AbstractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared column length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Length {
    Size(u32),
    Max,
}

impl Length {
    /// Parse a declared length, normalizing the unbounded sentinel to `max`.
    pub fn parse(raw: &str) -> Option<Length> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("max") {
            return Some(Length::Max);
        }
        match raw.parse::<i64>().ok()? {
            UNBOUNDED_LENGTH => Some(Length::Max),
            n => u32::try_from(n).ok().map(Length::Size),
        }
    }

    fn from_value(value: &Value) -> Option<Length> {
        match value {
            Value::Int(UNBOUNDED_LENGTH) => Some(Length::Max),
            Value::Int(n) => u32::try_from(*n).ok().map(Length::Size),
            Value::Text(s) => Length::parse(s),
            _ => None,
        }
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Length::Size(n) => write!(f, "{}", n),
            Length::Max => f.write_str("max"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// Identity column, assigned by the server on insert.
    Primary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: AbstractType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<Length>,
    #[serde(rename = "null")]
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<KeyKind>,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: AbstractType) -> Self {
        Self {
            name: name.into(),
            column_type,
            length: None,
            nullable: true,
            default: None,
            key: None,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.key == Some(KeyKind::Primary)
    }
}

/// A native type string split into name and declared length, e.g. `varchar(255)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeType {
    pub name: String,
    pub length: Option<String>,
}

impl NativeType {
    pub fn parse(raw: &str) -> NativeType {
        let raw = raw.trim();
        match raw.split_once('(') {
            Some((name, rest)) => {
                let length = rest.split(')').next().unwrap_or_default().trim();
                NativeType {
                    name: name.trim().to_ascii_lowercase(),
                    length: (!length.is_empty()).then(|| length.to_string()),
                }
            }
            None => NativeType {
                name: raw.to_ascii_lowercase(),
                length: None,
            },
        }
    }
}

/// Render a native type with its length, `-1` rendering as `max`.
pub fn render_native_type(name: &str, length: Option<i64>) -> String {
    match length {
        Some(UNBOUNDED_LENGTH) => format!("{}(max)", name),
        Some(n) => format!("{}({})", name, n),
        None => name.to_string(),
    }
}

/// Map a native type to its abstract type. Total: unknown types become `text`.
///
/// `declared` is the declared length; when absent, a length embedded in `native`
/// (`tinyint(1)`) is used. The returned length is kept only where it carries
/// meaning for the abstract type.
pub fn map_type(native: &str, declared: Option<&str>) -> (AbstractType, Option<Length>) {
    let parsed = NativeType::parse(native);
    let name = parsed.name.as_str();
    let length = declared
        .map(str::to_string)
        .or(parsed.length)
        .and_then(|l| Length::parse(&l));

    if name == "datetime" {
        return (AbstractType::DateTime, None);
    }
    if name == "bit" || (name == "tinyint" && length == Some(Length::Size(1))) {
        return (AbstractType::Boolean, None);
    }
    if name.contains("int") {
        return (AbstractType::Integer, None);
    }
    if name.contains("text") {
        return (AbstractType::Text, None);
    }
    if name.contains("char") {
        return match length {
            Some(Length::Max) => (AbstractType::Text, None),
            other => (AbstractType::String, other),
        };
    }
    if name.contains("binary") || name == "image" {
        return (AbstractType::Binary, length);
    }
    if ["float", "double", "decimal"].iter().any(|t| name.contains(t)) {
        return (AbstractType::Float, None);
    }
    (AbstractType::Text, None)
}

/// Split `schema.table` (brackets allowed) into its schema and table parts.
/// Database prefixes of three-part names are dropped.
pub fn split_table_name(table: &str) -> (Option<&str>, &str) {
    fn unquote(part: &str) -> &str {
        let part = part.trim();
        part.strip_prefix('[')
            .and_then(|p| p.strip_suffix(']'))
            .unwrap_or(part)
    }
    match table.rsplit_once('.') {
        Some((qualifier, name)) => {
            let schema = qualifier.rsplit('.').next().map(unquote);
            (schema.filter(|s| !s.is_empty()), unquote(name))
        }
        None => (None, unquote(table)),
    }
}

/// Catalog query describing the columns of `table`, which may be
/// schema-qualified. Lengths are declared lengths in characters.
pub fn describe_query(table: &str) -> String {
    let escape = |s: &str| s.replace('\'', "''");
    let object = escape(table);
    let (schema, name) = split_table_name(table);
    let mut filter = format!("TABLE_NAME = '{}'", escape(name));
    if let Some(schema) = schema {
        filter.push_str(&format!(" AND TABLE_SCHEMA = '{}'", escape(schema)));
    }
    format!(
        "SELECT COLUMN_NAME AS [Field], DATA_TYPE AS [Type], \
         CHARACTER_MAXIMUM_LENGTH AS [Length], IS_NULLABLE AS [Null], \
         COLUMN_DEFAULT AS [Default], \
         COLUMNPROPERTY(OBJECT_ID('{object}'), COLUMN_NAME, 'IsIdentity') AS [Key] \
         FROM INFORMATION_SCHEMA.COLUMNS WHERE {filter} \
         ORDER BY ORDINAL_POSITION"
    )
}

/// Decode the rows of [`describe_query`] into a schema. Closes the result.
pub fn decode_schema(result: &mut ResultSet) -> Schema {
    let mut schema = Schema::new();

    for row in result.by_ref() {
        let Some(name) = row.get("Field").map(Value::display) else {
            continue;
        };
        let native = row.get("Type").map(Value::display).unwrap_or_default();
        let length = row.get("Length").and_then(Length::from_value);

        // Only character and binary lengths are declared lengths.
        let declared = (native.contains("char") || native.contains("binary"))
            .then(|| length.map(|l| l.to_string()))
            .flatten();
        let (column_type, length) = map_type(&native, declared.as_deref());

        let nullable = row
            .get("Null")
            .and_then(Value::as_str)
            .is_some_and(|n| n.eq_ignore_ascii_case("YES"));
        let default = row.get("Default").filter(|v| !v.is_null()).map(Value::display);
        let key = row
            .get("Key")
            .and_then(Value::as_i64)
            .filter(|k| *k == 1)
            .map(|_| KeyKind::Primary);

        schema.insert(
            name.clone(),
            ColumnSchema {
                name,
                column_type,
                length,
                nullable,
                default,
                key,
            },
        );
    }

    result.close();
    schema
}

/// The identity column of a schema, if any.
pub fn identity_column(schema: &Schema) -> Option<&ColumnSchema> {
    schema.values().find(|c| c.is_identity())
}
