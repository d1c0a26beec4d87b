//! Abstract query model and its lowering to statement descriptors.

use super::descriptor::{Page, QueryDescriptor, Slot, StatementKind};
use super::literal::literal;
use super::renderer::quote_name;
use crate::db::{ColumnSchema, Schema, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Asc => write!(f, "ASC"),
            Direction::Desc => write!(f, "DESC"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinKind::Inner => write!(f, "INNER"),
            JoinKind::Left => write!(f, "LEFT"),
            JoinKind::Right => write!(f, "RIGHT"),
            JoinKind::Full => write!(f, "FULL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `[field] = literal`, or `IS NULL` for nulls.
    Equals(String, Value),
    /// Pre-rendered SQL, used as is.
    Raw(String),
}

impl Condition {
    fn render(&self, schema: Option<&Schema>) -> String {
        match self {
            Condition::Equals(field, Value::Null) => format!("{} IS NULL", quote_name(field)),
            Condition::Equals(field, value) => {
                format!("{} = {}", quote_name(field), literal(value, column(schema, field)))
            }
            Condition::Raw(sql) => sql.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub source: String,
    pub alias: Option<String>,
    /// `(left, right)` field pairs joined with `AND`.
    pub on: Vec<(String, String)>,
}

impl Join {
    pub fn new(kind: JoinKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            alias: None,
            on: Vec::new(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn on(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.on.push((left.into(), right.into()));
        self
    }

    pub fn descriptor(&self) -> QueryDescriptor {
        let constraint = (!self.on.is_empty()).then(|| {
            let pairs: Vec<String> = self
                .on
                .iter()
                .map(|(l, r)| format!("{} = {}", quote_name(l), quote_name(r)))
                .collect();
            format!("ON {}", pairs.join(" AND "))
        });

        QueryDescriptor::new(StatementKind::Join)
            .with(Slot::Type, self.kind.to_string())
            .with(Slot::Source, quote_name(&self.source))
            .with_opt(Slot::Aliases, self.alias.as_deref().map(quote_name))
            .with_opt(Slot::Constraint, constraint)
    }
}

/// A statement request, independent of statement kind. Each kind reads the
/// parts it needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub source: String,
    pub alias: Option<String>,
    pub fields: Vec<String>,
    pub conditions: Vec<Condition>,
    pub joins: Vec<Join>,
    pub group: Vec<String>,
    pub order: Vec<(String, Direction)>,
    pub limit: Option<u64>,
    pub offset: u64,
    pub comment: Option<String>,
    /// Column values for create and update.
    pub data: Vec<(String, Value)>,
    /// Target schema. Guides literal coercion and identity detection.
    pub schema: Option<Schema>,
}

impl Query {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Equals(field.into(), value.into()));
        self
    }

    pub fn filter_raw(mut self, sql: impl Into<String>) -> Self {
        self.conditions.push(Condition::Raw(sql.into()));
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.group.push(field.into());
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order.push((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// 1-based page of `limit` rows.
    pub fn page(self, page: u64) -> Self {
        let offset = self.limit.unwrap_or(0).saturating_mul(page.saturating_sub(1));
        self.offset(offset)
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.push((field.into(), value.into()));
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    fn column(&self, field: &str) -> Option<&ColumnSchema> {
        column(self.schema.as_ref(), field)
    }

    fn source_sql(&self) -> String {
        quote_name(&self.source)
    }

    fn fields_sql(&self) -> String {
        if self.fields.is_empty() {
            return "*".to_string();
        }
        self.fields
            .iter()
            .map(|f| quote_name(f))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn conditions_sql(&self) -> Option<String> {
        if self.conditions.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .conditions
            .iter()
            .map(|c| c.render(self.schema.as_ref()))
            .collect();
        Some(format!("WHERE {}", parts.join(" AND ")))
    }

    fn group_sql(&self) -> Option<String> {
        (!self.group.is_empty()).then(|| {
            let fields: Vec<String> = self.group.iter().map(|g| quote_name(g)).collect();
            format!("GROUP BY {}", fields.join(", "))
        })
    }

    fn order_sql(&self) -> Option<String> {
        (!self.order.is_empty()).then(|| {
            let fields: Vec<String> = self
                .order
                .iter()
                .map(|(field, dir)| format!("{} {}", quote_name(field), dir))
                .collect();
            format!("ORDER BY {}", fields.join(", "))
        })
    }

    fn joins_sql(&self) -> Option<String> {
        (!self.joins.is_empty()).then(|| {
            self.joins
                .iter()
                .map(|j| super::renderer::render(&j.descriptor()))
                .collect::<Vec<_>>()
                .join(" ")
        })
    }

    fn comment_sql(&self) -> Option<String> {
        self.comment
            .as_deref()
            .map(|c| format!("/* {} */", c.replace("*/", "* /").replace("/*", "/ *")))
    }

    /// Quoted literal for each data value, in data order.
    pub fn values_sql(&self) -> Vec<String> {
        self.data
            .iter()
            .map(|(field, value)| literal(value, self.column(field)))
            .collect()
    }

    /// `[field] = literal, ...` for UPDATE.
    pub fn assignments_sql(&self) -> String {
        self.data
            .iter()
            .zip(self.values_sql())
            .map(|((field, _), value)| format!("{} = {}", quote_name(field), value))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Lower this query to the descriptor of one statement kind.
    pub fn descriptor(&self, kind: StatementKind) -> QueryDescriptor {
        let base = QueryDescriptor::new(kind)
            .with(Slot::Source, self.source_sql())
            .with_opt(Slot::Comment, self.comment_sql());

        match kind {
            StatementKind::Read => base
                .with(Slot::Fields, self.fields_sql())
                .with_opt(Slot::Aliases, self.alias.as_deref().map(quote_name))
                .with_opt(Slot::Joins, self.joins_sql())
                .with_opt(Slot::Conditions, self.conditions_sql())
                .with_opt(Slot::Group, self.group_sql())
                .with_opt(Slot::Order, self.order_sql())
                .paged(Page::new(self.limit, self.offset)),
            StatementKind::Create => {
                let fields: Vec<String> = self.data.iter().map(|(f, _)| quote_name(f)).collect();
                base.with(Slot::Fields, fields.join(", "))
                    .with(Slot::Values, self.values_sql().join(", "))
            }
            StatementKind::Update => base
                .with(Slot::Data, self.assignments_sql())
                .with_opt(Slot::Aliases, self.alias.as_deref().map(quote_name))
                .with_opt(Slot::Conditions, self.conditions_sql()),
            StatementKind::Delete => base
                .with_opt(Slot::Aliases, self.alias.as_deref().map(quote_name))
                .with_opt(Slot::Conditions, self.conditions_sql()),
            StatementKind::Schema => {
                let columns = self
                    .schema
                    .as_ref()
                    .map(|schema| {
                        schema
                            .values()
                            .map(column_definition)
                            .collect::<Vec<_>>()
                            .join(",\n")
                    })
                    .unwrap_or_default();
                base.with(Slot::Columns, columns)
            }
            StatementKind::Join => QueryDescriptor::new(StatementKind::Join)
                .with(Slot::Source, self.source_sql())
                .with_opt(Slot::Aliases, self.alias.as_deref().map(quote_name)),
        }
    }

    /// Whether the data writes the identity column of `schema`.
    pub fn writes_identity(&self, schema: &Schema) -> bool {
        crate::db::identity_column(schema).is_some_and(|identity| {
            self.data
                .iter()
                .any(|(field, value)| field == &identity.name && !value.is_null())
        })
    }
}

fn column<'a>(schema: Option<&'a Schema>, field: &str) -> Option<&'a ColumnSchema> {
    let schema = schema?;
    let name = field.rsplit('.').next().unwrap_or(field);
    let name = name.trim_start_matches('[').trim_end_matches(']');
    schema.get(name)
}

/// Column definition for CREATE TABLE. Identity columns become
/// `integer IDENTITY (1, 1) NOT NULL`.
pub fn column_definition(column: &ColumnSchema) -> String {
    let name = quote_name(&column.name);
    if column.is_identity() {
        return format!("{} integer IDENTITY (1, 1) NOT NULL", name);
    }

    let (native, default_length) = column.column_type.native_definition();
    let length = match column.column_type {
        crate::db::AbstractType::String | crate::db::AbstractType::Binary => {
            column.length.or(default_length)
        }
        _ => default_length,
    };

    let mut definition = match length {
        Some(length) => format!("{} {}({})", name, native, length),
        None => format!("{} {}", name, native),
    };
    definition.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
    if let Some(default) = &column.default {
        definition.push_str(" DEFAULT ");
        definition.push_str(default);
    }
    definition
}
