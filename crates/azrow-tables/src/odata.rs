//! OData `$filter` expression builder.
//!
//! A [`FilterStatement`] is a tree whose leaves are single-column
//! comparisons ([`Filter`]) and whose inner nodes join their children with
//! `and` / `or`. [`compile`] renders the tree into the textual form the
//! table service accepts. Rendering is purely syntactic: column names and
//! value types are not checked.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::types::EntityValue;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    /// Rendered as the `in` keyword.
    Contains,
    /// Rendered in function-call form: `startswith(Column, 'x')`.
    StartsWith,
}

impl Operator {
    pub fn token(self) -> &'static str {
        match self {
            Self::Equal => "eq",
            Self::NotEqual => "ne",
            Self::Greater => "gt",
            Self::GreaterOrEqual => "ge",
            Self::Less => "lt",
            Self::LessOrEqual => "le",
            Self::Contains => "in",
            Self::StartsWith => "startswith",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// How the children of a statement are combined. Defaults to `or`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Join {
    And,
    #[default]
    Or,
}

impl fmt::Display for Join {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => f.write_str("and"),
            Self::Or => f.write_str("or"),
        }
    }
}

/// Literal operand of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i32> for FilterValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTime(v)
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

impl From<EntityValue> for FilterValue {
    fn from(v: EntityValue) -> Self {
        match v {
            EntityValue::String(s) => Self::String(s),
            EntityValue::Bool(b) => Self::Bool(b),
            EntityValue::Int32(n) => Self::Int(n.into()),
            EntityValue::Int64(n) => Self::Int(n),
            EntityValue::Double(n) => Self::Double(n),
            EntityValue::DateTime(d) => Self::DateTime(d),
        }
    }
}

/// A single column comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub property: String,
    pub operator: Operator,
    pub value: FilterValue,
    pub not: bool,
}

impl Filter {
    pub fn new(property: impl Into<String>, operator: Operator, value: impl Into<FilterValue>) -> Self {
        Self {
            property: property.into(),
            operator,
            value: value.into(),
            not: false,
        }
    }

    pub fn eq(property: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(property, Operator::Equal, value)
    }

    pub fn ne(property: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(property, Operator::NotEqual, value)
    }

    pub fn gt(property: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(property, Operator::Greater, value)
    }

    pub fn ge(property: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(property, Operator::GreaterOrEqual, value)
    }

    pub fn lt(property: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(property, Operator::Less, value)
    }

    pub fn le(property: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(property, Operator::LessOrEqual, value)
    }

    pub fn starts_with(property: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(property, Operator::StartsWith, value)
    }

    /// Negate this comparison.
    pub fn negate(mut self) -> Self {
        self.not = true;
        self
    }
}

/// Either a leaf comparison or a nested statement.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Predicate(Filter),
    Group(FilterStatement),
}

impl From<Filter> for FilterNode {
    fn from(f: Filter) -> Self {
        Self::Predicate(f)
    }
}

impl From<FilterStatement> for FilterNode {
    fn from(s: FilterStatement) -> Self {
        Self::Group(s)
    }
}

/// A boolean combination of filters and nested statements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterStatement {
    pub filters: Vec<FilterNode>,
    pub join: Join,
    pub not: bool,
}

impl FilterStatement {
    pub fn new(join: Join, filters: impl IntoIterator<Item = FilterNode>) -> Self {
        Self {
            filters: filters.into_iter().collect(),
            join,
            not: false,
        }
    }

    pub fn and(filters: impl IntoIterator<Item = FilterNode>) -> Self {
        Self::new(Join::And, filters)
    }

    pub fn or(filters: impl IntoIterator<Item = FilterNode>) -> Self {
        Self::new(Join::Or, filters)
    }

    /// Single-filter statement.
    pub fn single(filter: Filter) -> Self {
        Self::or([filter.into()])
    }

    pub fn push(&mut self, node: impl Into<FilterNode>) {
        self.filters.push(node.into());
    }

    pub fn negate(mut self) -> Self {
        self.not = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn compile(&self) -> String {
        compile(self)
    }
}

/// Render a statement; an empty statement renders as `""`.
pub fn compile(statement: &FilterStatement) -> String {
    let mut parts: Vec<String> = statement
        .filters
        .iter()
        .filter_map(|node| match node {
            FilterNode::Predicate(filter) => Some(render_filter(filter)),
            FilterNode::Group(group) => Some(compile(group)).filter(|s| !s.is_empty()),
        })
        .collect();

    let body = match parts.len() {
        0 => return String::new(),
        1 => parts.remove(0),
        _ => format!("({})", parts.join(&format!(" {} ", statement.join))),
    };

    if statement.not {
        format!("(not {body})")
    } else {
        body
    }
}

/// Same as [`compile`] but accepts a missing statement.
pub fn compile_opt(statement: Option<&FilterStatement>) -> String {
    statement.map(compile).unwrap_or_default()
}

/// Map logical column names onto the store's reserved system columns.
pub fn column_name(property: &str) -> &str {
    match property {
        "partitionKey" => "PartitionKey",
        "rowKey" => "RowKey",
        other => other,
    }
}

fn render_filter(filter: &Filter) -> String {
    let not = if filter.not { "not " } else { "" };
    let column = column_name(&filter.property);
    let literal = render_literal(&filter.value);
    match filter.operator {
        Operator::StartsWith => format!("{not}{}({column}, {literal})", filter.operator),
        op => format!("{not}{column} {op} {literal}"),
    }
}

/// Render a literal operand.
pub fn render_literal(value: &FilterValue) -> String {
    match value {
        FilterValue::Null => "null".into(),
        FilterValue::String(s) => quote(s),
        FilterValue::DateTime(d) => quote(&d.to_rfc3339_opts(SecondsFormat::Millis, true)),
        FilterValue::Int(n) => {
            if is_int32(*n as f64) {
                n.to_string()
            } else {
                format!("{n}L")
            }
        }
        FilterValue::Double(n) if n.is_nan() => "NaN".into(),
        FilterValue::Double(n) if n.is_infinite() => {
            let keyword = if n.is_sign_positive() { "INF" } else { "-INF" };
            keyword.into()
        }
        FilterValue::Double(n) => {
            if is_int32(*n) {
                n.to_string()
            } else {
                format!("{n}L")
            }
        }
        FilterValue::Bool(b) => b.to_string(),
    }
}

/// Single-quote a string, doubling embedded quotes.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn is_int32(n: f64) -> bool {
    n >= f64::from(i32::MIN) && n <= f64::from(i32::MAX)
}

// ─── Tests ──────────────────────────────────────────────────────────
