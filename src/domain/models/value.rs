//! Typed cell values and the two data shapes the store accepts.
//!
//! A result set travels through the crate as a list of [`Row`]s. Bulk loads may
//! also arrive in columnar form ([`Columns`]); [`to_columns`] and [`to_rows`]
//! convert between the two without losing position alignment.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Canonical text form used for timestamps written into statements.
///
/// Both PostgreSQL `TIMESTAMPTZ` and SQLite `TEXT` columns accept it, and the
/// fixed width keeps SQLite's lexicographic comparisons chronological.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f+00:00";

/// A single typed value read from or written to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view, accepting integral reals and numeric text.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            #[allow(clippy::cast_possible_truncation)]
            Self::Real(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Integer(i) => Some(*i as f64),
            Self::Real(f) => Some(*f),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Timestamp view. SQLite hands timestamps back as text, so several
    /// textual layouts are accepted.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            Self::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => f.write_str(s),
            Self::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
        }
    }
}

/// Parse the timestamp layouts produced by either backend.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for SqlValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// One result row keyed by column name.
pub type Row = BTreeMap<String, SqlValue>;

/// Columnar form: each column name maps to its values in row order.
pub type Columns = BTreeMap<String, Vec<SqlValue>>;

/// Input accepted by bulk operations: either shape, normalized on use.
#[derive(Debug, Clone, PartialEq)]
pub enum RowSet {
    Rows(Vec<Row>),
    Columns(Columns),
}

impl RowSet {
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Self::Rows(rows) => rows,
            Self::Columns(columns) => to_rows(&columns),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Rows(rows) => rows.len(),
            Self::Columns(columns) => columns.values().map(Vec::len).max().unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<Row>> for RowSet {
    fn from(rows: Vec<Row>) -> Self {
        Self::Rows(rows)
    }
}

impl From<Columns> for RowSet {
    fn from(columns: Columns) -> Self {
        Self::Columns(columns)
    }
}

/// Convert rows to columnar form.
///
/// The column set is the union of every row's keys; a row lacking a column
/// contributes `Null` at its position so all vectors stay aligned.
pub fn to_columns(rows: &[Row]) -> Columns {
    let mut columns: Columns = BTreeMap::new();
    for row in rows {
        for key in row.keys() {
            columns.entry(key.clone()).or_default();
        }
    }
    for values in columns.values_mut() {
        values.reserve(rows.len());
    }
    for row in rows {
        for (key, values) in &mut columns {
            values.push(row.get(key).cloned().unwrap_or(SqlValue::Null));
        }
    }
    columns
}

/// Convert columnar data to rows. Short columns are padded with `Null`.
pub fn to_rows(columns: &Columns) -> Vec<Row> {
    let height = columns.values().map(Vec::len).max().unwrap_or(0);
    (0..height)
        .map(|i| {
            columns
                .iter()
                .map(|(name, values)| {
                    (name.clone(), values.get(i).cloned().unwrap_or(SqlValue::Null))
                })
                .collect()
        })
        .collect()
}

/// Render `value` for interpolation into a statement.
///
/// Text has embedded single quotes doubled and NUL characters removed; with
/// `quote` it is also wrapped in single quotes. Every literal in generated SQL
/// goes through here.
pub fn escape(value: &SqlValue, quote: bool) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(true) => "TRUE".to_string(),
        SqlValue::Bool(false) => "FALSE".to_string(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(r) if r.is_finite() => format!("{r:?}"),
        SqlValue::Real(_) => "NULL".to_string(),
        SqlValue::Text(s) => escape_text(s, quote),
        SqlValue::Timestamp(ts) => escape_text(&ts.format(TIMESTAMP_FORMAT).to_string(), quote),
    }
}

/// Shorthand for quoting a string literal.
pub fn quote_literal(text: &str) -> String {
    escape_text(text, true)
}

fn escape_text(text: &str, quote: bool) -> String {
    let body: String = text.chars().filter(|c| *c != '\0').collect::<String>().replace('\'', "''");
    if quote {
        format!("'{body}'")
    } else {
        body
    }
}

/// Build a [`Row`] from `(column, value)` pairs.
pub fn row<K, V, I>(pairs: I) -> Row
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<SqlValue>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// Add a decoded column, renaming repeats to `name:1`, `name:2`, ... the
/// way SQLite reports them, so no value is lost to a duplicate name.
pub fn insert_column(row: &mut Row, name: &str, value: SqlValue) {
    if !row.contains_key(name) {
        row.insert(name.to_string(), value);
        return;
    }
    let mut suffix = 1;
    loop {
        let candidate = format!("{name}:{suffix}");
        if !row.contains_key(&candidate) {
            row.insert(candidate, value);
            return;
        }
        suffix += 1;
    }
}
