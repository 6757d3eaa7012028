//! Storage backend port.
//!
//! Each engine is one implementation of [`StorageBackend`], chosen once when
//! the store is built. SQL that differs between engines lives behind
//! [`Dialect`]; callers never branch on the concrete backend.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::domain::models::{BackendKind, Row};

/// How a failed statement should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connectivity problem; the same statement may succeed later.
    Transient,
    /// Bad SQL, constraint violation or similar; retrying cannot help.
    Statement,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub kind: FailureKind,
    pub message: String,
}

impl BackendError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn statement(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Statement,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        let kind = classify_sqlx_error(&err);
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// Classify a driver error as transient or statement-level.
pub fn classify_sqlx_error(err: &sqlx::Error) -> FailureKind {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => FailureKind::Transient,
        sqlx::Error::Database(db) => db
            .code()
            .filter(|code| is_transient_code(code))
            .map_or(FailureKind::Statement, |_| FailureKind::Transient),
        _ => FailureKind::Statement,
    }
}

/// PostgreSQL SQLSTATE values and SQLite extended result codes that signal
/// a connectivity or availability problem.
fn is_transient_code(code: &str) -> bool {
    // 08xxx connection exception, 57P0x server shutdown, 53300 too many connections
    code.starts_with("08")
        || matches!(code, "57P01" | "57P02" | "57P03" | "53300")
        // SQLITE_BUSY, SQLITE_LOCKED and their extended variants
        || matches!(code, "5" | "6" | "261" | "262" | "517" | "773")
}

/// Category of schema object for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Table,
    View,
}

impl ObjectKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "table" | "tables" => Some(Self::Table),
            "view" | "views" => Some(Self::View),
            _ => None,
        }
    }
}

/// Engine-specific SQL.
///
/// Introspection statements return normalized column names so callers can
/// read the rows without knowing the engine:
/// - `list_databases`: `name`
/// - `list_objects`: `object_name`, `object_type`
/// - `describe_table`: `column_name`, `data_type`, `is_nullable` (`YES`/`NO`),
///   `column_default`, `is_primary_key` (0/1)
/// - `foreign_keys`: `child_table`, `child_column`, `parent_table`,
///   `parent_column`, `constraint_name`
///
/// Table arguments are already-escaped string literals.
pub trait Dialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Column definition for an auto-assigned integer primary key.
    fn identity_column(&self) -> &'static str;

    fn timestamp_type(&self) -> &'static str;

    fn text_type(&self) -> &'static str {
        "TEXT"
    }

    fn list_databases(&self) -> String;

    /// Name of the database this connection is bound to, as `name`.
    fn current_database(&self) -> String;

    fn list_objects(&self, kind: ObjectKind) -> String;

    fn describe_table(&self, table_literal: &str) -> String;

    fn foreign_keys(&self, table_literal: Option<&str>) -> String;

    /// Render an identifier for interpolation; dotted names are handled per
    /// part.
    ///
    /// Plain identifiers stay bare so each engine applies its own case
    /// folding; reserved words and anything unusual are double-quoted.
    fn quote_ident(&self, ident: &str) -> String {
        ident
            .split('.')
            .map(|part| {
                if is_plain_identifier(part) && !is_reserved_word(part) {
                    part.to_string()
                } else {
                    format!("\"{}\"", part.replace('"', "\"\""))
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

const RESERVED_WORDS: &[&str] = &[
    "all", "and", "as", "asc", "by", "case", "check", "column", "constraint", "create", "default",
    "desc", "distinct", "else", "end", "from", "group", "having", "in", "index", "is", "join",
    "key", "limit", "not", "null", "on", "or", "order", "primary", "references", "select", "table",
    "then", "to", "union", "unique", "user", "values", "when", "where",
];

fn is_reserved_word(part: &str) -> bool {
    RESERVED_WORDS.iter().any(|w| w.eq_ignore_ascii_case(part))
}

fn is_plain_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Whether `name` is a table/column name safe to interpolate: one or two
/// dot-separated parts of ASCII letters, digits and underscores, not starting
/// with a digit.
pub fn is_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2 && parts.iter().all(|p| is_plain_identifier(p))
}

/// One storage engine.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn dialect(&self) -> &dyn Dialect;

    /// Run a statement and return every row it produces.
    async fn fetch(&self, statement: &str) -> Result<Vec<Row>, BackendError>;

    /// Run a statement and return the number of rows affected.
    async fn execute(&self, statement: &str) -> Result<u64, BackendError>;

    async fn ping(&self) -> Result<(), BackendError> {
        self.fetch("SELECT 1 AS ping").await.map(|_| ())
    }

    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Plain;

    impl Dialect for Plain {
        fn name(&self) -> &'static str {
            "plain"
        }
        fn identity_column(&self) -> &'static str {
            "INTEGER PRIMARY KEY"
        }
        fn timestamp_type(&self) -> &'static str {
            "TEXT"
        }
        fn list_databases(&self) -> String {
            String::new()
        }
        fn current_database(&self) -> String {
            String::new()
        }
        fn list_objects(&self, _kind: ObjectKind) -> String {
            String::new()
        }
        fn describe_table(&self, _table_literal: &str) -> String {
            String::new()
        }
        fn foreign_keys(&self, _table_literal: Option<&str>) -> String {
            String::new()
        }
    }

    #[test]
    fn test_pool_errors_are_transient() {
        assert_eq!(
            classify_sqlx_error(&sqlx::Error::PoolTimedOut),
            FailureKind::Transient
        );
        assert_eq!(
            classify_sqlx_error(&sqlx::Error::RowNotFound),
            FailureKind::Statement
        );
    }

    #[test]
    fn test_transient_codes() {
        assert!(is_transient_code("08006"));
        assert!(is_transient_code("57P01"));
        assert!(is_transient_code("5"));
        assert!(!is_transient_code("42601"));
        assert!(!is_transient_code("23505"));
        assert!(!is_transient_code("1"));
    }

    #[test]
    fn test_quote_ident_only_quotes_when_needed() {
        assert_eq!(Plain.quote_ident("public.orders"), "public.orders");
        assert_eq!(Plain.quote_ident("AI_Messages"), "AI_Messages");
        assert_eq!(Plain.quote_ident("order"), "\"order\"");
        assert_eq!(Plain.quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("orders"));
        assert!(is_identifier("public.AI_Messages"));
        assert!(is_identifier("_tmp1"));
        assert!(!is_identifier("1orders"));
        assert!(!is_identifier("a.b.c"));
        assert!(!is_identifier("orders; DROP TABLE x"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_object_kind_parse() {
        assert_eq!(ObjectKind::parse("Tables"), Some(ObjectKind::Table));
        assert_eq!(ObjectKind::parse("view"), Some(ObjectKind::View));
        assert_eq!(ObjectKind::parse("index"), None);
    }
}
