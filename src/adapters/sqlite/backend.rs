//! SQLite storage backend.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as _, SqlitePool, TypeInfo, ValueRef};
use tracing::debug;

use super::connection::{create_pool, ConnectionError, PoolConfig};
use crate::domain::models::{insert_column, BackendKind, Row, SqlValue};
use crate::domain::ports::{BackendError, Dialect, ObjectKind, StorageBackend};

/// SQL flavour shared by the file and in-memory SQLite backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn identity_column(&self) -> &'static str {
        "INTEGER PRIMARY KEY AUTOINCREMENT"
    }

    fn timestamp_type(&self) -> &'static str {
        "TEXT"
    }

    fn list_databases(&self) -> String {
        "SELECT name FROM pragma_database_list ORDER BY seq".to_string()
    }

    fn current_database(&self) -> String {
        "SELECT 'main' AS name".to_string()
    }

    fn list_objects(&self, kind: ObjectKind) -> String {
        let (object_type, label) = match kind {
            ObjectKind::Table => ("table", "table"),
            ObjectKind::View => ("view", "view"),
        };
        format!(
            "SELECT name AS object_name, '{label}' AS object_type FROM sqlite_master \
             WHERE type = '{object_type}' AND name NOT LIKE 'sqlite_%' ORDER BY name"
        )
    }

    fn describe_table(&self, table_literal: &str) -> String {
        format!(
            "SELECT name AS column_name, type AS data_type, \
             CASE WHEN \"notnull\" = 1 THEN 'NO' ELSE 'YES' END AS is_nullable, \
             dflt_value AS column_default, \
             CASE WHEN pk > 0 THEN 1 ELSE 0 END AS is_primary_key \
             FROM pragma_table_info({table_literal}) ORDER BY cid"
        )
    }

    fn foreign_keys(&self, table_literal: Option<&str>) -> String {
        let filter = table_literal.map_or_else(String::new, |t| {
            format!(" AND (m.name = {t} OR fk.\"table\" = {t})")
        });
        format!(
            "SELECT m.name AS child_table, fk.\"from\" AS child_column, \
             fk.\"table\" AS parent_table, fk.\"to\" AS parent_column, \
             'fk_' || m.name || '_' || fk.id AS constraint_name \
             FROM sqlite_master m, pragma_foreign_key_list(m.name) fk \
             WHERE m.type = 'table'{filter} ORDER BY m.name, fk.id, fk.seq"
        )
    }
}

/// Decode a SQLite row by each value's storage class.
///
/// The declared column type is ignored because SQLite does not enforce it.
pub fn decode_sqlite_row(row: &SqliteRow) -> Result<Row, sqlx::Error> {
    let mut decoded = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        let (is_null, storage_class) = {
            let raw = row.try_get_raw(index)?;
            (raw.is_null(), raw.type_info().name().to_string())
        };
        let value = if is_null {
            SqlValue::Null
        } else {
            match storage_class.as_str() {
                "INTEGER" | "INT" | "BIGINT" => SqlValue::Integer(row.try_get_unchecked(index)?),
                "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => SqlValue::Real(row.try_get_unchecked(index)?),
                "BOOLEAN" => SqlValue::Bool(row.try_get_unchecked(index)?),
                "BLOB" => {
                    let bytes: Vec<u8> = row.try_get_unchecked(index)?;
                    SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => SqlValue::Text(row.try_get_unchecked(index)?),
            }
        };
        insert_column(&mut decoded, column.name(), value);
    }
    Ok(decoded)
}

/// File-backed SQLite engine.
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub async fn connect(database_url: &str, config: &PoolConfig) -> Result<Self, ConnectionError> {
        let pool = create_pool(database_url, config).await?;
        debug!(url = database_url, "sqlite pool ready");
        Ok(Self { pool })
    }

    pub const fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn dialect(&self) -> &dyn Dialect {
        &SqliteDialect
    }

    async fn fetch(&self, statement: &str) -> Result<Vec<Row>, BackendError> {
        let rows = sqlx::query(statement)
            .persistent(false)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(decode_sqlite_row)
            .collect::<Result<_, _>>()
            .map_err(BackendError::from)
    }

    async fn execute(&self, statement: &str) -> Result<u64, BackendError> {
        let result = sqlx::query(statement)
            .persistent(false)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_memory_pool;

    async fn backend() -> SqliteBackend {
        SqliteBackend::from_pool(create_memory_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_fetch_decodes_storage_classes() {
        let backend = backend().await;
        let rows = backend
            .fetch("SELECT 1 AS i, 2.5 AS r, 'x' AS t, NULL AS n")
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["i"], SqlValue::Integer(1));
        assert_eq!(rows[0]["r"], SqlValue::Real(2.5));
        assert_eq!(rows[0]["t"], SqlValue::Text("x".into()));
        assert_eq!(rows[0]["n"], SqlValue::Null);
    }

    #[tokio::test]
    async fn test_fetch_keeps_duplicate_column_names() {
        let backend = backend().await;
        let rows = backend.fetch("SELECT 1 AS a, 2 AS a, 'x' AS b").await.unwrap();

        assert_eq!(rows[0].len(), 3);
        assert_eq!(rows[0]["a"], SqlValue::Integer(1));
        assert_eq!(rows[0]["a:1"], SqlValue::Integer(2));
    }

    #[tokio::test]
    async fn test_syntax_error_is_statement_failure() {
        let backend = backend().await;
        let err = backend.fetch("SELEC nothing").await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_execute_reports_rows_affected() {
        let backend = backend().await;
        backend.execute("CREATE TABLE t (x INTEGER)").await.unwrap();
        let affected = backend
            .execute("INSERT INTO t (x) VALUES (1), (2), (3)")
            .await
            .unwrap();
        assert_eq!(affected, 3);
    }

    #[tokio::test]
    async fn test_dialect_introspection_runs() {
        let backend = backend().await;
        backend
            .execute("CREATE TABLE parent (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .await
            .unwrap();
        backend
            .execute("CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES parent(id))")
            .await
            .unwrap();
        let dialect = backend.dialect();

        let tables = backend.fetch(&dialect.list_objects(ObjectKind::Table)).await.unwrap();
        let names: Vec<_> = tables.iter().map(|r| r["object_name"].to_string()).collect();
        assert_eq!(names, vec!["child", "parent"]);

        let columns = backend.fetch(&dialect.describe_table("'parent'")).await.unwrap();
        assert_eq!(columns[0]["is_primary_key"], SqlValue::Integer(1));
        assert_eq!(columns[1]["is_nullable"], SqlValue::Text("NO".into()));

        let fks = backend.fetch(&dialect.foreign_keys(Some("'parent'"))).await.unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0]["child_column"], SqlValue::Text("parent_id".into()));

        let dbs = backend.fetch(&dialect.list_databases()).await.unwrap();
        assert_eq!(dbs[0]["name"], SqlValue::Text("main".into()));
    }
}
