//! PostgreSQL storage backend.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use std::time::Duration;
use tracing::debug;

use crate::domain::models::{insert_column, BackendKind, Row, SqlValue};
use crate::domain::ports::{BackendError, Dialect, ObjectKind, StorageBackend};

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn identity_column(&self) -> &'static str {
        "BIGSERIAL PRIMARY KEY"
    }

    fn timestamp_type(&self) -> &'static str {
        "TIMESTAMPTZ"
    }

    fn list_databases(&self) -> String {
        "SELECT datname::text AS name FROM pg_database \
         WHERE datallowconn AND NOT datistemplate ORDER BY datname"
            .to_string()
    }

    fn current_database(&self) -> String {
        "SELECT current_database()::text AS name".to_string()
    }

    fn list_objects(&self, kind: ObjectKind) -> String {
        match kind {
            ObjectKind::Table => "SELECT table_name::text AS object_name, 'table'::text AS object_type \
                 FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
                 ORDER BY table_name"
                .to_string(),
            ObjectKind::View => "SELECT table_name::text AS object_name, 'view'::text AS object_type \
                 FROM information_schema.views \
                 WHERE table_schema = current_schema() ORDER BY table_name"
                .to_string(),
        }
    }

    fn describe_table(&self, table_literal: &str) -> String {
        // Unquoted identifiers fold to lower case on this engine.
        format!(
            "SELECT c.column_name::text AS column_name, c.data_type::text AS data_type, \
             c.is_nullable::text AS is_nullable, c.column_default::text AS column_default, \
             CASE WHEN EXISTS ( \
                 SELECT 1 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage k \
                   ON tc.constraint_name = k.constraint_name AND tc.table_schema = k.table_schema \
                 WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = c.table_schema \
                   AND tc.table_name = c.table_name AND k.column_name = c.column_name \
             ) THEN 1 ELSE 0 END AS is_primary_key \
             FROM information_schema.columns c \
             WHERE c.table_schema = current_schema() \
               AND (c.table_name = {table_literal} OR c.table_name = lower({table_literal})) \
             ORDER BY c.ordinal_position"
        )
    }

    fn foreign_keys(&self, table_literal: Option<&str>) -> String {
        let filter = table_literal.map_or_else(String::new, |t| {
            format!(
                " AND (tc.table_name IN ({t}, lower({t})) OR ccu.table_name IN ({t}, lower({t})))"
            )
        });
        format!(
            "SELECT tc.table_name::text AS child_table, kcu.column_name::text AS child_column, \
             ccu.table_name::text AS parent_table, ccu.column_name::text AS parent_column, \
             tc.constraint_name::text AS constraint_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
             JOIN information_schema.constraint_column_usage ccu \
               ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema \
             WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = current_schema(){filter} \
             ORDER BY tc.table_name, tc.constraint_name"
        )
    }
}

/// Decode a PostgreSQL row using the reported column types.
pub fn decode_pg_row(row: &PgRow) -> Result<Row, sqlx::Error> {
    let mut decoded = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        let (is_null, type_name) = {
            let raw = row.try_get_raw(index)?;
            (raw.is_null(), raw.type_info().name().to_string())
        };
        let value = if is_null {
            SqlValue::Null
        } else {
            decode_pg_value(row, index, &type_name)?
        };
        insert_column(&mut decoded, column.name(), value);
    }
    Ok(decoded)
}

fn decode_pg_value(row: &PgRow, index: usize, type_name: &str) -> Result<SqlValue, sqlx::Error> {
    let value = match type_name {
        "BOOL" => SqlValue::Bool(row.try_get(index)?),
        "INT2" => SqlValue::Integer(i64::from(row.try_get::<i16, _>(index)?)),
        "INT4" => SqlValue::Integer(i64::from(row.try_get::<i32, _>(index)?)),
        "INT8" => SqlValue::Integer(row.try_get(index)?),
        "FLOAT4" => SqlValue::Real(f64::from(row.try_get::<f32, _>(index)?)),
        "FLOAT8" => SqlValue::Real(row.try_get(index)?),
        "NUMERIC" => {
            let decimal: Decimal = row.try_get(index)?;
            decimal
                .to_f64()
                .map_or_else(|| SqlValue::Text(decimal.to_string()), SqlValue::Real)
        }
        "TIMESTAMPTZ" => SqlValue::Timestamp(row.try_get::<DateTime<Utc>, _>(index)?),
        "TIMESTAMP" => SqlValue::Timestamp(row.try_get::<NaiveDateTime, _>(index)?.and_utc()),
        "DATE" => SqlValue::Text(row.try_get::<NaiveDate, _>(index)?.to_string()),
        "JSON" | "JSONB" => SqlValue::Text(row.try_get::<serde_json::Value, _>(index)?.to_string()),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" | "UNKNOWN" => SqlValue::Text(row.try_get(index)?),
        other => match row.try_get_unchecked::<String, _>(index) {
            Ok(text) => SqlValue::Text(text),
            Err(_) => SqlValue::Text(format!("<unsupported {other}>")),
        },
    };
    Ok(value)
}

pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;
        debug!(max_connections, "postgres pool ready");
        Ok(Self { pool })
    }

    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn dialect(&self) -> &dyn Dialect {
        &PostgresDialect
    }

    async fn fetch(&self, statement: &str) -> Result<Vec<Row>, BackendError> {
        let rows = sqlx::query(statement)
            .persistent(false)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(decode_pg_row)
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
