//! Backend-agnostic data access with retry and escaping guarantees.
//!
//! [`ResilientStore`] is the only path to storage in the crate. It hides
//! which [`StorageBackend`] is in use, retries transient connectivity
//! failures per call with exponential backoff, and builds bulk and upsert
//! statements with every literal routed through [`escape`].

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::retry::{RetryError, RetryPolicy};
use crate::domain::errors::StoreError;
use crate::domain::models::{escape, BackendKind, Row, RowSet, SqlValue};
use crate::domain::ports::{is_identifier, BackendError, Dialect, StorageBackend};

/// Rows per statement when the caller does not choose.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Outcome of [`ResilientStore::bulk_write`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteReport {
    pub rows_written: u64,
    /// Row count of each statement issued, in order.
    pub chunks: Vec<usize>,
}

/// Outcome of [`ResilientStore::upsert`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub updated: usize,
    pub inserted: usize,
}

#[derive(Clone)]
pub struct ResilientStore {
    backend: Arc<dyn StorageBackend>,
    retry: RetryPolicy,
    chunk_size: usize,
}

impl std::fmt::Debug for ResilientStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientStore")
            .field("backend", &self.backend.kind())
            .field("retry", &self.retry)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl ResilientStore {
    pub fn new(backend: Arc<dyn StorageBackend>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            retry,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Default chunk size for [`bulk_write`](Self::bulk_write); zero keeps the current value.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        if chunk_size > 0 {
            self.chunk_size = chunk_size;
        }
        self
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.backend.dialect()
    }

    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Render a value for interpolation. See [`escape`].
    pub fn escape(&self, value: &SqlValue, quote: bool) -> String {
        escape(value, quote)
    }

    /// Run a read-only statement and return its rows.
    pub async fn execute_read(&self, statement: &str) -> Result<Vec<Row>, StoreError> {
        let backend = &self.backend;
        self.with_retry(statement, || backend.fetch(statement)).await
    }

    /// Run a statement with no result set; returns rows affected.
    pub async fn execute_write(&self, statement: &str) -> Result<u64, StoreError> {
        let backend = &self.backend;
        self.with_retry(statement, || backend.execute(statement)).await
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.execute_read("SELECT 1 AS ping").await.map(|_| ())
    }

    /// Insert `rows` into `table`, at most `chunk_size` rows per statement.
    ///
    /// Each chunk's column list is the union of its rows' keys; absent cells
    /// are written as NULL. A failed chunk stops the load and earlier chunks
    /// stay written.
    pub async fn bulk_write(
        &self,
        table: &str,
        rows: impl Into<RowSet>,
        chunk_size: Option<usize>,
    ) -> Result<BulkWriteReport, StoreError> {
        let chunk_size = chunk_size.unwrap_or(self.chunk_size);
        if chunk_size == 0 {
            return Err(StoreError::InvalidInput("chunk size must be positive".into()));
        }
        let table = self.identifier(table)?;
        let rows = rows.into().into_rows();

        let mut report = BulkWriteReport::default();
        for chunk in rows.chunks(chunk_size) {
            let statement = self.insert_statement(&table, chunk)?;
            report.rows_written += self.execute_write(&statement).await?;
            report.chunks.push(chunk.len());
        }
        debug!(table = %table, rows = rows.len(), chunks = report.chunks.len(), "bulk write complete");
        Ok(report)
    }

    /// Update each row matching `key_columns`, inserting it when none match.
    ///
    /// Each row is one update followed, only if it touched nothing, by one
    /// insert. This is safe for a single caller per key; concurrent upserts of
    /// the same key may both insert.
    pub async fn upsert(
        &self,
        table: &str,
        rows: impl Into<RowSet>,
        key_columns: &[&str],
    ) -> Result<UpsertReport, StoreError> {
        if key_columns.is_empty() {
            return Err(StoreError::InvalidInput("upsert needs at least one key column".into()));
        }
        let table = self.identifier(table)?;
        let rows = rows.into().into_rows();

        let mut report = UpsertReport::default();
        for row in &rows {
            let predicate = self.key_predicate(row, key_columns)?;
            let assignments = row
                .iter()
                .filter(|(column, _)| !key_columns.contains(&column.as_str()))
                .map(|(column, value)| {
                    Ok(format!("{} = {}", self.identifier(column)?, escape(value, true)))
                })
                .collect::<Result<Vec<_>, StoreError>>()?;

            let matched = if assignments.is_empty() {
                let probe = format!("SELECT 1 AS found FROM {table} WHERE {predicate} LIMIT 1");
                u64::from(!self.execute_read(&probe).await?.is_empty())
            } else {
                let update = format!(
                    "UPDATE {table} SET {} WHERE {predicate}",
                    assignments.join(", ")
                );
                self.execute_write(&update).await?
            };

            if matched == 0 {
                let insert = self.insert_statement(&table, std::slice::from_ref(row))?;
                self.execute_write(&insert).await?;
                report.inserted += 1;
            } else {
                report.updated += 1;
            }
        }
        Ok(report)
    }

    pub async fn close(&self) {
        self.backend.close().await;
    }

    fn identifier(&self, name: &str) -> Result<String, StoreError> {
        if is_identifier(name) {
            Ok(self.dialect().quote_ident(name))
        } else {
            Err(StoreError::InvalidInput(format!("invalid identifier: {name:?}")))
        }
    }

    fn insert_statement(&self, table: &str, rows: &[Row]) -> Result<String, StoreError> {
        let columns: BTreeSet<&String> = rows.iter().flat_map(Row::keys).collect();
        if columns.is_empty() {
            return Err(StoreError::InvalidInput(format!(
                "rows for {table} have no columns"
            )));
        }
        let column_list = columns
            .iter()
            .map(|c| self.identifier(c))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");
        let tuples = rows
            .iter()
            .map(|row| {
                let values = columns
                    .iter()
                    .map(|c| row.get(*c).map_or_else(|| "NULL".to_string(), |v| escape(v, true)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({values})")
            })
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("INSERT INTO {table} ({column_list}) VALUES {tuples}"))
    }

    fn key_predicate(&self, row: &Row, key_columns: &[&str]) -> Result<String, StoreError> {
        key_columns
            .iter()
            .map(|key| {
                let column = self.identifier(key)?;
                match row.get(*key) {
                    None => Err(StoreError::InvalidInput(format!(
                        "row is missing key column {key}"
                    ))),
                    Some(SqlValue::Null) => Ok(format!("{column} IS NULL")),
                    Some(value) => Ok(format!("{column} = {}", escape(value, true))),
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|parts| parts.join(" AND "))
    }

    async fn with_retry<T, F, Fut>(&self, statement: &str, operation: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, BackendError>>,
    {
        let max_retries = self.retry.max_retries();
        let outcome = self
            .retry
            .execute(operation, BackendError::is_transient, |attempt, backoff, err| {
                warn!(
                    attempt,
                    max_retries,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    statement = %statement,
                    error = %err,
                    "transient storage failure, retrying statement"
                );
            })
            .await;

        outcome.map_err(|failure| match failure {
            RetryError::Permanent(err) => {
                error!(statement = %statement, error = %err, "statement failed");
                StoreError::Statement {
                    statement: statement.to_string(),
                    message: err.message,
                }
            }
            RetryError::Exhausted { attempts, last } => {
                error!(
                    attempts,
                    statement = %statement,
                    error = %last,
                    "storage unavailable, retry ceiling reached"
                );
                StoreError::RetriesExhausted {
                    attempts,
                    statement: statement.to_string(),
                    message: last.message,
                }
            }
        })
    }
}
