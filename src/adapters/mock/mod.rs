//! In-memory mock backend for development and tests.
//!
//! Statements run against a private in-memory SQLite database seeded with a
//! small demo dataset. The backend also records every statement it is asked
//! to run and can be told to fail upcoming calls, which lets tests observe
//! chunking and retry behaviour from the outside.

mod demo_data;

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::debug;

use crate::adapters::sqlite::{create_memory_pool, ConnectionError, SqliteBackend, SqliteDialect};
use crate::domain::models::{BackendKind, Row};
use crate::domain::ports::{BackendError, Dialect, StorageBackend};

pub use demo_data::DEMO_TABLES;

/// Failure to inject into the next backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Transient(String),
    Statement(String),
}

/// Statement the backend was asked to run, with its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub statement: String,
    pub failed: bool,
}

pub struct MockBackend {
    inner: SqliteBackend,
    journal: Mutex<Vec<JournalEntry>>,
    faults: Mutex<VecDeque<Fault>>,
}

impl MockBackend {
    /// Fresh database with the demo tables loaded.
    pub async fn new() -> Result<Self, ConnectionError> {
        let pool = create_memory_pool().await?;
        demo_data::load(&pool)
            .await
            .map_err(ConnectionError::PoolCreationFailed)?;
        debug!(tables = DEMO_TABLES.len(), "mock backend seeded");
        Ok(Self::with_pool(pool))
    }

    /// Fresh database without demo data.
    pub async fn empty() -> Result<Self, ConnectionError> {
        Ok(Self::with_pool(create_memory_pool().await?))
    }

    fn with_pool(pool: SqlitePool) -> Self {
        Self {
            inner: SqliteBackend::from_pool(pool),
            journal: Mutex::new(Vec::new()),
            faults: Mutex::new(VecDeque::new()),
        }
    }

    /// Make the next `count` calls fail with `fault`.
    pub async fn inject(&self, fault: Fault, count: usize) {
        let mut faults = self.faults.lock().await;
        faults.extend(std::iter::repeat(fault).take(count));
    }

    pub async fn pending_faults(&self) -> usize {
        self.faults.lock().await.len()
    }

    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.journal.lock().await.clone()
    }

    /// Statements whose text starts with `prefix` (case-insensitive).
    pub async fn statements_starting_with(&self, prefix: &str) -> Vec<String> {
        let prefix = prefix.to_ascii_uppercase();
        self.journal
            .lock()
            .await
            .iter()
            .filter(|e| e.statement.trim_start().to_ascii_uppercase().starts_with(&prefix))
            .map(|e| e.statement.clone())
            .collect()
    }

    pub async fn clear_journal(&self) {
        self.journal.lock().await.clear();
    }

    async fn before_call(&self, statement: &str) -> Result<(), BackendError> {
        let fault = self.faults.lock().await.pop_front();
        let result = match fault {
            None => Ok(()),
            Some(Fault::Transient(message)) => Err(BackendError::transient(message)),
            Some(Fault::Statement(message)) => Err(BackendError::statement(message)),
        };
        if result.is_err() {
            self.record(statement, true).await;
        }
        result
    }

    async fn record(&self, statement: &str, failed: bool) {
        self.journal.lock().await.push(JournalEntry {
            statement: statement.to_string(),
            failed,
        });
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mock
    }

    fn dialect(&self) -> &dyn Dialect {
        &SqliteDialect
    }

    async fn fetch(&self, statement: &str) -> Result<Vec<Row>, BackendError> {
        self.before_call(statement).await?;
        let result = self.inner.fetch(statement).await;
        self.record(statement, result.is_err()).await;
        result
    }

    async fn execute(&self, statement: &str) -> Result<u64, BackendError> {
        self.before_call(statement).await?;
        let result = self.inner.execute(statement).await;
        self.record(statement, result.is_err()).await;
        result
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
