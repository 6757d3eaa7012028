//! Versioned schema management over the resilient store.
//!
//! Migrations are rendered per dialect so every backend ends up with the same
//! tables, differing only in native type names.

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use super::row_ext::RowExt;
use crate::domain::errors::StoreError;
use crate::domain::models::{quote_literal, SqlValue};
use crate::domain::ports::Dialect;
use crate::services::ResilientStore;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Failed to execute migration {version}: {source}")]
    ExecutionError {
        version: i64,
        #[source]
        source: StoreError,
    },
    #[error("Failed to get schema version: {0}")]
    VersionCheckError(#[source] StoreError),
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub statements: Vec<String>,
}

pub struct Migrator {
    store: ResilientStore,
}

impl Migrator {
    pub const fn new(store: ResilientStore) -> Self {
        Self { store }
    }

    /// Apply every embedded migration newer than the recorded version.
    pub async fn run(&self) -> Result<usize, MigrationError> {
        let migrations = all_migrations(self.store.dialect());
        self.run_migrations(migrations).await
    }

    pub async fn run_migrations(&self, migrations: Vec<Migration>) -> Result<usize, MigrationError> {
        self.ensure_migrations_table().await?;
        let current_version = self.current_version().await?;
        let pending: Vec<_> = migrations
            .into_iter()
            .filter(|m| m.version > current_version)
            .collect();

        for migration in &pending {
            self.apply(migration).await?;
            info!(version = migration.version, description = migration.description, "migration applied");
        }

        Ok(pending.len())
    }

    async fn ensure_migrations_table(&self) -> Result<(), MigrationError> {
        let statement = format!(
            "CREATE TABLE IF NOT EXISTS triai_schema_migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at {} NOT NULL
            )",
            self.store.dialect().timestamp_type()
        );
        self.store
            .execute_write(&statement)
            .await
            .map_err(|source| MigrationError::ExecutionError { version: 0, source })?;
        Ok(())
    }

    pub async fn current_version(&self) -> Result<i64, MigrationError> {
        let rows = self
            .store
            .execute_read("SELECT COALESCE(MAX(version), 0) AS version FROM triai_schema_migrations")
            .await
            .map_err(MigrationError::VersionCheckError)?;
        Ok(rows.first().and_then(|r| r.int("version").ok()).unwrap_or(0))
    }

    async fn apply(&self, migration: &Migration) -> Result<(), MigrationError> {
        let fail = |source| MigrationError::ExecutionError {
            version: migration.version,
            source,
        };
        for statement in &migration.statements {
            self.store.execute_write(statement).await.map_err(fail)?;
        }
        let record = format!(
            "INSERT INTO triai_schema_migrations (version, description, applied_at) VALUES ({}, {}, {})",
            migration.version,
            quote_literal(migration.description),
            self.store.escape(&SqlValue::Timestamp(Utc::now()), true),
        );
        self.store.execute_write(&record).await.map_err(fail)?;
        Ok(())
    }
}

pub fn messaging_schema_migration(dialect: &dyn Dialect) -> Migration {
    let id = dialect.identity_column();
    let ts = dialect.timestamp_type();
    let text = dialect.text_type();
    Migration {
        version: 1,
        description: "Agent registry, message log and query history",
        statements: vec![
            format!(
                "CREATE TABLE IF NOT EXISTS ai_agents (
                    agent {text} PRIMARY KEY,
                    description {text} NOT NULL DEFAULT '',
                    model_api {text} NOT NULL,
                    model {text} NOT NULL,
                    poll_interval_secs INTEGER NOT NULL
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS ai_messages (
                    message_id {id},
                    posted {ts} NOT NULL,
                    user_from {text} NOT NULL,
                    user_to {text} NOT NULL,
                    message {text} NOT NULL,
                    user_read {ts}
                )"
            ),
            "CREATE INDEX IF NOT EXISTS idx_ai_messages_recipient ON ai_messages (user_to, user_read)"
                .to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS ai_query_history (
                    query_id {id},
                    agent {text} NOT NULL,
                    database_name {text} NOT NULL,
                    sql_query {text} NOT NULL,
                    executed_at {ts} NOT NULL,
                    row_count INTEGER NOT NULL,
                    execution_time_ms INTEGER NOT NULL
                )"
            ),
            "CREATE INDEX IF NOT EXISTS idx_ai_query_history_agent ON ai_query_history (agent, executed_at)"
                .to_string(),
        ],
    }
}

pub fn memory_schema_migration(dialect: &dyn Dialect) -> Migration {
    let id = dialect.identity_column();
    let ts = dialect.timestamp_type();
    let text = dialect.text_type();
    Migration {
        version: 2,
        description: "Tagged agent memories and agent grants",
        statements: vec![
            format!(
                "CREATE TABLE IF NOT EXISTS ai_memories (
                    memory_id {id},
                    agent {text} NOT NULL,
                    first_posted {ts} NOT NULL,
                    times_recalled INTEGER NOT NULL DEFAULT 0,
                    last_recalled {ts},
                    memory_label {text} NOT NULL,
                    memory {text} NOT NULL,
                    related_to {text} NOT NULL DEFAULT '',
                    purge_after {ts}
                )"
            ),
            "CREATE INDEX IF NOT EXISTS idx_ai_memories_agent ON ai_memories (agent, first_posted)"
                .to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS ai_memory_tags (
                    memory_id BIGINT NOT NULL REFERENCES ai_memories (memory_id) ON DELETE CASCADE,
                    tag {text} NOT NULL,
                    PRIMARY KEY (memory_id, tag)
                )"
            ),
            "CREATE INDEX IF NOT EXISTS idx_ai_memory_tags_tag ON ai_memory_tags (tag)".to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS ai_agent_grants (
                    agent {text} NOT NULL,
                    object_name {text} NOT NULL,
                    operation {text} NOT NULL,
                    PRIMARY KEY (agent, object_name, operation)
                )"
            ),
        ],
    }
}

pub fn all_migrations(dialect: &dyn Dialect) -> Vec<Migration> {
    vec![
        messaging_schema_migration(dialect),
        memory_schema_migration(dialect),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockBackend;
    use crate::services::retry::RetryPolicy;
    use std::sync::Arc;

    async fn store() -> ResilientStore {
        let backend = Arc::new(MockBackend::empty().await.unwrap());
        ResilientStore::new(backend, RetryPolicy::new(1, 1, 1))
    }

    #[tokio::test]
    async fn test_migrations_apply_once() {
        let store = store().await;
        let migrator = Migrator::new(store.clone());

        assert_eq!(migrator.run().await.unwrap(), 2);
        assert_eq!(migrator.current_version().await.unwrap(), 2);
        assert_eq!(migrator.run().await.unwrap(), 0);

        let tables = store
            .execute_read("SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'ai_%' ORDER BY name")
            .await
            .unwrap();
        let names: Vec<String> = tables.iter().map(|r| r.text("name").unwrap()).collect();
        assert_eq!(
            names,
            vec![
                "ai_agent_grants",
                "ai_agents",
                "ai_memories",
                "ai_memory_tags",
                "ai_messages",
                "ai_query_history"
            ]
        );
    }

    #[test]
    fn test_postgres_rendering_uses_native_types() {
        let migration = messaging_schema_migration(&crate::adapters::postgres::PostgresDialect);
        assert!(migration.statements[1].contains("BIGSERIAL PRIMARY KEY"));
        assert!(migration.statements[1].contains("TIMESTAMPTZ"));
    }
}
