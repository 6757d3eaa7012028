//! Append-only query log in `ai_query_history`.

use async_trait::async_trait;

use super::row_ext::RowExt;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{NewQueryHistory, QueryHistoryRecord, Row, SqlValue};
use crate::domain::ports::QueryHistoryRepository;
use crate::services::ResilientStore;

#[derive(Debug, Clone)]
pub struct SqlQueryHistoryRepository {
    store: ResilientStore,
}

impl SqlQueryHistoryRepository {
    pub const fn new(store: ResilientStore) -> Self {
        Self { store }
    }
}

impl TryFrom<&Row> for QueryHistoryRecord {
    type Error = DomainError;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.int("query_id")?,
            agent: row.text("agent")?,
            database_name: row.text("database_name")?,
            sql_query: row.text("sql_query")?,
            executed_at: row.datetime("executed_at")?,
            row_count: row.int("row_count")?,
            execution_time_ms: row.int("execution_time_ms")?,
        })
    }
}

#[async_trait]
impl QueryHistoryRepository for SqlQueryHistoryRepository {
    async fn record(&self, entry: NewQueryHistory) -> DomainResult<i64> {
        let values = [
            SqlValue::from(entry.agent),
            SqlValue::from(entry.database_name),
            SqlValue::from(entry.sql_query),
            SqlValue::from(entry.executed_at),
            SqlValue::from(entry.row_count),
            SqlValue::from(entry.execution_time_ms),
        ]
        .iter()
        .map(|v| self.store.escape(v, true))
        .collect::<Vec<_>>()
        .join(", ");
        let rows = self
            .store
            .execute_read(&format!(
                "INSERT INTO ai_query_history \
                 (agent, database_name, sql_query, executed_at, row_count, execution_time_ms) \
                 VALUES ({values}) RETURNING query_id"
            ))
            .await?;
        rows.first()
            .ok_or_else(|| DomainError::DataError("insert returned no query id".into()))?
            .int("query_id")
    }

    async fn recent(&self, agent: &str, limit: u32) -> DomainResult<Vec<QueryHistoryRecord>> {
        self.store
            .execute_read(&format!(
                "SELECT query_id, agent, database_name, sql_query, executed_at, row_count, \
                        execution_time_ms \
                 FROM ai_query_history WHERE agent = {} \
                 ORDER BY executed_at DESC, query_id DESC LIMIT {limit}",
                self.store.escape(&SqlValue::from(agent), true)
            ))
            .await?
            .iter()
            .map(QueryHistoryRecord::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockBackend;
    use crate::adapters::sql::Migrator;
    use crate::services::retry::RetryPolicy;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_recent_is_newest_first_and_scoped() {
        let backend = Arc::new(MockBackend::empty().await.unwrap());
        let store = ResilientStore::new(backend, RetryPolicy::new(1, 1, 1));
        Migrator::new(store.clone()).run().await.unwrap();
        let repo = SqlQueryHistoryRepository::new(store);

        let start = Utc::now();
        for (i, agent) in ["QueryBot", "QueryBot", "ReportGen"].iter().enumerate() {
            repo.record(NewQueryHistory {
                agent: (*agent).to_string(),
                database_name: "triai".into(),
                sql_query: format!("SELECT {i}"),
                executed_at: start + Duration::seconds(i64::try_from(i).unwrap()),
                row_count: 1,
                execution_time_ms: 2,
            })
            .await
            .unwrap();
        }

        let recent = repo.recent("QueryBot", 10).await.unwrap();
        let queries: Vec<_> = recent.iter().map(|r| r.sql_query.as_str()).collect();
        assert_eq!(queries, vec!["SELECT 1", "SELECT 0"]);
    }
}
