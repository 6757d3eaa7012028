//! Agent registry (`ai_agents`) and grants (`ai_agent_grants`).

use async_trait::async_trait;

use super::row_ext::RowExt;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Agent, Grant, ModelEndpoint, Row, SqlValue};
use crate::domain::ports::{AgentRepository, GrantRepository};
use crate::services::ResilientStore;

const AGENT_COLUMNS: &str = "agent, description, model_api, model, poll_interval_secs";

#[derive(Debug, Clone)]
pub struct SqlAgentRepository {
    store: ResilientStore,
}

impl SqlAgentRepository {
    pub const fn new(store: ResilientStore) -> Self {
        Self { store }
    }

    async fn select(&self, statement: &str) -> DomainResult<Vec<Agent>> {
        self.store
            .execute_read(statement)
            .await?
            .iter()
            .map(Agent::try_from)
            .collect()
    }
}

fn interval_value(secs: u64) -> SqlValue {
    SqlValue::Integer(i64::try_from(secs).unwrap_or(i64::MAX))
}

impl TryFrom<&Row> for Agent {
    type Error = DomainError;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        let interval = row.int("poll_interval_secs")?;
        Ok(Self {
            name: row.text("agent")?,
            description: row.opt_text("description").unwrap_or_default(),
            endpoint: ModelEndpoint::new(row.text("model_api")?, row.text("model")?),
            poll_interval_secs: u64::try_from(interval).map_err(|_| {
                DomainError::DataError(format!("negative poll interval: {interval}"))
            })?,
        })
    }
}

#[async_trait]
impl AgentRepository for SqlAgentRepository {
    async fn get(&self, name: &str) -> DomainResult<Option<Agent>> {
        Ok(self
            .select(&format!(
                "SELECT {AGENT_COLUMNS} FROM ai_agents WHERE agent = {}",
                self.store.escape(&SqlValue::from(name), true)
            ))
            .await?
            .into_iter()
            .next())
    }

    async fn list(&self) -> DomainResult<Vec<Agent>> {
        self.select(&format!("SELECT {AGENT_COLUMNS} FROM ai_agents ORDER BY agent"))
            .await
    }

    async fn upsert(&self, agent: &Agent) -> DomainResult<()> {
        if agent.name.trim().is_empty() {
            return Err(DomainError::ValidationFailed("agent name is required".into()));
        }
        let row = Row::from([
            ("agent".to_string(), SqlValue::from(agent.name.as_str())),
            ("description".to_string(), SqlValue::from(agent.description.as_str())),
            ("model_api".to_string(), SqlValue::from(agent.endpoint.provider.as_str())),
            ("model".to_string(), SqlValue::from(agent.endpoint.model.as_str())),
            ("poll_interval_secs".to_string(), interval_value(agent.poll_interval_secs)),
        ]);
        self.store.upsert("ai_agents", vec![row], &["agent"]).await?;
        Ok(())
    }

    async fn set_poll_interval(&self, name: &str, poll_interval_secs: u64) -> DomainResult<bool> {
        if poll_interval_secs == 0 {
            return Err(DomainError::ValidationFailed(
                "poll interval must be positive".into(),
            ));
        }
        let changed = self
            .store
            .execute_write(&format!(
                "UPDATE ai_agents SET poll_interval_secs = {} WHERE agent = {}",
                self.store.escape(&interval_value(poll_interval_secs), true),
                self.store.escape(&SqlValue::from(name), true)
            ))
            .await?;
        Ok(changed > 0)
    }
}

#[derive(Debug, Clone)]
pub struct SqlGrantRepository {
    store: ResilientStore,
}

impl SqlGrantRepository {
    pub const fn new(store: ResilientStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl GrantRepository for SqlGrantRepository {
    async fn grants_for(&self, agent: &str) -> DomainResult<Vec<Grant>> {
        self.store
            .execute_read(&format!(
                "SELECT agent, object_name, operation FROM ai_agent_grants WHERE agent = {} \
                 ORDER BY object_name, operation",
                self.store.escape(&SqlValue::from(agent), true)
            ))
            .await?
            .iter()
            .map(|row| {
                Ok(Grant::new(
                    row.text("agent")?,
                    row.text("object_name")?,
                    row.text("operation")?,
                ))
            })
            .collect()
    }

    async fn grant(&self, grant: &Grant) -> DomainResult<()> {
        let row = Row::from([
            ("agent".to_string(), SqlValue::from(grant.agent.as_str())),
            ("object_name".to_string(), SqlValue::from(grant.object_name.as_str())),
            ("operation".to_string(), SqlValue::from(grant.operation.as_str())),
        ]);
        self.store
            .upsert("ai_agent_grants", vec![row], &["agent", "object_name", "operation"])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockBackend;
    use crate::adapters::sql::Migrator;
    use crate::services::retry::RetryPolicy;
    use std::sync::Arc;

    async fn store() -> ResilientStore {
        let backend = Arc::new(MockBackend::empty().await.unwrap());
        let store = ResilientStore::new(backend, RetryPolicy::new(1, 1, 1));
        Migrator::new(store.clone()).run().await.unwrap();
        store
    }

    fn agent(name: &str) -> Agent {
        Agent::new(name, "test agent", ModelEndpoint::new("mock", "echo"), 3)
    }

    #[tokio::test]
    async fn test_upsert_replaces_entry() {
        let repo = SqlAgentRepository::new(store().await);
        repo.upsert(&agent("QueryBot")).await.unwrap();
        let mut changed = agent("QueryBot");
        changed.description = "updated".into();
        repo.upsert(&changed).await.unwrap();

        let agents = repo.list().await.unwrap();
        assert_eq!(agents, vec![changed]);
    }

    #[tokio::test]
    async fn test_set_poll_interval() {
        let repo = SqlAgentRepository::new(store().await);
        repo.upsert(&agent("QueryBot")).await.unwrap();

        assert!(repo.set_poll_interval("QueryBot", 9).await.unwrap());
        assert!(!repo.set_poll_interval("Nobody", 9).await.unwrap());
        assert!(repo.set_poll_interval("QueryBot", 0).await.is_err());
        assert_eq!(repo.get("QueryBot").await.unwrap().unwrap().poll_interval_secs, 9);
    }

    #[tokio::test]
    async fn test_grant_is_idempotent() {
        let repo = SqlGrantRepository::new(store().await);
        let grant = Grant::new("QueryBot", "*", "select");
        repo.grant(&grant).await.unwrap();
        repo.grant(&grant).await.unwrap();

        let grants = repo.grants_for("QueryBot").await.unwrap();
        assert_eq!(grants, vec![Grant::new("QueryBot", "*", "SELECT")]);
        assert!(repo.grants_for("Other").await.unwrap().is_empty());
    }
}
