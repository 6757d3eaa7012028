//! Wires configuration into a running store, repositories, catalog and broker.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::agent_supervisor::{AgentSupervisor, LinkTarget};
use crate::adapters::mcp::BrokerHttpServer;
use crate::adapters::sql::{
    MigrationError, Migrator, SqlAgentRepository, SqlGrantRepository, SqlMemoryRepository,
    SqlMessageRepository, SqlQueryHistoryRepository,
};
use crate::adapters::{connect_backend, BackendConnectError};
use crate::domain::errors::DomainError;
use crate::domain::models::{Agent, Config, Grant, ModelEndpoint};
use crate::domain::ports::{AgentRepository, GrantRepository};
use crate::services::{
    MemorySweep, ResilientStore, RetryPolicy, SessionBroker, SweepConfig, ToolCatalog,
};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Connect(#[from] BackendConnectError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// What `prepare` changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareReport {
    pub migrations_applied: usize,
    pub agents_seeded: usize,
    pub grants_seeded: usize,
}

pub struct Runtime {
    config: Config,
    store: ResilientStore,
    agents: Arc<SqlAgentRepository>,
    grants: Arc<SqlGrantRepository>,
    memories: Arc<SqlMemoryRepository>,
    broker: Arc<SessionBroker>,
}

impl Runtime {
    /// Connect the configured backend and build every component on top of it.
    pub async fn connect(config: Config) -> Result<Self, RuntimeError> {
        let backend = connect_backend(&config.database).await?;
        let store = ResilientStore::new(backend, RetryPolicy::from_config(&config.retry))
            .with_chunk_size(config.database.chunk_size);
        Ok(Self::with_store(config, store))
    }

    /// Build on an existing store.
    pub fn with_store(config: Config, store: ResilientStore) -> Self {
        let agents = Arc::new(SqlAgentRepository::new(store.clone()));
        let grants = Arc::new(SqlGrantRepository::new(store.clone()));
        let memories = Arc::new(SqlMemoryRepository::new(store.clone()));
        let history = Arc::new(SqlQueryHistoryRepository::new(store.clone()));
        let catalog = ToolCatalog::new(
            store.clone(),
            memories.clone(),
            history.clone(),
            grants.clone(),
            config.tools.clone(),
            config.database.name.clone(),
        );
        let broker = Arc::new(SessionBroker::new(
            agents.clone(),
            Arc::new(SqlMessageRepository::new(store.clone())),
            memories.clone(),
            history,
            catalog,
            config.server.current_user.clone(),
        ));
        Self {
            config,
            store,
            agents,
            grants,
            memories,
            broker,
        }
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub const fn store(&self) -> &ResilientStore {
        &self.store
    }

    pub fn broker(&self) -> Arc<SessionBroker> {
        Arc::clone(&self.broker)
    }

    /// Apply pending migrations and upsert the configured agents and grants.
    pub async fn prepare(&self) -> Result<PrepareReport, RuntimeError> {
        let migrations_applied = Migrator::new(self.store.clone()).run().await?;
        let mut report = PrepareReport {
            migrations_applied,
            ..PrepareReport::default()
        };

        for seed in &self.config.agents.seed {
            let agent = Agent::new(
                seed.name.clone(),
                seed.description.clone(),
                ModelEndpoint::new(seed.model_api.clone(), seed.model.clone()),
                seed.poll_interval_secs
                    .unwrap_or(self.config.agents.default_poll_interval_secs),
            );
            self.agents.upsert(&agent).await?;
            report.agents_seeded += 1;
            for grant in &seed.grants {
                self.grants
                    .grant(&Grant::new(seed.name.clone(), grant.object.clone(), grant.operation.clone()))
                    .await?;
                report.grants_seeded += 1;
            }
            debug!(agent = %seed.name, grants = seed.grants.len(), "agent seeded");
        }

        info!(
            migrations = report.migrations_applied,
            agents = report.agents_seeded,
            grants = report.grants_seeded,
            "storage prepared"
        );
        Ok(report)
    }

    pub async fn agents(&self) -> Result<Vec<Agent>, RuntimeError> {
        Ok(self.agents.list().await?)
    }

    pub fn memory_sweep(&self) -> MemorySweep {
        MemorySweep::new(
            self.memories.clone(),
            SweepConfig::from(&self.config.maintenance),
        )
    }

    pub fn http_server(&self) -> BrokerHttpServer {
        BrokerHttpServer::new(self.broker(), &self.config.server, self.store.backend_kind())
    }

    /// Supervisor whose workers talk to this process's broker directly.
    pub fn local_supervisor(&self) -> AgentSupervisor {
        AgentSupervisor::new(
            LinkTarget::Local(self.broker()),
            self.config.agents.clone(),
            self.config.generators.clone(),
        )
    }

    /// Supervisor whose workers connect to `agents.broker_url`.
    pub fn remote_supervisor(&self) -> AgentSupervisor {
        AgentSupervisor::new(
            LinkTarget::Remote(self.config.agents.broker_url.clone()),
            self.config.agents.clone(),
            self.config.generators.clone(),
        )
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}
