use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Agent, Grant};

/// Registered agent identities.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn get(&self, name: &str) -> DomainResult<Option<Agent>>;

    /// All agents ordered by name.
    async fn list(&self) -> DomainResult<Vec<Agent>>;

    /// Insert or replace a registry entry.
    async fn upsert(&self, agent: &Agent) -> DomainResult<()>;

    async fn set_poll_interval(&self, name: &str, poll_interval_secs: u64) -> DomainResult<bool>;
}

/// Explicit per-agent permissions. Anything not granted is denied.
#[async_trait]
pub trait GrantRepository: Send + Sync {
    async fn grants_for(&self, agent: &str) -> DomainResult<Vec<Grant>>;

    /// Idempotent: granting twice leaves one grant.
    async fn grant(&self, grant: &Grant) -> DomainResult<()>;
}
