use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{NewQueryHistory, QueryHistoryRecord};

#[async_trait]
pub trait QueryHistoryRepository: Send + Sync {
    async fn record(&self, entry: NewQueryHistory) -> DomainResult<i64>;

    /// Most recent first.
    async fn recent(&self, agent: &str, limit: u32) -> DomainResult<Vec<QueryHistoryRecord>>;
}
