use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{Memory, MemoryStats, MemoryUpdate, NewMemory, TagSet};

/// Repository trait for agent memories
///
/// Retrieval by tags or text is a *recall*: every returned memory has its
/// counter incremented and its last-recall timestamp refreshed. Expired
/// memories are never returned but stay in storage until
/// [`purge_expired`](MemoryRepository::purge_expired) runs.
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    async fn store(&self, memory: NewMemory) -> DomainResult<Memory>;

    /// Memories whose tag set intersects `tags`, newest first.
    async fn retrieve_by_tags(
        &self,
        agent: &str,
        tags: &TagSet,
        limit: u32,
    ) -> DomainResult<Vec<Memory>>;

    /// Case-insensitive substring match on label or body, newest first.
    async fn search_text(&self, agent: &str, substring: &str, limit: u32)
        -> DomainResult<Vec<Memory>>;

    /// Apply a partial update. Returns `false` if the memory does not exist.
    async fn update(&self, memory_id: i64, update: MemoryUpdate) -> DomainResult<bool>;

    /// Hard delete. Returns `false` if the memory does not exist.
    async fn delete(&self, memory_id: i64) -> DomainResult<bool>;

    async fn stats(&self, agent: &str) -> DomainResult<MemoryStats>;

    /// Fetch without recall side effects.
    async fn get(&self, memory_id: i64) -> DomainResult<Option<Memory>>;

    /// Newest memories for display, without recall side effects.
    async fn recent(&self, agent: &str, limit: u32) -> DomainResult<Vec<Memory>>;

    /// Delete memories whose expiry is at or before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> DomainResult<u64>;
}
