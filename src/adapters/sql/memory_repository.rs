//! Agent memories in `ai_memories`, with tags in the `ai_memory_tags` join table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use super::row_ext::RowExt;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Memory, MemoryStats, MemoryUpdate, NewMemory, Row, SqlValue, TagFrequency, TagSet,
};
use crate::domain::ports::MemoryRepository;
use crate::services::ResilientStore;

const COLUMNS: &str = "memory_id, agent, first_posted, times_recalled, last_recalled, \
                       memory_label, memory, related_to, purge_after";

#[derive(Debug, Clone)]
pub struct SqlMemoryRepository {
    store: ResilientStore,
}

impl SqlMemoryRepository {
    pub const fn new(store: ResilientStore) -> Self {
        Self { store }
    }

    fn literal(&self, value: impl Into<SqlValue>) -> String {
        self.store.escape(&value.into(), true)
    }

    async fn select(&self, statement: &str) -> DomainResult<Vec<Memory>> {
        self.store
            .execute_read(statement)
            .await?
            .iter()
            .map(Memory::try_from)
            .collect()
    }

    async fn write_tags(&self, memory_id: i64, tags: &TagSet) -> DomainResult<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let rows: Vec<Row> = tags
            .iter()
            .map(|tag| {
                Row::from([
                    ("memory_id".to_string(), SqlValue::Integer(memory_id)),
                    ("tag".to_string(), SqlValue::from(tag)),
                ])
            })
            .collect();
        self.store.bulk_write("ai_memory_tags", rows, None).await?;
        Ok(())
    }

    /// Swap the join rows of `memory_id` for `tags`, putting `previous` back
    /// if the new rows cannot be written.
    async fn replace_tags(
        &self,
        memory_id: i64,
        tags: &TagSet,
        previous: &TagSet,
    ) -> DomainResult<()> {
        self.clear_tags(memory_id).await?;
        if let Err(err) = self.write_tags(memory_id, tags).await {
            self.restore_tags(memory_id, previous).await;
            return Err(err);
        }
        Ok(())
    }

    async fn clear_tags(&self, memory_id: i64) -> DomainResult<()> {
        self.store
            .execute_write(&format!(
                "DELETE FROM ai_memory_tags WHERE memory_id = {memory_id}"
            ))
            .await?;
        Ok(())
    }

    async fn restore_tags(&self, memory_id: i64, previous: &TagSet) {
        let restored = match self.clear_tags(memory_id).await {
            Ok(()) => self.write_tags(memory_id, previous).await,
            Err(err) => Err(err),
        };
        if let Err(err) = restored {
            warn!(memory_id, error = %err, "could not restore memory tags");
        }
    }

    /// Remove a memory whose tags could not be written.
    async fn discard(&self, memory_id: i64) {
        let removed = match self.clear_tags(memory_id).await {
            Ok(()) => self
                .store
                .execute_write(&format!("DELETE FROM ai_memories WHERE memory_id = {memory_id}"))
                .await
                .map_err(DomainError::from),
            Err(err) => Err(err),
        };
        if let Err(err) = removed {
            warn!(memory_id, error = %err, "could not discard partially stored memory");
        }
    }

    /// Bump the recall counter of every returned memory and mirror the change
    /// in the values handed back.
    async fn recall(&self, mut memories: Vec<Memory>) -> DomainResult<Vec<Memory>> {
        if memories.is_empty() {
            return Ok(memories);
        }
        let now = Utc::now();
        let ids = memories
            .iter()
            .map(|m| m.id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.store
            .execute_write(&format!(
                "UPDATE ai_memories SET times_recalled = times_recalled + 1, last_recalled = {} \
                 WHERE memory_id IN ({ids})",
                self.literal(now)
            ))
            .await?;
        for memory in &mut memories {
            memory.times_recalled += 1;
            memory.last_recalled = Some(now);
        }
        Ok(memories)
    }

    fn live_filter(&self, agent: &str) -> String {
        format!(
            "agent = {} AND (purge_after IS NULL OR purge_after > {})",
            self.literal(agent),
            self.literal(Utc::now())
        )
    }
}

impl TryFrom<&Row> for Memory {
    type Error = DomainError;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.int("memory_id")?,
            agent: row.text("agent")?,
            created_at: row.datetime("first_posted")?,
            times_recalled: row.int("times_recalled")?,
            last_recalled: row.opt_datetime("last_recalled")?,
            label: row.text("memory_label")?,
            body: row.opt_text("memory").unwrap_or_default(),
            tags: TagSet::parse(&row.opt_text("related_to").unwrap_or_default()),
            expires_at: row.opt_datetime("purge_after")?,
        })
    }
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
///
/// Case is left alone; queries fold both sides with the backend's `LOWER`.
pub fn like_pattern(substring: &str) -> String {
    let mut pattern = String::with_capacity(substring.len() + 2);
    pattern.push('%');
    for ch in substring.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl MemoryRepository for SqlMemoryRepository {
    async fn store(&self, memory: NewMemory) -> DomainResult<Memory> {
        if memory.agent.trim().is_empty() {
            return Err(DomainError::ValidationFailed("memory owner is required".into()));
        }
        if memory.label.trim().is_empty() {
            return Err(DomainError::ValidationFailed("memory label is required".into()));
        }
        let statement = format!(
            "INSERT INTO ai_memories \
             (agent, first_posted, times_recalled, memory_label, memory, related_to, purge_after) \
             VALUES ({}, {}, 0, {}, {}, {}, {}) RETURNING {COLUMNS}",
            self.literal(memory.agent.as_str()),
            self.literal(Utc::now()),
            self.literal(memory.label.as_str()),
            self.literal(memory.body.as_str()),
            self.literal(memory.tags.joined()),
            self.literal(memory.expires_at),
        );
        let stored = self
            .select(&statement)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::DataError("insert returned no memory row".into()))?;
        if let Err(err) = self.write_tags(stored.id, &stored.tags).await {
            self.discard(stored.id).await;
            return Err(err);
        }
        Ok(stored)
    }

    async fn retrieve_by_tags(
        &self,
        agent: &str,
        tags: &TagSet,
        limit: u32,
    ) -> DomainResult<Vec<Memory>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let tag_list = tags
            .iter()
            .map(|t| self.literal(t))
            .collect::<Vec<_>>()
            .join(", ");
        let matched = self
            .select(&format!(
                "SELECT {COLUMNS} FROM ai_memories WHERE {} \
                 AND memory_id IN (SELECT memory_id FROM ai_memory_tags WHERE tag IN ({tag_list})) \
                 ORDER BY first_posted DESC, memory_id DESC LIMIT {limit}",
                self.live_filter(agent)
            ))
            .await?;
        self.recall(matched).await
    }

    async fn search_text(
        &self,
        agent: &str,
        substring: &str,
        limit: u32,
    ) -> DomainResult<Vec<Memory>> {
        let pattern = self.literal(like_pattern(substring));
        let matched = self
            .select(&format!(
                "SELECT {COLUMNS} FROM ai_memories WHERE {} \
                 AND (LOWER(memory_label) LIKE LOWER({pattern}) ESCAPE '\\' \
                      OR LOWER(memory) LIKE LOWER({pattern}) ESCAPE '\\') \
                 ORDER BY first_posted DESC, memory_id DESC LIMIT {limit}",
                self.live_filter(agent)
            ))
            .await?;
        self.recall(matched).await
    }

    async fn update(&self, memory_id: i64, update: MemoryUpdate) -> DomainResult<bool> {
        let Some(current) = self.get(memory_id).await? else {
            return Ok(false);
        };
        let mut assignments = Vec::new();
        if let Some(body) = &update.body {
            assignments.push(format!("memory = {}", self.literal(body.as_str())));
        }
        if let Some(tags) = &update.tags {
            self.replace_tags(memory_id, tags, &current.tags).await?;
            assignments.push(format!("related_to = {}", self.literal(tags.joined())));
        }
        if assignments.is_empty() {
            return Ok(true);
        }
        let written = self
            .store
            .execute_write(&format!(
                "UPDATE ai_memories SET {} WHERE memory_id = {memory_id}",
                assignments.join(", ")
            ))
            .await;
        if let Err(err) = written {
            if update.tags.is_some() {
                self.restore_tags(memory_id, &current.tags).await;
            }
            return Err(err.into());
        }
        Ok(true)
    }

    async fn delete(&self, memory_id: i64) -> DomainResult<bool> {
        self.clear_tags(memory_id).await?;
        let deleted = self
            .store
            .execute_write(&format!("DELETE FROM ai_memories WHERE memory_id = {memory_id}"))
            .await?;
        Ok(deleted > 0)
    }

    async fn stats(&self, agent: &str) -> DomainResult<MemoryStats> {
        let owner = self.literal(agent);
        let totals = self
            .store
            .execute_read(&format!(
                "SELECT COUNT(*) AS total, \
                        COALESCE(SUM(CASE WHEN times_recalled = 0 THEN 1 ELSE 0 END), 0) AS unused, \
                        COALESCE(SUM(times_recalled), 0) AS recalls, \
                        COALESCE(MAX(times_recalled), 0) AS max_recalls \
                 FROM ai_memories WHERE agent = {owner}"
            ))
            .await?;
        let Some(totals) = totals.first() else {
            return Ok(MemoryStats {
                agent: agent.to_string(),
                ..MemoryStats::default()
            });
        };

        let total_memories = totals.int("total")?;
        let total_recalls = totals.int("recalls")?;
        #[allow(clippy::cast_precision_loss)]
        let average_recalls = if total_memories > 0 {
            total_recalls as f64 / total_memories as f64
        } else {
            0.0
        };

        let tag_frequencies = self
            .store
            .execute_read(&format!(
                "SELECT t.tag AS tag, COUNT(*) AS uses FROM ai_memory_tags t \
                 JOIN ai_memories m ON m.memory_id = t.memory_id \
                 WHERE m.agent = {owner} GROUP BY t.tag ORDER BY uses DESC, t.tag"
            ))
            .await?
            .iter()
            .map(|row| {
                Ok(TagFrequency {
                    tag: row.text("tag")?,
                    count: row.int("uses")?,
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;

        Ok(MemoryStats {
            agent: agent.to_string(),
            total_memories,
            unused_memories: totals.int("unused")?,
            total_recalls,
            max_recalls: totals.int("max_recalls")?,
            average_recalls,
            tag_frequencies,
        })
    }

    async fn get(&self, memory_id: i64) -> DomainResult<Option<Memory>> {
        Ok(self
            .select(&format!(
                "SELECT {COLUMNS} FROM ai_memories WHERE memory_id = {memory_id}"
            ))
            .await?
            .into_iter()
            .next())
    }

    async fn recent(&self, agent: &str, limit: u32) -> DomainResult<Vec<Memory>> {
        self.select(&format!(
            "SELECT {COLUMNS} FROM ai_memories WHERE agent = {} \
             ORDER BY first_posted DESC, memory_id DESC LIMIT {limit}",
            self.literal(agent)
        ))
        .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> DomainResult<u64> {
        let cutoff = self.literal(now);
        self.store
            .execute_write(&format!(
                "DELETE FROM ai_memory_tags WHERE memory_id IN \
                 (SELECT memory_id FROM ai_memories WHERE purge_after IS NOT NULL AND purge_after <= {cutoff})"
            ))
            .await?;
        Ok(self
            .store
            .execute_write(&format!(
                "DELETE FROM ai_memories WHERE purge_after IS NOT NULL AND purge_after <= {cutoff}"
            ))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockBackend;
    use crate::adapters::sql::Migrator;
    use crate::services::retry::RetryPolicy;
    use chrono::Duration;
    use std::sync::Arc;

    async fn repo() -> SqlMemoryRepository {
        let backend = Arc::new(MockBackend::empty().await.unwrap());
        let store = ResilientStore::new(backend, RetryPolicy::new(1, 1, 1));
        Migrator::new(store.clone()).run().await.unwrap();
        SqlMemoryRepository::new(store)
    }

    fn new_memory(label: &str, tags: &str) -> NewMemory {
        NewMemory {
            agent: "QueryBot".into(),
            label: label.into(),
            body: format!("{label} body"),
            tags: TagSet::parse(tags),
            expires_at: None,
        }
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_a\\B"), "%50\\%\\_a\\\\B%");
    }

    #[tokio::test]
    async fn test_store_normalizes_tags() {
        let repo = repo().await;
        let stored = repo.store(new_memory("Prefs", "Report billing billing")).await.unwrap();
        assert_eq!(stored.tags.joined(), "billing report");
        assert_eq!(stored.times_recalled, 0);
    }

    #[tokio::test]
    async fn test_expired_memories_are_hidden_then_purged() {
        let repo = repo().await;
        let mut expired = new_memory("old", "billing");
        expired.expires_at = Some(Utc::now() - Duration::hours(1));
        let expired = repo.store(expired).await.unwrap();
        repo.store(new_memory("fresh", "billing")).await.unwrap();

        let found = repo
            .retrieve_by_tags("QueryBot", &TagSet::parse("billing"), 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].label, "fresh");

        assert_eq!(repo.purge_expired(Utc::now()).await.unwrap(), 1);
        assert!(repo.get(expired.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_text_is_case_insensitive_and_literal() {
        let repo = repo().await;
        repo.store(new_memory("Margin is 50% net", "finance")).await.unwrap();
        repo.store(new_memory("Margin is 50 net", "finance")).await.unwrap();

        let found = repo.search_text("QueryBot", "50%", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].times_recalled, 1);

        let found = repo.search_text("QueryBot", "MARGIN", 10).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_update_replaces_tags() {
        let repo = repo().await;
        let stored = repo.store(new_memory("m", "a b")).await.unwrap();
        let changed = repo
            .update(
                stored.id,
                MemoryUpdate {
                    body: Some("new body".into()),
                    tags: Some(TagSet::parse("c")),
                },
            )
            .await
            .unwrap();
        assert!(changed);

        let found = repo.retrieve_by_tags("QueryBot", &TagSet::parse("a"), 10).await.unwrap();
        assert!(found.is_empty());
        let found = repo.retrieve_by_tags("QueryBot", &TagSet::parse("c"), 10).await.unwrap();
        assert_eq!(found[0].body, "new body");
        assert!(!repo.update(999, MemoryUpdate::default()).await.unwrap());
    }

    #[tokio::test]
    async fn test_stats_counts_recalls_and_tags() {
        let repo = repo().await;
        repo.store(new_memory("one", "billing report")).await.unwrap();
        repo.store(new_memory("two", "billing")).await.unwrap();
        repo.store(new_memory("three", "hr")).await.unwrap();
        repo.retrieve_by_tags("QueryBot", &TagSet::parse("billing"), 10)
            .await
            .unwrap();

        let stats = repo.stats("QueryBot").await.unwrap();
        assert_eq!(stats.total_memories, 3);
        assert_eq!(stats.unused_memories, 1);
        assert_eq!(stats.total_recalls, 2);
        assert_eq!(stats.max_recalls, 1);
        assert!((stats.average_recalls - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.tag_frequencies[0], TagFrequency { tag: "billing".into(), count: 2 });
        assert_eq!(stats.tag_frequencies.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_is_hard() {
        let repo = repo().await;
        let stored = repo.store(new_memory("gone", "x")).await.unwrap();
        assert!(repo.delete(stored.id).await.unwrap());
        assert!(!repo.delete(stored.id).await.unwrap());
        assert!(repo.stats("QueryBot").await.unwrap().tag_frequencies.is_empty());
    }

    async fn reject_boom_tags(repo: &SqlMemoryRepository) {
        repo.store
            .execute_write(
                "CREATE TRIGGER reject_boom BEFORE INSERT ON ai_memory_tags \
                 WHEN NEW.tag = 'boom' BEGIN SELECT RAISE(ABORT, 'tag rejected'); END",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_tag_write_leaves_no_memory_behind() {
        let repo = repo().await;
        reject_boom_tags(&repo).await;

        for _ in 0..2 {
            assert!(repo.store(new_memory("Invoices", "boom billing")).await.is_err());
        }

        let stats = repo.stats("QueryBot").await.unwrap();
        assert_eq!(stats.total_memories, 0);
        assert!(stats.tag_frequencies.is_empty());
        assert!(repo.recent("QueryBot", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_tag_update_keeps_previous_tags() {
        let repo = repo().await;
        let stored = repo.store(new_memory("Invoices", "billing")).await.unwrap();
        reject_boom_tags(&repo).await;

        let update = MemoryUpdate {
            body: Some("rewritten".into()),
            tags: Some(TagSet::parse("boom kpi")),
        };
        assert!(repo.update(stored.id, update).await.is_err());

        let current = repo.get(stored.id).await.unwrap().unwrap();
        assert_eq!(current.tags.joined(), "billing");
        assert_eq!(current.body, "Invoices body");
        let found = repo
            .retrieve_by_tags("QueryBot", &TagSet::parse("billing"), 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(repo
            .retrieve_by_tags("QueryBot", &TagSet::parse("kpi"), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_search_text_matches_non_ascii_text() {
        let repo = repo().await;
        repo.store(new_memory("Équipe finance", "team")).await.unwrap();

        let found = repo.search_text("QueryBot", "Équipe", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        let found = repo.search_text("QueryBot", "ÉQUIPE FIN", 10).await.unwrap();
        assert_eq!(found.len(), 1);
    }
}
