use serde_json::json;

use super::params::Params;
use super::{HandlerResult, ToolCatalog, ToolContext};
use crate::domain::models::{Memory, MemoryUpdate, NewMemory, ToolResponse};

const DEFAULT_RECALL_LIMIT: u32 = 10;
const MAX_RECALL_LIMIT: u32 = 100;

impl ToolCatalog {
    /// The session identity, after checking any `agent_name` the caller echoed.
    pub(super) fn owner<'c>(
        &self,
        ctx: &'c ToolContext,
        params: &Params<'_>,
    ) -> Result<&'c str, ToolResponse> {
        match params.opt_str("agent_name").map(str::trim) {
            Some(claimed) if !claimed.is_empty() && claimed != ctx.agent => {
                Err(ToolResponse::permission(format!(
                    "agent_name '{claimed}' does not match the session identity '{}'",
                    ctx.agent
                )))
            }
            _ => Ok(ctx.agent.as_str()),
        }
    }

    /// Load a memory the caller owns.
    async fn owned_memory(&self, agent: &str, memory_id: i64) -> Result<Memory, ToolResponse> {
        let memory = self
            .memories
            .get(memory_id)
            .await?
            .ok_or_else(|| ToolResponse::not_found(format!("memory {memory_id} not found")))?;
        if memory.agent == agent {
            Ok(memory)
        } else {
            Err(ToolResponse::permission(format!(
                "memory {memory_id} belongs to another agent"
            )))
        }
    }

    pub(super) async fn store_memory(&self, ctx: &ToolContext, params: &Params<'_>) -> HandlerResult {
        let agent = self.owner(ctx, params)?;
        let memory = self
            .memories
            .store(NewMemory {
                agent: agent.to_string(),
                label: params.str("memory_label")?.to_string(),
                body: params.str("memory_content")?.to_string(),
                tags: params.tags("related_to_tags")?,
                expires_at: params.opt_datetime("purge_after")?,
            })
            .await?;
        Ok(json!({
            "memory_id": memory.id,
            "memory": memory,
        }))
    }

    pub(super) async fn retrieve_memories(
        &self,
        ctx: &ToolContext,
        params: &Params<'_>,
    ) -> HandlerResult {
        let agent = self.owner(ctx, params)?;
        let tags = params.tags("related_to_tags")?;
        let limit = params.count("limit", DEFAULT_RECALL_LIMIT, MAX_RECALL_LIMIT)?;
        let memories = self.memories.retrieve_by_tags(agent, &tags, limit).await?;
        Ok(json!({
            "tags": tags,
            "count": memories.len(),
            "memories": memories,
        }))
    }

    pub(super) async fn search_memories(
        &self,
        ctx: &ToolContext,
        params: &Params<'_>,
    ) -> HandlerResult {
        let agent = self.owner(ctx, params)?;
        let text = params.str("search_text")?;
        let limit = params.count("limit", DEFAULT_RECALL_LIMIT, MAX_RECALL_LIMIT)?;
        let memories = self.memories.search_text(agent, text, limit).await?;
        Ok(json!({
            "search_text": text,
            "count": memories.len(),
            "memories": memories,
        }))
    }

    pub(super) async fn update_memory(&self, ctx: &ToolContext, params: &Params<'_>) -> HandlerResult {
        let agent = self.owner(ctx, params)?;
        let memory_id = params.int("memory_id")?;
        let update = MemoryUpdate {
            body: params.opt_str("memory_content").map(str::to_string),
            tags: params.opt_tags("related_to_tags"),
        };
        if update.is_empty() {
            return Err(ToolResponse::validation(
                "update_memory: supply memory_content or related_to_tags",
            ));
        }
        self.owned_memory(agent, memory_id).await?;
        if !self.memories.update(memory_id, update).await? {
            return Err(ToolResponse::not_found(format!("memory {memory_id} not found")));
        }
        let memory = self.memories.get(memory_id).await?;
        Ok(json!({
            "memory_id": memory_id,
            "updated": true,
            "memory": memory,
        }))
    }

    pub(super) async fn delete_memory(&self, ctx: &ToolContext, params: &Params<'_>) -> HandlerResult {
        let agent = self.owner(ctx, params)?;
        let memory_id = params.int("memory_id")?;
        self.owned_memory(agent, memory_id).await?;
        let deleted = self.memories.delete(memory_id).await?;
        Ok(json!({
            "memory_id": memory_id,
            "deleted": deleted,
        }))
    }

    pub(super) async fn get_memory_stats(
        &self,
        ctx: &ToolContext,
        params: &Params<'_>,
    ) -> HandlerResult {
        let agent = self.owner(ctx, params)?;
        let stats = self.memories.stats(agent).await?;
        serde_json::to_value(stats).map_err(|e| ToolResponse::storage(e.to_string()))
    }
}
