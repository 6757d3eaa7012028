use chrono::Utc;
use serde_json::json;
use std::time::Instant;
use tracing::{info, warn};

use super::params::Params;
use super::{sql_guard, HandlerResult, ToolCatalog, ToolContext};
use crate::domain::models::{NewQueryHistory, ToolResponse};

const MAX_HISTORY_ENTRIES: u32 = 1000;

/// Row limit actually applied, and whether the request exceeded the ceiling.
pub(super) fn effective_limit(requested: Option<i64>, default: u32, ceiling: u32) -> (u32, bool) {
    let ceiling = ceiling.max(1);
    match requested {
        None => (default.clamp(1, ceiling), false),
        Some(n) if n > i64::from(ceiling) => (ceiling, true),
        Some(n) => (u32::try_from(n.max(1)).unwrap_or(1), false),
    }
}

impl ToolCatalog {
    pub(super) async fn execute_query(&self, ctx: &ToolContext, params: &Params<'_>) -> HandlerResult {
        let sql = params.str("sql_query")?;
        let check = sql_guard::validate(sql);
        if !check.valid {
            return Err(ToolResponse::validation(format!(
                "execute_query: {}",
                check.issues.join("; ")
            )));
        }
        let database = self.resolve_database(params.str("database_name")?).await?;
        let (limit, limit_capped) = effective_limit(
            params.opt_int("row_limit"),
            self.limits.default_row_limit,
            self.limits.max_row_limit,
        );

        let started = Instant::now();
        let bounded = format!(
            "SELECT * FROM (\n{}\n) AS bounded_query LIMIT {}",
            sql_guard::without_terminator(sql),
            u64::from(limit) + 1
        );
        let mut rows = self.store.execute_read(&bounded).await?;
        let execution_time_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let limit_len = usize::try_from(limit).unwrap_or(usize::MAX);
        let truncated = rows.len() > limit_len;
        rows.truncate(limit_len);
        let row_count = i64::try_from(rows.len()).unwrap_or(i64::MAX);

        info!(
            agent = %ctx.agent,
            database = %database,
            row_count,
            truncated,
            execution_time_ms,
            "query executed"
        );

        let entry = NewQueryHistory {
            agent: ctx.agent.clone(),
            database_name: database.clone(),
            sql_query: sql.to_string(),
            executed_at: Utc::now(),
            row_count,
            execution_time_ms,
        };
        if let Err(err) = self.history.record(entry).await {
            warn!(agent = %ctx.agent, error = %err, "failed to record query history");
        }

        Ok(json!({
            "database": database,
            "row_count": row_count,
            "truncated": truncated,
            "limit_capped": limit_capped,
            "row_limit": limit,
            "execution_time_ms": execution_time_ms,
            "results": rows,
        }))
    }

    pub(super) async fn validate_sql(&self, params: &Params<'_>) -> HandlerResult {
        let sql = params.str("sql_query")?;
        let database = match params.opt_str("database_name") {
            Some(name) => Some(self.resolve_database(name.trim()).await?),
            None => None,
        };
        let check = sql_guard::validate(sql);
        Ok(json!({
            "database": database,
            "valid": check.valid,
            "reason": check.reason,
            "issues": check.issues,
        }))
    }

    pub(super) async fn get_query_history(
        &self,
        ctx: &ToolContext,
        params: &Params<'_>,
    ) -> HandlerResult {
        let agent = self.owner(ctx, params)?;
        let limit = params.count(
            "limit",
            self.limits.history_limit,
            MAX_HISTORY_ENTRIES.max(self.limits.history_limit),
        )?;
        let queries = self.history.recent(agent, limit).await?;
        Ok(json!({
            "agent": agent,
            "count": queries.len(),
            "queries": queries,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_limit() {
        assert_eq!(effective_limit(None, 1000, 10000), (1000, false));
        assert_eq!(effective_limit(Some(5), 1000, 10000), (5, false));
        assert_eq!(effective_limit(Some(0), 1000, 10000), (1, false));
        assert_eq!(effective_limit(Some(-3), 1000, 10000), (1, false));
        assert_eq!(effective_limit(Some(50_000), 1000, 10000), (10000, true));
        assert_eq!(effective_limit(None, 20_000, 10000), (10000, false));
    }
}
