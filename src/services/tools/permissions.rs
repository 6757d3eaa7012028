use serde_json::json;

use super::params::Params;
use super::{HandlerResult, ToolCatalog, ToolContext};
use crate::domain::models::ToolResponse;

/// The only operation agent-issued SQL can perform.
const EXECUTABLE_OPERATION: &str = "SELECT";

impl ToolCatalog {
    pub(super) async fn check_permissions(
        &self,
        ctx: &ToolContext,
        params: &Params<'_>,
    ) -> HandlerResult {
        let database = self.resolve_database(params.str("database_name")?).await?;
        let object_name = params.identifier("object_name")?;
        let operation = params.str("operation")?.to_ascii_uppercase();
        if operation.split_whitespace().count() != 1 {
            return Err(ToolResponse::validation(
                "check_permissions: operation must be a single SQL keyword",
            ));
        }

        let (permitted, reason) = if operation == EXECUTABLE_OPERATION {
            let grants = self.grants.grants_for(&ctx.agent).await?;
            match grants.iter().find(|g| g.covers(object_name, &operation)) {
                Some(grant) => (
                    true,
                    format!("granted {} on {}", grant.operation, grant.object_name),
                ),
                None => (false, "no explicit grant".to_string()),
            }
        } else {
            (
                false,
                format!("agents may only execute {EXECUTABLE_OPERATION} statements"),
            )
        };

        Ok(json!({
            "permitted": permitted,
            "reason": reason,
            "agent": ctx.agent,
            "database": database,
            "object_name": object_name,
            "operation": operation,
        }))
    }
}
