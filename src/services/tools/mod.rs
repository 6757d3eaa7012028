//! The fixed tool catalog agents call through the session broker.
//!
//! [`ToolCatalog::dispatch`] validates parameters against each tool's
//! [`ToolSpec`] before any handler runs and always answers with a
//! [`ToolResponse`]; no failure escapes as an error.

mod introspection;
mod memory;
pub mod params;
mod permissions;
mod query;
pub mod sql_guard;

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, StoreError};
use crate::domain::models::{
    EffectClass, ParamKind, ParamSpec, ToolDescriptor, ToolResponse, ToolSpec, ToolsConfig,
};
use crate::domain::ports::{GrantRepository, MemoryRepository, QueryHistoryRepository};
use crate::services::ResilientStore;

pub use sql_guard::SqlValidation;

/// Identity of the caller, taken from the authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolContext {
    pub agent: String,
}

impl ToolContext {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
        }
    }
}

type HandlerResult = Result<Value, ToolResponse>;

const fn param(
    name: &'static str,
    kind: ParamKind,
    required: bool,
    description: &'static str,
) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required,
        description,
    }
}

const DATABASE: ParamSpec = param("database_name", ParamKind::String, true, "Database to use");
const TABLE: ParamSpec = param("table_name", ParamKind::String, true, "Table or view name");
const AGENT_NAME: ParamSpec = param(
    "agent_name",
    ParamKind::String,
    false,
    "Calling agent; must match the session identity",
);
const LIMIT: ParamSpec = param("limit", ParamKind::Integer, false, "Maximum results (default 10)");

/// Every tool the catalog exposes, in listing order.
pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "list_databases",
        description: "List the databases available to query",
        effect: EffectClass::Introspection,
        params: &[],
    },
    ToolSpec {
        name: "connect_to_database",
        description: "Check that a database is reachable and report its backend",
        effect: EffectClass::Introspection,
        params: &[DATABASE],
    },
    ToolSpec {
        name: "get_schema_info",
        description: "List tables and views in a database",
        effect: EffectClass::Introspection,
        params: &[
            DATABASE,
            param(
                "object_types",
                ParamKind::StringList,
                false,
                "Subset of [\"tables\", \"views\"] (default both)",
            ),
        ],
    },
    ToolSpec {
        name: "describe_table",
        description: "Describe the columns of a table, optionally with sample rows",
        effect: EffectClass::Introspection,
        params: &[
            DATABASE,
            TABLE,
            param(
                "include_sample_data",
                ParamKind::Boolean,
                false,
                "Include up to 5 sample rows",
            ),
        ],
    },
    ToolSpec {
        name: "sample_table",
        description: "Return the first rows of a table",
        effect: EffectClass::Introspection,
        params: &[
            DATABASE,
            TABLE,
            param("row_count", ParamKind::Integer, false, "Rows to return (default 10)"),
            param("columns", ParamKind::StringList, false, "Columns to include (default all)"),
        ],
    },
    ToolSpec {
        name: "get_column_stats",
        description: "Counts, distinct values, range and most common value of a column",
        effect: EffectClass::Introspection,
        params: &[
            DATABASE,
            TABLE,
            param("column_name", ParamKind::String, true, "Column to summarize"),
        ],
    },
    ToolSpec {
        name: "get_table_relationships",
        description: "Foreign-key relationships, for one table or the whole database",
        effect: EffectClass::Introspection,
        params: &[
            DATABASE,
            param("table_name", ParamKind::String, false, "Restrict to this table"),
        ],
    },
    ToolSpec {
        name: "execute_query",
        description: "Run a read-only SELECT and return its rows",
        effect: EffectClass::Query,
        params: &[
            DATABASE,
            param("sql_query", ParamKind::String, true, "A single SELECT statement"),
            param("row_limit", ParamKind::Integer, false, "Maximum rows to return"),
        ],
    },
    ToolSpec {
        name: "validate_sql",
        description: "Check whether a query would be accepted by execute_query",
        effect: EffectClass::Validation,
        params: &[
            param("sql_query", ParamKind::String, true, "Statement to check"),
            param("database_name", ParamKind::String, false, "Database the query targets"),
        ],
    },
    ToolSpec {
        name: "check_permissions",
        description: "Check whether the calling agent may perform an operation on an object",
        effect: EffectClass::Permission,
        params: &[
            DATABASE,
            param("object_name", ParamKind::String, true, "Table or view name"),
            param("operation", ParamKind::String, true, "SQL operation, e.g. SELECT"),
        ],
    },
    ToolSpec {
        name: "store_memory",
        description: "Store a tagged long-term memory",
        effect: EffectClass::Memory,
        params: &[
            param("memory_label", ParamKind::String, true, "Short title"),
            param("memory_content", ParamKind::String, true, "What to remember"),
            param("related_to_tags", ParamKind::Tags, true, "Tags for later retrieval"),
            param("purge_after", ParamKind::String, false, "RFC 3339 expiry time"),
            AGENT_NAME,
        ],
    },
    ToolSpec {
        name: "retrieve_memories",
        description: "Recall memories sharing any of the given tags",
        effect: EffectClass::Memory,
        params: &[
            param("related_to_tags", ParamKind::Tags, true, "Tags to match"),
            LIMIT,
            AGENT_NAME,
        ],
    },
    ToolSpec {
        name: "search_memories",
        description: "Recall memories whose label or content contains the text",
        effect: EffectClass::Memory,
        params: &[
            param("search_text", ParamKind::String, true, "Case-insensitive substring"),
            LIMIT,
            AGENT_NAME,
        ],
    },
    ToolSpec {
        name: "update_memory",
        description: "Change the content or tags of one of your memories",
        effect: EffectClass::Memory,
        params: &[
            param("memory_id", ParamKind::Integer, true, "Memory to change"),
            param("memory_content", ParamKind::String, false, "New content"),
            param("related_to_tags", ParamKind::Tags, false, "Replacement tags"),
            AGENT_NAME,
        ],
    },
    ToolSpec {
        name: "delete_memory",
        description: "Delete one of your memories",
        effect: EffectClass::Memory,
        params: &[
            param("memory_id", ParamKind::Integer, true, "Memory to delete"),
            AGENT_NAME,
        ],
    },
    ToolSpec {
        name: "get_memory_stats",
        description: "Summarize your memory usage",
        effect: EffectClass::Memory,
        params: &[AGENT_NAME],
    },
    ToolSpec {
        name: "get_query_history",
        description: "Your most recent executed queries",
        effect: EffectClass::History,
        params: &[
            param("limit", ParamKind::Integer, false, "Maximum entries (default 50)"),
            AGENT_NAME,
        ],
    },
];

pub fn spec(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|t| t.name == name)
}

pub fn tool_names() -> Vec<String> {
    TOOLS.iter().map(|t| t.name.to_string()).collect()
}

pub fn descriptors() -> Vec<ToolDescriptor> {
    TOOLS.iter().map(ToolDescriptor::from).collect()
}

impl From<DomainError> for ToolResponse {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::ValidationFailed(_) => Self::validation(err.to_string()),
            DomainError::PermissionDenied(_) => Self::permission(err.to_string()),
            DomainError::AgentNotFound(_)
            | DomainError::MessageNotFound(_)
            | DomainError::MemoryNotFound(_) => Self::not_found(err.to_string()),
            DomainError::Storage(store) => store.into(),
            DomainError::DataError(_) | DomainError::SerializationError(_) => {
                Self::storage(err.to_string())
            }
        }
    }
}

impl From<StoreError> for ToolResponse {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidInput(_) => Self::validation(err.to_string()),
            StoreError::Statement { .. } | StoreError::RetriesExhausted { .. } => {
                Self::storage(err.to_string())
            }
        }
    }
}

#[derive(Clone)]
pub struct ToolCatalog {
    store: ResilientStore,
    memories: Arc<dyn MemoryRepository>,
    history: Arc<dyn QueryHistoryRepository>,
    grants: Arc<dyn GrantRepository>,
    limits: ToolsConfig,
    home_database: String,
}

impl ToolCatalog {
    pub fn new(
        store: ResilientStore,
        memories: Arc<dyn MemoryRepository>,
        history: Arc<dyn QueryHistoryRepository>,
        grants: Arc<dyn GrantRepository>,
        limits: ToolsConfig,
        home_database: impl Into<String>,
    ) -> Self {
        Self {
            store,
            memories,
            history,
            grants,
            limits,
            home_database: home_database.into(),
        }
    }

    pub fn home_database(&self) -> &str {
        &self.home_database
    }

    /// Validate and run one tool call on behalf of `ctx.agent`.
    pub async fn dispatch(&self, ctx: &ToolContext, name: &str, parameters: &Value) -> ToolResponse {
        let Some(spec) = spec(name) else {
            return ToolResponse::validation(format!("unknown tool: {name}"));
        };
        let params = match params::validate(spec, parameters) {
            Ok(params) => params,
            Err(rejection) => {
                debug!(agent = %ctx.agent, tool = name, error = ?rejection.error, "tool call rejected");
                return rejection;
            }
        };

        let outcome = match spec.name {
            "list_databases" => self.list_databases().await,
            "connect_to_database" => self.connect_to_database(&params).await,
            "get_schema_info" => self.get_schema_info(&params).await,
            "describe_table" => self.describe_table(&params).await,
            "sample_table" => self.sample_table(&params).await,
            "get_column_stats" => self.get_column_stats(&params).await,
            "get_table_relationships" => self.get_table_relationships(&params).await,
            "execute_query" => self.execute_query(ctx, &params).await,
            "validate_sql" => self.validate_sql(&params).await,
            "check_permissions" => self.check_permissions(ctx, &params).await,
            "store_memory" => self.store_memory(ctx, &params).await,
            "retrieve_memories" => self.retrieve_memories(ctx, &params).await,
            "search_memories" => self.search_memories(ctx, &params).await,
            "update_memory" => self.update_memory(ctx, &params).await,
            "delete_memory" => self.delete_memory(ctx, &params).await,
            "get_memory_stats" => self.get_memory_stats(ctx, &params).await,
            "get_query_history" => self.get_query_history(ctx, &params).await,
            other => Err(ToolResponse::validation(format!("unknown tool: {other}"))),
        };

        match outcome {
            Ok(data) => {
                debug!(agent = %ctx.agent, tool = name, "tool call succeeded");
                ToolResponse::ok(data)
            }
            Err(failure) => {
                warn!(
                    agent = %ctx.agent,
                    tool = name,
                    kind = ?failure.error_kind,
                    error = ?failure.error,
                    "tool call failed"
                );
                failure
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tool_names_are_unique() {
        let names: HashSet<_> = TOOLS.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), TOOLS.len());
        assert_eq!(TOOLS.len(), 17);
    }

    #[test]
    fn test_descriptors_mark_required_params() {
        let execute = descriptors()
            .into_iter()
            .find(|d| d.name == "execute_query")
            .unwrap();
        assert_eq!(
            execute.input_schema["required"],
            serde_json::json!(["database_name", "sql_query"])
        );
    }

    #[test]
    fn test_store_errors_map_to_kinds() {
        let storage: ToolResponse = StoreError::RetriesExhausted {
            attempts: 3,
            statement: "SELECT 1".into(),
            message: "down".into(),
        }
        .into();
        assert_eq!(storage.error_kind, Some(crate::domain::models::ToolErrorKind::Storage));

        let missing: ToolResponse = DomainError::MemoryNotFound(4).into();
        assert_eq!(missing.error_kind, Some(crate::domain::models::ToolErrorKind::NotFound));
    }
}
