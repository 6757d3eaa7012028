use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One successful `execute_query` call, kept for agent self-reflection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryHistoryRecord {
    pub id: i64,
    pub agent: String,
    pub database_name: String,
    pub sql_query: String,
    pub executed_at: DateTime<Utc>,
    pub row_count: i64,
    pub execution_time_ms: i64,
}

/// A record before the store assigns its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQueryHistory {
    pub agent: String,
    pub database_name: String,
    pub sql_query: String,
    pub executed_at: DateTime<Utc>,
    pub row_count: i64,
    pub execution_time_ms: i64,
}
