pub mod agent;
pub mod config;
pub mod memory;
pub mod message;
pub mod protocol;
pub mod query_history;
pub mod tool;
pub mod value;

pub use agent::{Agent, Grant, ModelEndpoint};
pub use config::{
    AgentSeed, AgentsConfig, ApplicationConfig, BackendKind, Config, DatabaseConfig,
    GeneratorsConfig, GrantSeed, LogFormat, LoggingConfig, MaintenanceConfig, OllamaConfig,
    ReconnectConfig, RetryConfig, RotationPolicy, ServerConfig, ToolsConfig,
};
pub use memory::{Memory, MemoryStats, MemoryUpdate, NewMemory, TagFrequency, TagSet};
pub use message::Message;
pub use protocol::{ClientFrame, CorrelationToken, ServerFrame, ToolDescriptor};
pub use query_history::{NewQueryHistory, QueryHistoryRecord};
pub use tool::{
    EffectClass, ParamKind, ParamSpec, ToolErrorKind, ToolInvocation, ToolResponse, ToolSpec,
};
pub use value::{escape, insert_column, quote_literal, to_columns, to_rows, Columns, Row, RowSet, SqlValue};
