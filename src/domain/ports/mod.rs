pub mod agent_repository;
pub mod broker_link;
pub mod memory_repository;
pub mod message_repository;
pub mod query_history_repository;
pub mod reply_generator;
pub mod storage_backend;

pub use agent_repository::{AgentRepository, GrantRepository};
pub use broker_link::{BrokerLink, LinkError};
pub use memory_repository::MemoryRepository;
pub use message_repository::MessageRepository;
pub use query_history_repository::QueryHistoryRepository;
pub use reply_generator::{
    GenerationError, GenerationRequest, GenerationStep, ReplyGenerator, ToolExchange,
};
pub use storage_backend::{
    is_identifier, BackendError, Dialect, FailureKind, ObjectKind, StorageBackend,
};
