//! Repositories shared by every backend.
//!
//! All statements go through [`ResilientStore`](crate::services::ResilientStore),
//! so these adapters work unchanged on the mock, SQLite and PostgreSQL backends.

pub mod agent_repository;
pub mod memory_repository;
pub mod message_repository;
pub mod migrations;
pub mod query_history_repository;
pub mod row_ext;

pub use agent_repository::{SqlAgentRepository, SqlGrantRepository};
pub use memory_repository::SqlMemoryRepository;
pub use message_repository::SqlMessageRepository;
pub use migrations::{all_migrations, Migration, MigrationError, Migrator};
pub use query_history_repository::SqlQueryHistoryRepository;
pub use row_ext::RowExt;
