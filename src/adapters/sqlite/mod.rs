//! SQLite implementation of the storage backend port.

pub mod backend;
pub mod connection;

pub use backend::{decode_sqlite_row, SqliteBackend, SqliteDialect};
pub use connection::{create_memory_pool, create_pool, ConnectionError, PoolConfig};
