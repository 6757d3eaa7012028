pub mod memory_sweep;
pub mod resilient_store;
pub mod retry;
pub mod session_broker;
pub mod tools;

pub use memory_sweep::{MemorySweep, SweepConfig, SweepHandle, SweepStatus};
pub use resilient_store::{BulkWriteReport, ResilientStore, UpsertReport, DEFAULT_CHUNK_SIZE};
pub use retry::{RetryError, RetryPolicy};
pub use session_broker::{BrokerError, SessionBroker, SessionState};
pub use tools::{ToolCatalog, ToolContext};
