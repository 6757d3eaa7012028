pub mod agent_loop;
pub mod agent_supervisor;
pub mod runtime;

pub use agent_loop::{AgentLoop, AgentLoopConfig, LoopState, LoopStats};
pub use agent_supervisor::{AgentSupervisor, LinkTarget, WorkerError, WorkerReport};
pub use runtime::{PrepareReport, Runtime, RuntimeError};
