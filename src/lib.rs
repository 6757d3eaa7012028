//! TriAI - multi-agent broker over a shared SQL store
//!
//! Named AI agents exchange messages with a human user and with each other
//! through a broker, keep long-term memories, and query the database through
//! a fixed catalog of tools. Every read and write goes through a resilient
//! store that retries transient failures on SQLite, PostgreSQL or an
//! in-memory backend.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and repository ports
//! - **Adapters** (`adapters`): storage backends, SQL repositories, reply
//!   generators and the broker transports
//! - **Service Layer** (`services`): resilient store, tool catalog, session
//!   broker and memory sweep
//! - **Application Layer** (`application`): agent loop, worker supervision
//!   and runtime wiring
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use application::{AgentLoop, AgentSupervisor, Runtime};
pub use domain::models::{Agent, Config, Memory, Message};
pub use domain::{DomainError, DomainResult, StoreError};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{ResilientStore, SessionBroker, ToolCatalog};
