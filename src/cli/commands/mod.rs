//! CLI command implementations.

pub mod agents;
pub mod init;
pub mod serve;
