//! Domain layer for TriAI
//!
//! Models, errors and the ports adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult, StoreError};
