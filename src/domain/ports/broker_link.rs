use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::domain::models::{Message, ToolResponse};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("Failed to connect to broker: {0}")]
    Connect(String),

    #[error("Broker rejected the session: {0}")]
    Rejected(String),

    #[error("Session evicted: {0}")]
    Evicted(String),

    #[error("Broker connection closed")]
    Closed,

    #[error("Broker returned an error: {0}")]
    Remote(String),

    #[error("Unexpected reply from broker: {0}")]
    Protocol(String),
}

impl LinkError {
    /// Whether reconnecting could help.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Closed)
    }
}

/// An agent's authenticated connection to the session broker.
#[async_trait]
pub trait BrokerLink: Send + Sync {
    fn agent(&self) -> &str;

    async fn poll(&self) -> Result<Vec<Message>, LinkError>;

    /// Poll interval reported by the broker with the latest poll, if any.
    fn poll_interval(&self) -> Option<Duration>;

    async fn call_tool(&self, tool: &str, parameters: Value) -> Result<ToolResponse, LinkError>;

    async fn send_message(&self, to: &str, body: &str) -> Result<Message, LinkError>;

    async fn mark_read(&self, message_ids: &[i64]) -> Result<usize, LinkError>;

    /// Sleep up to `timeout`, returning early with `true` when the broker
    /// announces new mail.
    async fn wait_for_mail(&self, timeout: Duration) -> Result<bool, LinkError>;

    async fn disconnect(&self);
}
