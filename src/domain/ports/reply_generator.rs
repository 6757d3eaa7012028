//! Reply generator port - the external capability that writes agent replies.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::models::{Memory, Message, ToolInvocation, ToolResponse};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generator unavailable: {0}")]
    Unavailable(String),

    #[error("Generator request failed: {0}")]
    RequestFailed(String),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Invalid generator output: {0}")]
    InvalidOutput(String),
}

/// Tool call made during generation, paired with its outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExchange {
    pub invocation: ToolInvocation,
    pub response: ToolResponse,
}

/// Everything a generator sees when answering one message.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub agent: String,
    pub model: String,
    pub system_prompt: String,
    pub message: Message,
    pub memories: Vec<Memory>,
    /// Results of tool calls requested in earlier rounds.
    pub tool_exchanges: Vec<ToolExchange>,
}

/// One generation round either finishes the reply or asks for tools.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationStep {
    Reply(String),
    UseTools(Vec<ToolInvocation>),
}

#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationStep, GenerationError>;
}
