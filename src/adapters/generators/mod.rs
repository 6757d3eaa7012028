//! Reply generators and the provider factory.

pub mod mock;
pub mod ollama;

use std::fmt::Write as _;
use std::sync::Arc;

pub use mock::{MockGenerator, MockStep};
pub use ollama::OllamaGenerator;

use crate::domain::models::{GeneratorsConfig, ModelEndpoint, ToolInvocation};
use crate::domain::ports::{GenerationError, GenerationRequest, GenerationStep, ReplyGenerator};

/// Build the generator an agent's endpoint names.
pub fn generator_for(
    endpoint: &ModelEndpoint,
    config: &GeneratorsConfig,
) -> Result<Arc<dyn ReplyGenerator>, GenerationError> {
    match endpoint.provider.to_ascii_lowercase().as_str() {
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config.ollama.clone())?)),
        "mock" => Ok(Arc::new(MockGenerator::new())),
        other => Err(GenerationError::UnsupportedProvider(other.to_string())),
    }
}

/// User prompt for one generation round.
pub fn render_prompt(request: &GenerationRequest) -> String {
    let mut prompt = String::new();
    if !request.memories.is_empty() {
        prompt.push_str("Relevant memories:\n");
        for memory in &request.memories {
            let _ = writeln!(prompt, "- {}: {}", memory.label, memory.body);
        }
        prompt.push('\n');
    }
    let _ = writeln!(
        prompt,
        "Message from {}:\n{}",
        request.message.from, request.message.body
    );
    if !request.tool_exchanges.is_empty() {
        prompt.push_str("\nTool results so far:\n");
        for exchange in &request.tool_exchanges {
            let outcome = serde_json::to_string(&exchange.response)
                .unwrap_or_else(|err| format!("<unencodable result: {err}>"));
            let _ = writeln!(prompt, "- {} {}: {outcome}", exchange.invocation.tool, exchange.invocation.parameters);
        }
    }
    prompt
}

/// Interpret raw generator text.
///
/// A reply that is a JSON object with a `tool` key (optionally inside a code
/// fence) is a tool invocation; anything else is the final reply.
pub fn parse_step(text: &str) -> Result<GenerationStep, GenerationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(GenerationError::InvalidOutput("empty reply".to_string()));
    }
    let candidate = strip_fence(trimmed);
    if candidate.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) {
            if value.get("tool").is_some_and(serde_json::Value::is_string) {
                let invocation: ToolInvocation = serde_json::from_value(value)
                    .map_err(|err| GenerationError::InvalidOutput(err.to_string()))?;
                return Ok(GenerationStep::UseTools(vec![invocation]));
            }
        }
    }
    Ok(GenerationStep::Reply(trimmed.to_string()))
}

fn strip_fence(text: &str) -> &str {
    text.strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
        .map_or(text, |inner| inner.trim_start_matches("json").trim())
}
