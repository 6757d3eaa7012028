//! Ollama reply generator.
//!
//! Uses the non-streaming `/api/generate` endpoint of a local or remote
//! Ollama server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{parse_step, render_prompt};
use crate::domain::models::OllamaConfig;
use crate::domain::ports::{GenerationError, GenerationRequest, GenerationStep, ReplyGenerator};

pub struct OllamaGenerator {
    config: OllamaConfig,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: OllamaConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Unavailable(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ReplyGenerator for OllamaGenerator {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationStep, GenerationError> {
        let body = GenerateRequest {
            model: &request.model,
            prompt: render_prompt(request),
            system: &request.system_prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.config.temperature,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Unavailable(format!("Ollama request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".to_string());
            return Err(GenerationError::RequestFailed(format!(
                "Ollama returned {status}: {text}"
            )));
        }

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidOutput(format!("Failed to parse Ollama response: {e}")))?;
        debug!(
            agent = %request.agent,
            model = %request.model,
            chars = result.response.len(),
            "ollama reply received"
        );

        parse_step(&result.response)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}
