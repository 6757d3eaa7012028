//! Deterministic generator for tests and offline runs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::domain::models::ToolInvocation;
use crate::domain::ports::{GenerationError, GenerationRequest, GenerationStep, ReplyGenerator};

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum MockStep {
    Reply(String),
    UseTools(Vec<ToolInvocation>),
    Fail(String),
}

/// Plays scripted steps in order, then echoes.
///
/// The echo reply summarizes tool results when there are any, so scripted
/// tool calls finish without a second scripted step.
#[derive(Default)]
pub struct MockGenerator {
    script: Mutex<VecDeque<MockStep>>,
    calls: AtomicUsize,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(steps: impl IntoIterator<Item = MockStep>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub async fn push(&self, step: MockStep) {
        self.script.lock().await.push_back(step);
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn echo(request: &GenerationRequest) -> String {
        if request.tool_exchanges.is_empty() {
            let mut reply = format!("{} received: {}", request.agent, request.message.body);
            if !request.memories.is_empty() {
                reply.push_str(&format!(" ({} memories recalled)", request.memories.len()));
            }
            return reply;
        }
        let outcomes: Vec<String> = request
            .tool_exchanges
            .iter()
            .map(|exchange| {
                let status = if exchange.response.success { "ok" } else { "failed" };
                format!("{} {status}", exchange.invocation.tool)
            })
            .collect();
        format!("{} ran {}", request.agent, outcomes.join(", "))
    }
}

#[async_trait]
impl ReplyGenerator for MockGenerator {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationStep, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().await.pop_front() {
            Some(MockStep::Reply(text)) => Ok(GenerationStep::Reply(text)),
            Some(MockStep::UseTools(calls)) => Ok(GenerationStep::UseTools(calls)),
            Some(MockStep::Fail(reason)) => Err(GenerationError::RequestFailed(reason)),
            None => Ok(GenerationStep::Reply(Self::echo(request))),
        }
    }
}
