//! Per-agent poll → generate → reply loop.
//!
//! Delivery is at-least-once: a message is marked read only after its reply
//! was sent, so a crash or a dropped link between the two replays it.

use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::domain::models::{Agent, Memory, Message, ToolInvocation};
use crate::domain::ports::{
    BrokerLink, GenerationError, GenerationRequest, GenerationStep, LinkError, ReplyGenerator,
    ToolExchange,
};
use crate::services::tools;

const MAX_SEARCH_TERMS: usize = 5;
const MIN_TERM_LEN: usize = 4;
const MEMORY_LABEL_WORDS: usize = 6;
const RECALL_LIMIT: u32 = 5;

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "also", "because", "been", "before", "being", "could", "does",
    "doing", "down", "each", "from", "have", "having", "here", "into", "just", "more", "most",
    "only", "other", "over", "please", "same", "should", "some", "such", "than", "that", "their",
    "them", "then", "there", "these", "they", "this", "those", "through", "under", "until",
    "very", "were", "what", "when", "where", "which", "while", "with", "would", "your",
];

const REMEMBER_CUES: &[&str] = &["remember", "note", "important", "always", "prefer"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Polling,
    Processing,
    Replying,
}

#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    pub poll_interval: Duration,
    pub max_tool_rounds: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub replied: u64,
    pub generation_failures: u64,
    pub tool_calls: u64,
    pub memories_stored: u64,
}

/// Lowercased alphanumeric words longer than three characters, without
/// stopwords or repeats, in order of appearance. At most five.
pub fn search_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|word| word.chars().count() >= MIN_TERM_LEN)
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
        .filter(|word| seen.insert(word.clone()))
        .take(MAX_SEARCH_TERMS)
        .collect()
}

pub fn has_remember_cue(text: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|word| REMEMBER_CUES.iter().any(|cue| word.eq_ignore_ascii_case(cue)))
}

fn memory_label(text: &str) -> String {
    text.split_whitespace()
        .take(MEMORY_LABEL_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn system_prompt(agent: &Agent) -> String {
    let tools = tools::tool_names().join(", ");
    format!(
        "You are {name}, an AI agent. {description}\n\
         You answer messages from people and other agents. You can use these tools: {tools}.\n\
         To use a tool, reply with only a JSON object of the form \
         {{\"tool\": \"<name>\", \"parameters\": {{...}}}}. Tool results are shown to you \
         before you answer. Otherwise reply with plain text.",
        name = agent.name,
        description = agent.description,
    )
}

/// Why one message could not be answered.
enum ProcessError {
    Generation(GenerationError),
    Link(LinkError),
}

impl From<LinkError> for ProcessError {
    fn from(err: LinkError) -> Self {
        Self::Link(err)
    }
}

pub struct AgentLoop {
    agent: Agent,
    link: Arc<dyn BrokerLink>,
    generator: Arc<dyn ReplyGenerator>,
    config: AgentLoopConfig,
    system_prompt: String,
    state: LoopState,
    stats: LoopStats,
}

impl AgentLoop {
    pub fn new(
        agent: Agent,
        link: Arc<dyn BrokerLink>,
        generator: Arc<dyn ReplyGenerator>,
        config: AgentLoopConfig,
    ) -> Self {
        let system_prompt = system_prompt(&agent);
        Self {
            agent,
            link,
            generator,
            config,
            system_prompt,
            state: LoopState::Idle,
            stats: LoopStats::default(),
        }
    }

    pub const fn state(&self) -> LoopState {
        self.state
    }

    pub const fn stats(&self) -> LoopStats {
        self.stats
    }

    pub const fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    fn follow_poll_interval(&mut self) {
        let Some(interval) = self.link.poll_interval() else {
            return;
        };
        if interval != self.config.poll_interval {
            info!(
                agent = %self.agent.name,
                from = ?self.config.poll_interval,
                to = ?interval,
                "poll interval updated"
            );
            self.config.poll_interval = interval;
        }
    }

    /// Run until `shutdown` flips to `true` or the link fails.
    ///
    /// Returns the link error so the caller can decide whether to reconnect.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), LinkError> {
        info!(agent = %self.agent.name, generator = self.generator.name(), "agent loop started");
        let outcome = loop {
            if *shutdown.borrow() {
                break Ok(());
            }
            if let Err(err) = self.run_cycle().await {
                break Err(err);
            }
            tokio::select! {
                woke = self.link.wait_for_mail(self.config.poll_interval) => {
                    if let Err(err) = woke {
                        break Err(err);
                    }
                }
                _ = shutdown.changed() => break Ok(()),
            }
        };

        if outcome.is_ok() {
            self.link.disconnect().await;
        }
        info!(agent = %self.agent.name, stats = ?self.stats, "agent loop stopped");
        outcome
    }

    /// Poll once and answer everything that arrived, oldest first.
    ///
    /// A generation failure or a rejected send ends the cycle early and
    /// leaves the message unread. Returns the number of messages answered.
    pub async fn run_cycle(&mut self) -> Result<usize, LinkError> {
        self.stats.cycles += 1;
        self.state = LoopState::Polling;
        let mut inbox = self.link.poll().await?;
        self.follow_poll_interval();
        if inbox.is_empty() {
            self.state = LoopState::Idle;
            return Ok(0);
        }
        inbox.sort_by(|a, b| a.posted_at.cmp(&b.posted_at).then(a.id.cmp(&b.id)));
        debug!(agent = %self.agent.name, count = inbox.len(), "processing inbox");

        let mut answered = 0;
        for message in &inbox {
            match self.process(message).await {
                Ok(()) => answered += 1,
                Err(ProcessError::Generation(err)) => {
                    self.stats.generation_failures += 1;
                    warn!(
                        agent = %self.agent.name,
                        message_id = message.id,
                        error = %err,
                        "generation failed, message left unread"
                    );
                    break;
                }
                Err(ProcessError::Link(LinkError::Remote(reason))) => {
                    warn!(
                        agent = %self.agent.name,
                        message_id = message.id,
                        reason = %reason,
                        "broker refused request, message left unread"
                    );
                    break;
                }
                Err(ProcessError::Link(err)) => {
                    self.state = LoopState::Idle;
                    return Err(err);
                }
            }
        }
        self.state = LoopState::Idle;
        Ok(answered)
    }

    async fn process(&mut self, message: &Message) -> Result<(), ProcessError> {
        self.state = LoopState::Processing;
        let terms = search_terms(&message.body);
        let memories = self.recall(&terms).await?;

        let reply = self.generate_reply(message, memories).await?;

        self.state = LoopState::Replying;
        let sent = self.link.send_message(&message.from, &reply).await?;
        self.link.mark_read(&[message.id]).await?;
        self.stats.replied += 1;
        info!(
            agent = %self.agent.name,
            message_id = message.id,
            reply_id = sent.id,
            to = %message.from,
            "replied"
        );

        if has_remember_cue(&message.body) && !terms.is_empty() {
            self.remember(message, &terms).await?;
        }
        Ok(())
    }

    async fn generate_reply(
        &mut self,
        message: &Message,
        memories: Vec<Memory>,
    ) -> Result<String, ProcessError> {
        let mut request = GenerationRequest {
            agent: self.agent.name.clone(),
            model: self.agent.endpoint.model.clone(),
            system_prompt: self.system_prompt.clone(),
            message: message.clone(),
            memories,
            tool_exchanges: Vec::new(),
        };

        for round in 0..=self.config.max_tool_rounds {
            let step = self
                .generator
                .generate(&request)
                .await
                .map_err(ProcessError::Generation)?;
            let invocations = match step {
                GenerationStep::Reply(text) => return Ok(text),
                GenerationStep::UseTools(invocations) => invocations,
            };
            if round == self.config.max_tool_rounds {
                break;
            }
            for invocation in invocations {
                let exchange = self.call_tool(invocation).await?;
                request.tool_exchanges.push(exchange);
            }
        }

        warn!(
            agent = %self.agent.name,
            message_id = message.id,
            rounds = self.config.max_tool_rounds,
            "tool round limit reached"
        );
        Ok(format!(
            "I could not finish answering within {} tool rounds.",
            self.config.max_tool_rounds
        ))
    }

    async fn call_tool(&mut self, invocation: ToolInvocation) -> Result<ToolExchange, LinkError> {
        self.stats.tool_calls += 1;
        debug!(agent = %self.agent.name, tool = %invocation.tool, "calling tool");
        let response = self
            .link
            .call_tool(&invocation.tool, invocation.parameters.clone())
            .await?;
        Ok(ToolExchange {
            invocation,
            response,
        })
    }

    /// Memories tagged with any of `terms`. Tool failures only cost context.
    async fn recall(&self, terms: &[String]) -> Result<Vec<Memory>, LinkError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .link
            .call_tool(
                "retrieve_memories",
                json!({ "related_to_tags": terms, "limit": RECALL_LIMIT }),
            )
            .await?;
        if !response.success {
            debug!(agent = %self.agent.name, error = ?response.error, "memory recall failed");
            return Ok(Vec::new());
        }
        let memories = response
            .data
            .as_ref()
            .and_then(|data| data.get("memories"))
            .cloned()
            .map(serde_json::from_value::<Vec<Memory>>)
            .transpose()
            .unwrap_or_else(|err| {
                warn!(agent = %self.agent.name, error = %err, "unreadable recalled memories");
                None
            })
            .unwrap_or_default();
        Ok(memories)
    }

    async fn remember(&mut self, message: &Message, terms: &[String]) -> Result<(), LinkError> {
        let response = self
            .link
            .call_tool(
                "store_memory",
                json!({
                    "memory_label": memory_label(&message.body),
                    "memory_content": message.body,
                    "related_to_tags": terms,
                }),
            )
            .await?;
        if response.success {
            self.stats.memories_stored += 1;
            let memory_id = response
                .data
                .as_ref()
                .and_then(|data| data.get("memory_id"))
                .and_then(Value::as_i64);
            debug!(agent = %self.agent.name, ?memory_id, "memory stored");
        } else {
            warn!(agent = %self.agent.name, error = ?response.error, "failed to store memory");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_terms() {
        assert_eq!(
            search_terms("Please show the Billing report for billing and HR, with totals by region!"),
            vec!["show", "billing", "report", "totals", "region"]
        );
        assert!(search_terms("hi there, how are you").is_empty());
    }

    #[test]
    fn test_remember_cue() {
        assert!(has_remember_cue("Remember: I prefer CSV exports"));
        assert!(has_remember_cue("this is IMPORTANT"));
        assert!(!has_remember_cue("remembering is hard"));
        assert!(!has_remember_cue("count the orders"));
    }

    #[test]
    fn test_memory_label_takes_six_words() {
        assert_eq!(
            memory_label("always  use the orders table for revenue numbers"),
            "always use the orders table for"
        );
    }
}
