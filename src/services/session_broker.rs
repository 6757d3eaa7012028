//! Session broker: authenticated agent sessions and the human request surface.
//!
//! Transports (the WebSocket endpoint, the in-process link) own the socket and
//! drive a [`Session`]: they feed it inbound frames and forward everything that
//! arrives on its outbound channel. The broker keeps at most one live session
//! per agent; a newer handshake evicts the older one.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::tools::{self, ToolCatalog, ToolContext};
use crate::domain::errors::DomainError;
use crate::domain::models::{
    Agent, ClientFrame, CorrelationToken, Memory, Message, QueryHistoryRecord, ServerFrame,
};
use crate::domain::ports::{
    AgentRepository, MemoryRepository, MessageRepository, QueryHistoryRepository,
};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Unknown recipient: {0}")]
    UnknownRecipient(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl BrokerError {
    /// Whether the failure came from storage rather than the request.
    pub const fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Domain(DomainError::Storage(_) | DomainError::DataError(_))
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Handshaking,
    Authenticated,
    Active,
    Closed,
}

/// Registry view of an agent for the human surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentSummary {
    pub agent: String,
    pub description: String,
    pub model_api: String,
    pub model: String,
    pub poll_interval_secs: u64,
    pub connected: bool,
}

impl AgentSummary {
    fn new(agent: Agent, connected: bool) -> Self {
        Self {
            agent: agent.name,
            description: agent.description,
            model_api: agent.endpoint.provider,
            model: agent.endpoint.model,
            poll_interval_secs: agent.poll_interval_secs,
            connected,
        }
    }
}

struct RegisteredSession {
    session_id: String,
    outbound: mpsc::UnboundedSender<ServerFrame>,
}

pub struct SessionBroker {
    agents: Arc<dyn AgentRepository>,
    messages: Arc<dyn MessageRepository>,
    memories: Arc<dyn MemoryRepository>,
    history: Arc<dyn QueryHistoryRepository>,
    catalog: ToolCatalog,
    current_user: String,
    registry: RwLock<HashMap<String, RegisteredSession>>,
}

impl SessionBroker {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        messages: Arc<dyn MessageRepository>,
        memories: Arc<dyn MemoryRepository>,
        history: Arc<dyn QueryHistoryRepository>,
        catalog: ToolCatalog,
        current_user: impl Into<String>,
    ) -> Self {
        Self {
            agents,
            messages,
            memories,
            history,
            catalog,
            current_user: current_user.into(),
            registry: RwLock::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Authenticate `agent` and register a new session for it.
    ///
    /// The returned receiver yields every frame the transport must deliver,
    /// starting with `connected`. Unknown agents are rejected; the caller
    /// sends the `rejected` frame and closes.
    pub async fn handshake(
        self: &Arc<Self>,
        agent: &str,
    ) -> Result<(Session, mpsc::UnboundedReceiver<ServerFrame>), BrokerError> {
        let Some(agent) = self.agents.get(agent).await? else {
            warn!(agent, "handshake rejected: unknown agent");
            return Err(BrokerError::UnknownAgent(agent.to_string()));
        };

        let (outbound, inbound) = mpsc::unbounded_channel();
        let session_id = Uuid::new_v4().to_string();
        let previous = self.registry.write().await.insert(
            agent.name.clone(),
            RegisteredSession {
                session_id: session_id.clone(),
                outbound: outbound.clone(),
            },
        );
        if let Some(previous) = previous {
            info!(agent = %agent.name, evicted = %previous.session_id, "evicting older session");
            // The old transport may already be gone.
            let _ = previous.outbound.send(ServerFrame::Evicted {
                reason: "a newer session for this agent connected".to_string(),
            });
        }

        let _ = outbound.send(ServerFrame::Connected {
            agent: agent.name.clone(),
            session_id: session_id.clone(),
            server_time: Utc::now(),
            tools: tools::tool_names(),
        });
        info!(agent = %agent.name, session_id = %session_id, "agent session authenticated");

        let session = Session {
            broker: Arc::clone(self),
            agent: agent.name,
            id: session_id,
            state: SessionState::Authenticated,
            outbound,
            pending: Arc::new(Mutex::new(HashSet::new())),
        };
        Ok((session, inbound))
    }

    async fn deregister(&self, agent: &str, session_id: &str) {
        let mut registry = self.registry.write().await;
        if registry.get(agent).is_some_and(|s| s.session_id == session_id) {
            registry.remove(agent);
            info!(agent, session_id, "agent session closed");
        } else {
            debug!(agent, session_id, "closed session was no longer registered");
        }
    }

    pub async fn is_connected(&self, agent: &str) -> bool {
        self.registry.read().await.contains_key(agent)
    }

    pub async fn live_sessions(&self) -> usize {
        self.registry.read().await.len()
    }

    async fn notify_new_message(&self, message: &Message) {
        if let Some(session) = self.registry.read().await.get(&message.to) {
            let _ = session.outbound.send(ServerFrame::NewMessage {
                message_id: message.id,
                from: message.from.clone(),
            });
        }
    }

    /// Store a message and wake the recipient if it is connected.
    pub async fn post_message(&self, from: &str, to: &str, body: &str) -> Result<Message, BrokerError> {
        if body.trim().is_empty() {
            return Err(BrokerError::Validation("message body is empty".into()));
        }
        if to.trim().is_empty() {
            return Err(BrokerError::Validation("recipient is required".into()));
        }
        let message = self.messages.send(from, to, body).await?;
        debug!(message_id = message.id, from, to, "message stored");
        self.notify_new_message(&message).await;
        Ok(message)
    }

    pub fn current_user(&self) -> &str {
        &self.current_user
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentSummary>, BrokerError> {
        let agents = self.agents.list().await?;
        let registry = self.registry.read().await;
        Ok(agents
            .into_iter()
            .map(|agent| {
                let connected = registry.contains_key(&agent.name);
                AgentSummary::new(agent, connected)
            })
            .collect())
    }

    async fn require_agent(&self, agent: &str) -> Result<Agent, BrokerError> {
        self.agents
            .get(agent)
            .await?
            .ok_or_else(|| BrokerError::UnknownAgent(agent.to_string()))
    }

    /// Human → agent message. The recipient must be a registered agent.
    pub async fn send_message(&self, from: &str, to: &str, body: &str) -> Result<Message, BrokerError> {
        if self.agents.get(to).await?.is_none() {
            return Err(BrokerError::UnknownRecipient(to.to_string()));
        }
        self.post_message(from, to, body).await
    }

    /// Change an agent's poll interval. Connected workers pick it up on
    /// their next poll.
    pub async fn set_poll_interval(&self, agent: &str, poll_interval_secs: u64) -> Result<(), BrokerError> {
        if poll_interval_secs == 0 {
            return Err(BrokerError::Validation("poll interval must be positive".into()));
        }
        if !self.agents.set_poll_interval(agent, poll_interval_secs).await? {
            return Err(BrokerError::UnknownAgent(agent.to_string()));
        }
        info!(agent, poll_interval_secs, "poll interval changed");
        Ok(())
    }

    /// Conversation between a human and an agent, oldest first.
    pub async fn history(&self, user: &str, agent: &str, limit: u32) -> Result<Vec<Message>, BrokerError> {
        self.require_agent(agent).await?;
        Ok(self.messages.history(user, agent, limit).await?)
    }

    /// Read-only listing; does not count as a recall.
    pub async fn agent_memories(&self, agent: &str, limit: u32) -> Result<Vec<Memory>, BrokerError> {
        self.require_agent(agent).await?;
        Ok(self.memories.recent(agent, limit).await?)
    }

    pub async fn agent_query_history(
        &self,
        agent: &str,
        limit: u32,
    ) -> Result<Vec<QueryHistoryRecord>, BrokerError> {
        self.require_agent(agent).await?;
        Ok(self.history.recent(agent, limit).await?)
    }
}

/// One authenticated agent connection.
pub struct Session {
    broker: Arc<SessionBroker>,
    agent: String,
    id: String,
    state: SessionState,
    outbound: mpsc::UnboundedSender<ServerFrame>,
    pending: Arc<Mutex<HashSet<CorrelationToken>>>,
}

impl Session {
    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    fn send(&self, frame: ServerFrame) {
        if self.outbound.send(frame).is_err() {
            debug!(agent = %self.agent, "outbound channel closed, frame dropped");
        }
    }

    /// Parse and handle one text frame. Malformed input is answered with an
    /// `error` frame and the session stays open.
    pub async fn handle_text(&mut self, text: &str) -> bool {
        match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => self.handle(frame).await,
            Err(err) => {
                let token = serde_json::from_str::<Value>(text).ok().and_then(|raw| {
                    raw.get("token").and_then(Value::as_str).map(str::to_string)
                });
                debug!(agent = %self.agent, error = %err, "malformed frame");
                self.send(ServerFrame::error(token, format!("malformed frame: {err}")));
                true
            }
        }
    }

    /// Handle one frame. Returns `false` once the session is closed.
    pub async fn handle(&mut self, frame: ClientFrame) -> bool {
        match self.state {
            SessionState::Closed => return false,
            SessionState::Handshaking | SessionState::Authenticated => {
                self.state = SessionState::Active;
            }
            SessionState::Active => {}
        }

        match frame {
            ClientFrame::Disconnect => {
                self.close().await;
                return false;
            }
            ClientFrame::Poll { token } => {
                let reply = match self.broker.messages.unread_for(&self.agent).await {
                    Ok(messages) => ServerFrame::Messages {
                        token,
                        messages,
                        poll_interval_secs: self.current_poll_interval().await,
                    },
                    Err(err) => ServerFrame::error(Some(token), err.to_string()),
                };
                self.send(reply);
            }
            ClientFrame::ToolCall {
                token,
                tool,
                parameters,
            } => self.start_tool_call(token, tool, parameters).await,
            ClientFrame::SendMessage { token, to, body } => {
                let reply = match self.broker.post_message(&self.agent, &to, &body).await {
                    Ok(message) => ServerFrame::Sent { token, message },
                    Err(err) => ServerFrame::error(Some(token), err.to_string()),
                };
                self.send(reply);
            }
            ClientFrame::MarkRead { token, message_ids } => {
                let reply = match self.mark_read(&message_ids).await {
                    Ok(marked) => ServerFrame::Marked { token, marked },
                    Err(err) => ServerFrame::error(Some(token), err.to_string()),
                };
                self.send(reply);
            }
            ClientFrame::ListTools { token } => self.send(ServerFrame::Tools {
                token,
                tools: tools::descriptors(),
            }),
        }
        true
    }

    async fn current_poll_interval(&self) -> Option<u64> {
        match self.broker.agents.get(&self.agent).await {
            Ok(agent) => agent
                .map(|agent| agent.poll_interval_secs)
                .filter(|secs| *secs > 0),
            Err(err) => {
                debug!(agent = %self.agent, error = %err, "poll interval lookup failed");
                None
            }
        }
    }

    /// Only messages addressed to this agent can be marked.
    async fn mark_read(&self, message_ids: &[i64]) -> Result<usize, DomainError> {
        let mut marked = 0;
        for &id in message_ids {
            let owned = self
                .broker
                .messages
                .get(id)
                .await?
                .is_some_and(|m| m.to == self.agent);
            if owned && self.broker.messages.mark_read(id).await? {
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn start_tool_call(&self, token: CorrelationToken, tool: String, parameters: Value) {
        if !self.pending.lock().await.insert(token.clone()) {
            self.send(ServerFrame::error(
                Some(token),
                "a request with this token is already in flight",
            ));
            return;
        }

        let catalog = self.broker.catalog.clone();
        let ctx = ToolContext::new(self.agent.clone());
        let outbound = self.outbound.clone();
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            let response = catalog.dispatch(&ctx, &tool, &parameters).await;
            pending.lock().await.remove(&token);
            let _ = outbound.send(ServerFrame::ToolResult {
                token,
                tool,
                response,
            });
        });
    }

    /// Deregister the session if it is still the live one for its agent.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.broker.deregister(&self.agent, &self.id).await;
    }
}
