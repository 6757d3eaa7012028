//! Frames exchanged on an agent's persistent broker connection.
//!
//! Every request carries a caller-chosen correlation token that the broker
//! echoes back, so an agent can keep several calls outstanding at once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::Message;
use super::tool::{ToolResponse, ToolSpec};

/// Correlation token chosen by the caller.
pub type CorrelationToken = String;

/// Agent → broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Poll {
        token: CorrelationToken,
    },
    ToolCall {
        token: CorrelationToken,
        tool: String,
        #[serde(default = "empty_parameters")]
        parameters: Value,
    },
    SendMessage {
        token: CorrelationToken,
        to: String,
        body: String,
    },
    MarkRead {
        token: CorrelationToken,
        message_ids: Vec<i64>,
    },
    ListTools {
        token: CorrelationToken,
    },
    Disconnect,
}

impl ClientFrame {
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Poll { token }
            | Self::ToolCall { token, .. }
            | Self::SendMessage { token, .. }
            | Self::MarkRead { token, .. }
            | Self::ListTools { token } => Some(token),
            Self::Disconnect => None,
        }
    }
}

fn empty_parameters() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Broker → agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Connected {
        agent: String,
        session_id: String,
        server_time: DateTime<Utc>,
        tools: Vec<String>,
    },
    Rejected {
        reason: String,
    },
    Evicted {
        reason: String,
    },
    Messages {
        token: CorrelationToken,
        messages: Vec<Message>,
        /// The agent's current registry interval, so a running worker
        /// follows changes made while it is connected.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        poll_interval_secs: Option<u64>,
    },
    ToolResult {
        token: CorrelationToken,
        tool: String,
        response: ToolResponse,
    },
    Sent {
        token: CorrelationToken,
        message: Message,
    },
    Marked {
        token: CorrelationToken,
        marked: usize,
    },
    Tools {
        token: CorrelationToken,
        tools: Vec<ToolDescriptor>,
    },
    /// Unsolicited: a message for this agent was just posted.
    NewMessage {
        message_id: i64,
        from: String,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<CorrelationToken>,
        message: String,
    },
}

impl ServerFrame {
    /// Token this frame answers, if it is a response.
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Messages { token, .. }
            | Self::ToolResult { token, .. }
            | Self::Sent { token, .. }
            | Self::Marked { token, .. }
            | Self::Tools { token, .. } => Some(token),
            Self::Error { token, .. } => token.as_deref(),
            _ => None,
        }
    }

    /// Whether the broker closes the connection after sending this frame.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::Evicted { .. })
    }

    pub fn error(token: Option<CorrelationToken>, message: impl Into<String>) -> Self {
        Self::Error {
            token,
            message: message.into(),
        }
    }
}

/// Owned, serializable view of a [`ToolSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl From<&ToolSpec> for ToolDescriptor {
    fn from(spec: &ToolSpec) -> Self {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in spec.params {
            properties.insert(
                param.name.to_string(),
                serde_json::json!({
                    "type": param.kind.json_type(),
                    "description": param.description,
                }),
            );
            if param.required {
                required.push(Value::String(param.name.to_string()));
            }
        }
        Self {
            name: spec.name.to_string(),
            description: spec.description.to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_frame_wire_format() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "tool_call",
            "token": "t-1",
            "tool": "list_databases"
        }))
        .unwrap();

        assert_eq!(
            frame,
            ClientFrame::ToolCall {
                token: "t-1".into(),
                tool: "list_databases".into(),
                parameters: json!({}),
            }
        );
        assert_eq!(frame.token(), Some("t-1"));
    }

    #[test]
    fn test_server_frame_token_echo() {
        let frame = ServerFrame::Marked {
            token: "abc".into(),
            marked: 2,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json, json!({"type": "marked", "token": "abc", "marked": 2}));
        assert_eq!(frame.token(), Some("abc"));
    }

    #[test]
    fn test_notification_has_no_token() {
        let frame = ServerFrame::NewMessage {
            message_id: 4,
            from: "alice".into(),
        };
        assert_eq!(frame.token(), None);
    }
}
