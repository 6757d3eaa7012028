//! Token-correlated request/response over a pair of frame channels.
//!
//! Both agent transports reduce to the same shape: a sender of
//! [`ClientFrame`]s and a receiver of [`ServerFrame`]s. [`FrameLink`] issues
//! tokens, parks each caller until the matching reply arrives and turns
//! `new_message` pushes into early wake-ups.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::models::{ClientFrame, Message, ServerFrame, ToolResponse};
use crate::domain::ports::{BrokerLink, LinkError};

type Waiters = Arc<Mutex<HashMap<String, oneshot::Sender<ServerFrame>>>>;

pub struct FrameLink {
    agent: String,
    session_id: String,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    waiters: Waiters,
    mail: Arc<Notify>,
    closed: watch::Receiver<Option<LinkError>>,
    next_token: AtomicU64,
    /// Seconds; zero until the broker reports one.
    poll_interval_secs: AtomicU64,
    reader: JoinHandle<()>,
}

impl FrameLink {
    /// Wait for the broker's handshake answer, then start routing replies.
    pub async fn establish(
        agent: &str,
        outbound: mpsc::UnboundedSender<ClientFrame>,
        mut inbound: mpsc::UnboundedReceiver<ServerFrame>,
    ) -> Result<Self, LinkError> {
        let session_id = match inbound.recv().await {
            Some(ServerFrame::Connected { session_id, .. }) => session_id,
            Some(ServerFrame::Rejected { reason }) => return Err(LinkError::Rejected(reason)),
            Some(other) => {
                return Err(LinkError::Protocol(format!(
                    "expected connected frame, got {other:?}"
                )))
            }
            None => return Err(LinkError::Closed),
        };

        let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));
        let mail = Arc::new(Notify::new());
        let (closed_tx, closed) = watch::channel(None);
        let reader = tokio::spawn(route_frames(
            agent.to_string(),
            inbound,
            Arc::clone(&waiters),
            Arc::clone(&mail),
            closed_tx,
        ));
        debug!(agent, session_id = %session_id, "broker link established");

        Ok(Self {
            agent: agent.to_string(),
            session_id,
            outbound,
            waiters,
            mail,
            closed,
            next_token: AtomicU64::new(1),
            poll_interval_secs: AtomicU64::new(0),
            reader,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn close_reason(&self) -> Option<LinkError> {
        self.closed.borrow().clone()
    }

    async fn request(&self, build: impl FnOnce(String) -> ClientFrame) -> Result<ServerFrame, LinkError> {
        if let Some(reason) = self.close_reason() {
            return Err(reason);
        }
        let token = format!("{}-{}", self.agent, self.next_token.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(token.clone(), tx);

        // The router marks the link closed before draining waiters, so a
        // closure seen here means our waiter may never be answered.
        if let Some(reason) = self.close_reason() {
            self.waiters.lock().await.remove(&token);
            return Err(reason);
        }
        if self.outbound.send(build(token.clone())).is_err() {
            self.waiters.lock().await.remove(&token);
            return Err(self.close_reason().unwrap_or(LinkError::Closed));
        }

        match rx.await {
            Ok(ServerFrame::Error { message, .. }) => Err(LinkError::Remote(message)),
            Ok(frame) => Ok(frame),
            Err(_) => Err(self.close_reason().unwrap_or(LinkError::Closed)),
        }
    }
}

async fn route_frames(
    agent: String,
    mut inbound: mpsc::UnboundedReceiver<ServerFrame>,
    waiters: Waiters,
    mail: Arc<Notify>,
    closed: watch::Sender<Option<LinkError>>,
) {
    let mut reason = LinkError::Closed;
    while let Some(frame) = inbound.recv().await {
        match frame {
            ServerFrame::NewMessage { message_id, .. } => {
                debug!(agent = %agent, message_id, "new message announced");
                mail.notify_one();
            }
            ServerFrame::Evicted { reason: why } => {
                warn!(agent = %agent, reason = %why, "session evicted by broker");
                reason = LinkError::Evicted(why);
                break;
            }
            ServerFrame::Rejected { reason: why } => {
                reason = LinkError::Rejected(why);
                break;
            }
            frame => match frame.token().map(str::to_string) {
                Some(token) => match waiters.lock().await.remove(&token) {
                    Some(waiter) => {
                        let _ = waiter.send(frame);
                    }
                    None => debug!(agent = %agent, token = %token, "reply for unknown token"),
                },
                None => warn!(agent = %agent, ?frame, "unsolicited frame from broker"),
            },
        }
    }
    closed.send_replace(Some(reason));
    waiters.lock().await.clear();
}

fn unexpected(frame: &ServerFrame) -> LinkError {
    LinkError::Protocol(format!("unexpected reply: {frame:?}"))
}

#[async_trait]
impl BrokerLink for FrameLink {
    fn agent(&self) -> &str {
        &self.agent
    }

    async fn poll(&self) -> Result<Vec<Message>, LinkError> {
        match self.request(|token| ClientFrame::Poll { token }).await? {
            ServerFrame::Messages {
                messages,
                poll_interval_secs,
                ..
            } => {
                if let Some(secs) = poll_interval_secs.filter(|secs| *secs > 0) {
                    self.poll_interval_secs.store(secs, Ordering::Relaxed);
                }
                Ok(messages)
            }
            other => Err(unexpected(&other)),
        }
    }

    fn poll_interval(&self) -> Option<Duration> {
        match self.poll_interval_secs.load(Ordering::Relaxed) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    async fn call_tool(&self, tool: &str, parameters: Value) -> Result<ToolResponse, LinkError> {
        let frame = self
            .request(|token| ClientFrame::ToolCall {
                token,
                tool: tool.to_string(),
                parameters,
            })
            .await?;
        match frame {
            ServerFrame::ToolResult { response, .. } => Ok(response),
            other => Err(unexpected(&other)),
        }
    }

    async fn send_message(&self, to: &str, body: &str) -> Result<Message, LinkError> {
        let frame = self
            .request(|token| ClientFrame::SendMessage {
                token,
                to: to.to_string(),
                body: body.to_string(),
            })
            .await?;
        match frame {
            ServerFrame::Sent { message, .. } => Ok(message),
            other => Err(unexpected(&other)),
        }
    }

    async fn mark_read(&self, message_ids: &[i64]) -> Result<usize, LinkError> {
        let frame = self
            .request(|token| ClientFrame::MarkRead {
                token,
                message_ids: message_ids.to_vec(),
            })
            .await?;
        match frame {
            ServerFrame::Marked { marked, .. } => Ok(marked),
            other => Err(unexpected(&other)),
        }
    }

    async fn wait_for_mail(&self, timeout: Duration) -> Result<bool, LinkError> {
        let mut closed = self.closed.clone();
        if let Some(reason) = closed.borrow_and_update().clone() {
            return Err(reason);
        }
        tokio::select! {
            () = tokio::time::sleep(timeout) => Ok(false),
            () = self.mail.notified() => Ok(true),
            _ = closed.changed() => Err(self.close_reason().unwrap_or(LinkError::Closed)),
        }
    }

    async fn disconnect(&self) {
        let _ = self.outbound.send(ClientFrame::Disconnect);
    }
}

impl Drop for FrameLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn connected() -> ServerFrame {
        ServerFrame::Connected {
            agent: "QueryBot".into(),
            session_id: "s1".into(),
            server_time: Utc::now(),
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn test_rejected_handshake() {
        let (client_tx, _client_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        server_tx
            .send(ServerFrame::Rejected {
                reason: "unknown agent".into(),
            })
            .unwrap();

        let err = FrameLink::establish("QueryBot", client_tx, server_rx)
            .await
            .err()
            .unwrap();
        assert_eq!(err, LinkError::Rejected("unknown agent".into()));
    }

    #[tokio::test]
    async fn test_replies_are_routed_by_token() {
        let (client_tx, mut client_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        server_tx.send(connected()).unwrap();
        let link = FrameLink::establish("QueryBot", client_tx, server_rx).await.unwrap();

        let responder = tokio::spawn(async move {
            if let Some(ClientFrame::MarkRead { token, message_ids }) = client_rx.recv().await {
                server_tx
                    .send(ServerFrame::Marked {
                        token,
                        marked: message_ids.len(),
                    })
                    .unwrap();
            }
            server_tx
        });

        assert_eq!(link.mark_read(&[1, 2]).await.unwrap(), 2);
        drop(responder.await.unwrap());
        assert_eq!(
            link.wait_for_mail(Duration::from_secs(5)).await,
            Err(LinkError::Closed)
        );
    }

    #[tokio::test]
    async fn test_new_message_wakes_waiter_and_eviction_closes() {
        let (client_tx, _client_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        server_tx.send(connected()).unwrap();
        let link = FrameLink::establish("QueryBot", client_tx, server_rx).await.unwrap();

        server_tx
            .send(ServerFrame::NewMessage {
                message_id: 7,
                from: "alice".into(),
            })
            .unwrap();
        assert_eq!(link.wait_for_mail(Duration::from_secs(5)).await, Ok(true));

        server_tx
            .send(ServerFrame::Evicted {
                reason: "replaced".into(),
            })
            .unwrap();
        assert_eq!(
            link.wait_for_mail(Duration::from_secs(5)).await,
            Err(LinkError::Evicted("replaced".into()))
        );
        assert!(matches!(link.poll().await, Err(LinkError::Evicted(_))));
    }
}
