//! In-process broker link: drives a broker [`Session`] directly, without a socket.
//!
//! [`Session`]: crate::services::session_broker::Session

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::frame_link::FrameLink;
use crate::domain::models::ClientFrame;
use crate::domain::ports::LinkError;
use crate::services::{BrokerError, SessionBroker};

/// Agent link backed by a broker in the same process.
pub type LocalBrokerLink = FrameLink;

/// Authenticate `agent` against `broker` and start the session driver.
///
/// The driver ends when the link is dropped or sends `disconnect`.
pub async fn connect_local(broker: &Arc<SessionBroker>, agent: &str) -> Result<LocalBrokerLink, LinkError> {
    let (mut session, server_rx) = broker.handshake(agent).await.map_err(|err| match err {
        BrokerError::UnknownAgent(name) => LinkError::Rejected(format!("unknown agent: {name}")),
        other => LinkError::Connect(other.to_string()),
    })?;

    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<ClientFrame>();
    tokio::spawn(async move {
        while let Some(frame) = client_rx.recv().await {
            if !session.handle(frame).await {
                break;
            }
        }
        session.close().await;
        debug!(agent = %session.agent(), "local session driver finished");
    });

    FrameLink::establish(agent, client_tx, server_rx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockBackend;
    use crate::adapters::sql::{
        Migrator, SqlAgentRepository, SqlGrantRepository, SqlMemoryRepository,
        SqlMessageRepository, SqlQueryHistoryRepository,
    };
    use crate::domain::models::{Agent, ModelEndpoint, ToolsConfig};
    use crate::domain::ports::{AgentRepository, BrokerLink};
    use crate::services::retry::RetryPolicy;
    use crate::services::{ResilientStore, ToolCatalog};
    use serde_json::json;
    use std::time::Duration;

    async fn broker() -> Arc<SessionBroker> {
        let backend = Arc::new(MockBackend::new().await.unwrap());
        let store = ResilientStore::new(backend, RetryPolicy::new(1, 1, 1));
        Migrator::new(store.clone()).run().await.unwrap();
        let agents = Arc::new(SqlAgentRepository::new(store.clone()));
        agents
            .upsert(&Agent::new("QueryBot", "", ModelEndpoint::new("mock", "echo"), 3))
            .await
            .unwrap();
        let memories = Arc::new(SqlMemoryRepository::new(store.clone()));
        let history = Arc::new(SqlQueryHistoryRepository::new(store.clone()));
        let catalog = ToolCatalog::new(
            store.clone(),
            memories.clone(),
            history.clone(),
            Arc::new(SqlGrantRepository::new(store.clone())),
            ToolsConfig::default(),
            "triai",
        );
        Arc::new(SessionBroker::new(
            agents,
            Arc::new(SqlMessageRepository::new(store)),
            memories,
            history,
            catalog,
            "alice",
        ))
    }

    #[tokio::test]
    async fn test_unknown_agent_is_rejected() {
        let broker = broker().await;
        let err = connect_local(&broker, "Ghost").await.err().unwrap();
        assert!(matches!(err, LinkError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_poll_reply_and_mark_read() {
        let broker = broker().await;
        let link = connect_local(&broker, "QueryBot").await.unwrap();
        assert!(broker.is_connected("QueryBot").await);

        broker.send_message("alice", "QueryBot", "how many customers?").await.unwrap();
        assert!(link.wait_for_mail(Duration::from_secs(5)).await.unwrap());

        let inbox = link.poll().await.unwrap();
        assert_eq!(inbox.len(), 1);
        let reply = link.send_message("alice", "plenty").await.unwrap();
        assert_eq!(reply.to, "alice");
        assert_eq!(link.mark_read(&[inbox[0].id]).await.unwrap(), 1);
        assert!(link.poll().await.unwrap().is_empty());

        let response = link.call_tool("list_databases", json!({})).await.unwrap();
        assert!(response.success);
    }

    #[tokio::test]
    async fn test_disconnect_deregisters() {
        let broker = broker().await;
        let link = connect_local(&broker, "QueryBot").await.unwrap();
        link.disconnect().await;

        for _ in 0..100 {
            if !broker.is_connected("QueryBot").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!broker.is_connected("QueryBot").await);
    }

    #[tokio::test]
    async fn test_second_link_evicts_first() {
        let broker = broker().await;
        let first = connect_local(&broker, "QueryBot").await.unwrap();
        let _second = connect_local(&broker, "QueryBot").await.unwrap();

        let err = first.wait_for_mail(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, LinkError::Evicted(_)));
        assert!(!err.is_recoverable());
    }
}
