use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Message;

/// Append-only message log with one-shot read marking.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Insert a message stamped with the server's current time.
    ///
    /// Write failures are returned to the caller, never swallowed.
    async fn send(&self, from: &str, to: &str, body: &str) -> DomainResult<Message>;

    /// Unread messages addressed to `recipient`, oldest first.
    async fn unread_for(&self, recipient: &str) -> DomainResult<Vec<Message>>;

    /// Set the read timestamp if it is still unset.
    ///
    /// Returns `true` when this call changed the message. Marking an already
    /// read (or unknown) message is a no-op.
    async fn mark_read(&self, message_id: i64) -> DomainResult<bool>;

    /// The latest `limit` messages between two identities, oldest first.
    async fn history(
        &self,
        participant_a: &str,
        participant_b: &str,
        limit: u32,
    ) -> DomainResult<Vec<Message>>;

    async fn get(&self, message_id: i64) -> DomainResult<Option<Message>>;
}
