//! Message log stored in `ai_messages`.

use async_trait::async_trait;
use chrono::Utc;

use super::row_ext::RowExt;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Message, Row, SqlValue};
use crate::domain::ports::MessageRepository;
use crate::services::ResilientStore;

const COLUMNS: &str = "message_id, posted, user_from, user_to, message, user_read";

#[derive(Debug, Clone)]
pub struct SqlMessageRepository {
    store: ResilientStore,
}

impl SqlMessageRepository {
    pub const fn new(store: ResilientStore) -> Self {
        Self { store }
    }

    fn literal(&self, value: impl Into<SqlValue>) -> String {
        self.store.escape(&value.into(), true)
    }

    async fn select(&self, statement: &str) -> DomainResult<Vec<Message>> {
        self.store
            .execute_read(statement)
            .await?
            .iter()
            .map(Message::try_from)
            .collect()
    }
}

impl TryFrom<&Row> for Message {
    type Error = DomainError;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.int("message_id")?,
            posted_at: row.datetime("posted")?,
            from: row.text("user_from")?,
            to: row.text("user_to")?,
            body: row.opt_text("message").unwrap_or_default(),
            read_at: row.opt_datetime("user_read")?,
        })
    }
}

#[async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn send(&self, from: &str, to: &str, body: &str) -> DomainResult<Message> {
        if from.trim().is_empty() || to.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "sender and recipient are required".into(),
            ));
        }
        let statement = format!(
            "INSERT INTO ai_messages (posted, user_from, user_to, message) \
             VALUES ({}, {}, {}, {}) RETURNING {COLUMNS}",
            self.literal(Utc::now()),
            self.literal(from),
            self.literal(to),
            self.literal(body),
        );
        self.select(&statement)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::DataError("insert returned no message row".into()))
    }

    async fn unread_for(&self, recipient: &str) -> DomainResult<Vec<Message>> {
        self.select(&format!(
            "SELECT {COLUMNS} FROM ai_messages WHERE user_to = {} AND user_read IS NULL \
             ORDER BY posted, message_id",
            self.literal(recipient)
        ))
        .await
    }

    async fn mark_read(&self, message_id: i64) -> DomainResult<bool> {
        let changed = self
            .store
            .execute_write(&format!(
                "UPDATE ai_messages SET user_read = {} WHERE message_id = {message_id} AND user_read IS NULL",
                self.literal(Utc::now())
            ))
            .await?;
        Ok(changed > 0)
    }

    async fn history(
        &self,
        participant_a: &str,
        participant_b: &str,
        limit: u32,
    ) -> DomainResult<Vec<Message>> {
        let (a, b) = (self.literal(participant_a), self.literal(participant_b));
        self.select(&format!(
            "SELECT {COLUMNS} FROM (\
                SELECT {COLUMNS} FROM ai_messages \
                WHERE (user_from = {a} AND user_to = {b}) OR (user_from = {b} AND user_to = {a}) \
                ORDER BY posted DESC, message_id DESC LIMIT {limit}\
             ) AS latest ORDER BY posted, message_id"
        ))
        .await
    }

    async fn get(&self, message_id: i64) -> DomainResult<Option<Message>> {
        Ok(self
            .select(&format!(
                "SELECT {COLUMNS} FROM ai_messages WHERE message_id = {message_id}"
            ))
            .await?
            .into_iter()
            .next())
    }
}
