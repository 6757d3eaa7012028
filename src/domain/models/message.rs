//! Messages exchanged between humans and agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in the append-only message log.
///
/// Sender and recipient may be human or agent identities; the log does not
/// distinguish them. `read_at` is set exactly once and never cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub posted_at: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub body: String,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    pub const fn is_unread(&self) -> bool {
        self.read_at.is_none()
    }
}
