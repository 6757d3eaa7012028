//! Agent memory domain model.
//!
//! Memories are tagged, recall-counted notes owned by one agent. Tags behave
//! as a set: matching is an order-insensitive intersection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Normalized set of memory tags.
///
/// Input is split on whitespace and lowercased; duplicates collapse and the
/// textual form is always sorted, so `"Report billing billing"` and
/// `"billing report"` are the same set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    pub fn parse(text: &str) -> Self {
        Self::from_iter(text.split_whitespace())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(&tag.to_lowercase())
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.0.intersection(&other.0).next().is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Whitespace-joined storage form.
    pub fn joined(&self) -> String {
        self.0.iter().cloned().collect::<Vec<_>>().join(" ")
    }
}

impl<S: AsRef<str>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .flat_map(|s| {
                    s.as_ref()
                        .split_whitespace()
                        .map(str::to_lowercase)
                        .collect::<Vec<_>>()
                })
                .collect(),
        )
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

impl From<TagSet> for String {
    fn from(tags: TagSet) -> Self {
        tags.joined()
    }
}

impl From<String> for TagSet {
    fn from(text: String) -> Self {
        Self::parse(&text)
    }
}

/// A long-term note owned by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: i64,
    pub agent: String,
    pub created_at: DateTime<Utc>,
    pub times_recalled: i64,
    pub last_recalled: Option<DateTime<Utc>>,
    pub label: String,
    pub body: String,
    pub tags: TagSet,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Memory {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Fields for a new memory.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMemory {
    pub agent: String,
    pub label: String,
    pub body: String,
    pub tags: TagSet,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryUpdate {
    pub body: Option<String>,
    pub tags: Option<TagSet>,
}

impl MemoryUpdate {
    pub const fn is_empty(&self) -> bool {
        self.body.is_none() && self.tags.is_none()
    }
}

/// Per-agent memory usage summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub agent: String,
    pub total_memories: i64,
    pub unused_memories: i64,
    pub total_recalls: i64,
    pub max_recalls: i64,
    pub average_recalls: f64,
    /// Tag usage, most frequent first.
    pub tag_frequencies: Vec<TagFrequency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFrequency {
    pub tag: String,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_tagset_normalizes() {
        let tags = TagSet::parse("Report  billing\tbilling ");
        assert_eq!(tags.joined(), "billing report");
        assert_eq!(tags.len(), 2);
        assert!(tags.contains("BILLING"));
    }

    #[test]
    fn test_tagset_order_insensitive_equality() {
        assert_eq!(TagSet::parse("a b c"), TagSet::parse("c a b a"));
    }

    #[test]
    fn test_tagset_from_list_splits_entries() {
        let tags: TagSet = ["sales q3", "Sales"].into_iter().collect();
        assert_eq!(tags.joined(), "q3 sales");
    }

    #[test]
    fn test_tagset_intersects() {
        let memory = TagSet::parse("billing report");
        assert!(memory.intersects(&TagSet::parse("billing")));
        assert!(!memory.intersects(&TagSet::parse("hr")));
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let memory = Memory {
            id: 1,
            agent: "QueryBot".into(),
            created_at: now,
            times_recalled: 0,
            last_recalled: None,
            label: "l".into(),
            body: "b".into(),
            tags: TagSet::default(),
            expires_at: Some(now - Duration::seconds(1)),
        };
        assert!(memory.is_expired_at(now));
        assert!(!Memory { expires_at: None, ..memory }.is_expired_at(now));
    }
}
