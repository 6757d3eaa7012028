//! Registered agent identities.

use serde::{Deserialize, Serialize};

/// Provider + model pair used to generate an agent's replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEndpoint {
    /// Provider key, e.g. `ollama` or `mock`.
    pub provider: String,
    /// Provider-specific model identifier.
    pub model: String,
}

impl ModelEndpoint {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// A registered autonomous responder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub description: String,
    pub endpoint: ModelEndpoint,
    pub poll_interval_secs: u64,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        endpoint: ModelEndpoint,
        poll_interval_secs: u64,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            endpoint,
            poll_interval_secs,
        }
    }
}

/// An explicit permission: `operation` on `object_name` for one agent.
///
/// Either field may be `*` to match anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub agent: String,
    pub object_name: String,
    pub operation: String,
}

impl Grant {
    pub fn new(
        agent: impl Into<String>,
        object_name: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            agent: agent.into(),
            object_name: object_name.into(),
            operation: operation.into().to_ascii_uppercase(),
        }
    }

    /// Whether this grant covers `operation` on `object`.
    pub fn covers(&self, object: &str, operation: &str) -> bool {
        let object_ok = self.object_name == "*" || self.object_name.eq_ignore_ascii_case(object);
        let operation_ok =
            self.operation == "*" || self.operation.eq_ignore_ascii_case(operation.trim());
        object_ok && operation_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_object_grant() {
        let grant = Grant::new("QueryBot", "*", "select");
        assert_eq!(grant.operation, "SELECT");
        assert!(grant.covers("customers", "SELECT"));
        assert!(grant.covers("orders", "select"));
        assert!(!grant.covers("orders", "DELETE"));
    }

    #[test]
    fn test_exact_object_grant_is_case_insensitive() {
        let grant = Grant::new("QueryBot", "Orders", "SELECT");
        assert!(grant.covers("orders", "SELECT"));
        assert!(!grant.covers("customers", "SELECT"));
    }
}
