//! Tool call vocabulary shared by the catalog, the broker and agents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a tool is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectClass {
    Introspection,
    Query,
    Validation,
    Permission,
    Memory,
    History,
}

/// JSON type a parameter must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Boolean,
    StringList,
    /// A whitespace-delimited string or a list of strings.
    Tags,
}

impl ParamKind {
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            Self::Tags => value.is_string() || Self::StringList.accepts(value),
        }
    }

    pub const fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::StringList => "array of strings",
            Self::Tags => "string or array of strings",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

/// Fixed schema of one catalog tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub effect: EffectClass,
    pub params: &'static [ParamSpec],
}

impl ToolSpec {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// Why a tool call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Validation,
    Permission,
    NotFound,
    Storage,
}

/// Structured result of every tool call. Failures never escape as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
}

impl ToolResponse {
    pub const fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
        }
    }

    pub fn failure(kind: ToolErrorKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            error_kind: Some(kind),
        }
    }

    pub fn validation(error: impl Into<String>) -> Self {
        Self::failure(ToolErrorKind::Validation, error)
    }

    pub fn permission(error: impl Into<String>) -> Self {
        Self::failure(ToolErrorKind::Permission, error)
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::failure(ToolErrorKind::NotFound, error)
    }

    pub fn storage(error: impl Into<String>) -> Self {
        Self::failure(ToolErrorKind::Storage, error)
    }
}

/// A tool call request as an agent describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    #[serde(default = "empty_object")]
    pub parameters: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_param_kind_accepts() {
        assert!(ParamKind::Integer.accepts(&json!(10)));
        assert!(!ParamKind::Integer.accepts(&json!("10")));
        assert!(!ParamKind::Integer.accepts(&json!(1.5)));
        assert!(ParamKind::Tags.accepts(&json!("a b")));
        assert!(ParamKind::Tags.accepts(&json!(["a", "b"])));
        assert!(!ParamKind::Tags.accepts(&json!(["a", 1])));
    }

    #[test]
    fn test_failure_serialization_omits_data() {
        let json = serde_json::to_value(ToolResponse::validation("bad")).unwrap();
        assert_eq!(
            json,
            json!({"success": false, "error": "bad", "error_kind": "validation"})
        );
    }

    #[test]
    fn test_invocation_defaults_parameters() {
        let call: ToolInvocation = serde_json::from_value(json!({"tool": "list_databases"})).unwrap();
        assert_eq!(call.parameters, json!({}));
    }
}
