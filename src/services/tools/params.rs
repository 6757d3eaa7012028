//! Schema validation and typed access for tool parameters.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::domain::models::{ParamKind, TagSet, ToolResponse, ToolSpec};
use crate::domain::ports::is_identifier;

/// Parameters that passed schema validation for one tool.
///
/// Accessors only fail on value-level problems (an empty identifier, a
/// negative limit); presence and JSON type were checked in [`validate`].
#[derive(Debug)]
pub struct Params<'a> {
    tool: &'static str,
    values: &'a Map<String, Value>,
}

/// Check `raw` against `spec` before anything runs.
pub fn validate<'a>(spec: &ToolSpec, raw: &'a Value) -> Result<Params<'a>, ToolResponse> {
    let Some(values) = raw.as_object() else {
        return Err(ToolResponse::validation(format!(
            "{}: parameters must be a JSON object",
            spec.name
        )));
    };

    if let Some(unexpected) = values.keys().find(|k| spec.param(k).is_none()) {
        return Err(ToolResponse::validation(format!(
            "{}: unexpected parameter '{unexpected}'",
            spec.name
        )));
    }

    for param in spec.params {
        match values.get(param.name) {
            None | Some(Value::Null) if param.required => {
                return Err(ToolResponse::validation(format!(
                    "{}: missing required parameter '{}'",
                    spec.name, param.name
                )));
            }
            None | Some(Value::Null) => {}
            Some(value) if !param.kind.accepts(value) => {
                return Err(ToolResponse::validation(format!(
                    "{}: parameter '{}' must be {}",
                    spec.name,
                    param.name,
                    param.kind.json_type()
                )));
            }
            Some(_) => {}
        }
    }

    Ok(Params {
        tool: spec.name,
        values,
    })
}

impl<'a> Params<'a> {
    fn get(&self, name: &str) -> Option<&'a Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    fn invalid(&self, message: impl std::fmt::Display) -> ToolResponse {
        ToolResponse::validation(format!("{}: {message}", self.tool))
    }

    pub fn opt_str(&self, name: &str) -> Option<&'a str> {
        self.get(name).and_then(Value::as_str)
    }

    /// A required string with surrounding whitespace removed; empty is invalid.
    pub fn str(&self, name: &str) -> Result<&'a str, ToolResponse> {
        let value = self.opt_str(name).map(str::trim).unwrap_or_default();
        if value.is_empty() {
            Err(self.invalid(format_args!("parameter '{name}' must not be empty")))
        } else {
            Ok(value)
        }
    }

    /// A table, column or object name safe to interpolate.
    pub fn identifier(&self, name: &str) -> Result<&'a str, ToolResponse> {
        let value = self.str(name)?;
        if is_identifier(value) {
            Ok(value)
        } else {
            Err(self.invalid(format_args!(
                "parameter '{name}' is not a valid identifier: {value:?}"
            )))
        }
    }

    pub fn opt_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn int(&self, name: &str) -> Result<i64, ToolResponse> {
        self.opt_int(name)
            .ok_or_else(|| self.invalid(format_args!("parameter '{name}' is out of range")))
    }

    /// A positive count, `default` when absent, capped at `max`.
    pub fn count(&self, name: &str, default: u32, max: u32) -> Result<u32, ToolResponse> {
        match self.get(name) {
            None => Ok(default.min(max)),
            Some(value) => match value.as_u64() {
                Some(n) if n > 0 => Ok(u32::try_from(n).unwrap_or(u32::MAX).min(max)),
                _ => Err(self.invalid(format_args!("parameter '{name}' must be positive"))),
            },
        }
    }

    pub fn opt_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn string_list(&self, name: &str) -> Option<Vec<&'a str>> {
        self.get(name)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
    }

    /// Tags given as a whitespace-delimited string or a list of strings.
    pub fn opt_tags(&self, name: &str) -> Option<TagSet> {
        match self.get(name)? {
            Value::String(text) => Some(TagSet::parse(text)),
            Value::Array(items) => Some(items.iter().filter_map(Value::as_str).collect()),
            _ => None,
        }
    }

    pub fn tags(&self, name: &str) -> Result<TagSet, ToolResponse> {
        match self.opt_tags(name) {
            Some(tags) if !tags.is_empty() => Ok(tags),
            _ => Err(self.invalid(format_args!("parameter '{name}' needs at least one tag"))),
        }
    }

    pub fn opt_datetime(&self, name: &str) -> Result<Option<DateTime<Utc>>, ToolResponse> {
        self.opt_str(name)
            .map(|text| {
                DateTime::parse_from_rfc3339(text.trim())
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| {
                        self.invalid(format_args!("parameter '{name}' must be an RFC 3339 timestamp"))
                    })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{EffectClass, ParamSpec, ToolErrorKind};
    use serde_json::json;

    const SPEC: ToolSpec = ToolSpec {
        name: "probe",
        description: "test tool",
        effect: EffectClass::Introspection,
        params: &[
            ParamSpec {
                name: "table_name",
                kind: ParamKind::String,
                required: true,
                description: "",
            },
            ParamSpec {
                name: "limit",
                kind: ParamKind::Integer,
                required: false,
                description: "",
            },
            ParamSpec {
                name: "tags",
                kind: ParamKind::Tags,
                required: false,
                description: "",
            },
        ],
    };

    fn error_of(result: Result<Params<'_>, ToolResponse>) -> String {
        let response = result.unwrap_err();
        assert_eq!(response.error_kind, Some(ToolErrorKind::Validation));
        response.error.unwrap()
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(error_of(validate(&SPEC, &json!([1]))).contains("JSON object"));
    }

    #[test]
    fn test_rejects_missing_unexpected_and_mistyped() {
        assert!(error_of(validate(&SPEC, &json!({}))).contains("missing"));
        assert!(error_of(validate(&SPEC, &json!({"table_name": "t", "x": 1}))).contains("unexpected"));
        assert!(error_of(validate(&SPEC, &json!({"table_name": 5}))).contains("must be string"));
    }

    #[test]
    fn test_identifier_check() {
        let raw = json!({"table_name": "orders; DROP TABLE x"});
        let params = validate(&SPEC, &raw).unwrap();
        assert!(params.identifier("table_name").is_err());

        let raw = json!({"table_name": "main.orders"});
        let params = validate(&SPEC, &raw).unwrap();
        assert_eq!(params.identifier("table_name").unwrap(), "main.orders");
    }

    #[test]
    fn test_count_defaults_and_caps() {
        let raw = json!({"table_name": "t", "limit": 500});
        let params = validate(&SPEC, &raw).unwrap();
        assert_eq!(params.count("limit", 10, 100).unwrap(), 100);
        assert_eq!(params.count("missing", 10, 100).unwrap(), 10);

        let raw = json!({"table_name": "t", "limit": -1});
        assert!(validate(&SPEC, &raw).unwrap().count("limit", 10, 100).is_err());
    }

    #[test]
    fn test_tags_accept_string_or_list() {
        let raw = json!({"table_name": "t", "tags": "Billing report"});
        let from_string = validate(&SPEC, &raw).unwrap().tags("tags").unwrap();
        let raw = json!({"table_name": "t", "tags": ["report", "billing"]});
        let from_list = validate(&SPEC, &raw).unwrap().tags("tags").unwrap();
        assert_eq!(from_string, from_list);
    }
}
