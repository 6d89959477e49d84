//! Lazy parsing of raw tool call arguments.

use serde_json::{Map, Value};

use crate::error::{Result, SwitchboardError};

/// Parsed arguments of one tool invocation: always a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    value: Map<String, Value>,
}

impl ToolArguments {
    pub fn new(value: Map<String, Value>) -> Self {
        Self { value }
    }

    /// Parse the raw argument text a model streamed for `tool_name`.
    ///
    /// Blank text and `null` mean "no arguments". Anything else must be a JSON
    /// object.
    pub fn parse(tool_name: &str, raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::new(Map::new()));
        }
        let parsed: Value =
            serde_json::from_str(trimmed).map_err(|e| SwitchboardError::ArgumentParse {
                tool_name: tool_name.to_string(),
                message: format!("arguments must be valid JSON: {e}"),
            })?;
        match parsed {
            Value::Null => Ok(Self::new(Map::new())),
            Value::Object(map) => Ok(Self::new(map)),
            other => Err(SwitchboardError::ArgumentParse {
                tool_name: tool_name.to_string(),
                message: format!("arguments must be a JSON object; got {other}"),
            }),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.value
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Get an optional string argument.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(|v| v.as_str())
    }

    /// Deserialize the entire arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.value.clone()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_object_arguments() {
        let args = ToolArguments::parse("search_user", r#"{"name":"Ann"}"#).expect("parse");
        assert_eq!(args.get_str("name"), Some("Ann"));
    }

    #[test]
    fn blank_and_null_mean_no_arguments() {
        assert!(ToolArguments::parse("list", "").expect("blank").is_empty());
        assert!(ToolArguments::parse("list", "  \n").expect("whitespace").is_empty());
        assert!(ToolArguments::parse("list", "null").expect("null").is_empty());
    }

    #[test]
    fn truncated_json_is_an_argument_parse_error() {
        let err = ToolArguments::parse("search_user", r#"{"nam"#).expect_err("truncated");
        assert!(matches!(
            err,
            SwitchboardError::ArgumentParse { tool_name, message }
            if tool_name == "search_user" && message.contains("valid JSON")
        ));
    }

    #[test]
    fn non_object_json_is_rejected() {
        let err = ToolArguments::parse("search_user", r#"["Ann"]"#).expect_err("array");
        assert!(matches!(err, SwitchboardError::ArgumentParse { .. }));
    }

    #[test]
    fn deserializes_into_typed_struct() {
        #[derive(serde::Deserialize)]
        struct Query {
            name: String,
            limit: u32,
        }
        let args = ToolArguments::new(
            json!({"name": "Ann", "limit": 5})
                .as_object()
                .cloned()
                .expect("object"),
        );
        let query: Query = args.deserialize().expect("deserialize");
        assert_eq!(query.name, "Ann");
        assert_eq!(query.limit, 5);
    }
}
