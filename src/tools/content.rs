//! Content items returned by a tool call.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One content item of a tool result. The first item is the primary result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
    Json { value: Value },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn json(value: Value) -> Self {
        Self::Json { value }
    }
}

impl fmt::Display for ToolContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text { text } => f.write_str(text),
            Self::Json { value } => match value {
                Value::String(s) => f.write_str(s),
                other => write!(f, "{other}"),
            },
        }
    }
}
