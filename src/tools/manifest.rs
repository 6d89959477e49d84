//! Tool manifests advertised by capability sessions.

use serde::{Deserialize, Serialize};

/// One tool a session advertises, passed verbatim to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolManifestEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema describing the tool's arguments.
    pub input_schema: serde_json::Value,
}

impl ToolManifestEntry {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Manifest entry for a tool that takes no arguments.
    pub fn without_arguments(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(
            name,
            description,
            serde_json::json!({
                "type": "object",
                "properties": {},
                "required": [],
            }),
        )
    }
}
