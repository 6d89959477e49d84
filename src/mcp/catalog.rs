//! MCP prompts and resources: the non-tool parts of a server's catalog.

use rmcp::model::{GetPromptResult, Prompt, PromptMessageContent, Resource, ResourceContents};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SwitchboardError};
use crate::types::Message;

/// A prompt template advertised by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpPrompt {
    pub name: String,
    pub description: Option<String>,
    /// Argument names, required ones included.
    #[serde(default)]
    pub arguments: Vec<String>,
}

/// A readable resource advertised by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpResource {
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
}

/// Body of a read resource. Blobs stay base64-encoded as sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ResourceBody {
    Text(String),
    Blob(String),
}

pub(crate) fn map_prompt(prompt: Prompt) -> McpPrompt {
    McpPrompt {
        name: prompt.name,
        description: prompt.description,
        arguments: prompt
            .arguments
            .unwrap_or_default()
            .into_iter()
            .map(|argument| argument.name)
            .collect(),
    }
}

pub(crate) fn map_resource(resource: Resource) -> McpResource {
    let raw = resource.raw;
    McpResource {
        uri: raw.uri,
        name: raw.name,
        description: raw.description,
        mime_type: raw.mime_type,
    }
}

/// Text messages of a prompt, each followed by a newline. Other content is dropped.
pub(crate) fn prompt_text(result: &GetPromptResult) -> String {
    let mut text = String::new();
    for message in &result.messages {
        if let PromptMessageContent::Text { text: part } = &message.content {
            text.push_str(part);
            text.push('\n');
        }
    }
    text
}

/// The first content item of a read resource.
pub(crate) fn first_resource_body(uri: &str, contents: Vec<ResourceContents>) -> Result<ResourceBody> {
    match contents.into_iter().next() {
        Some(ResourceContents::TextResourceContents { text, .. }) => Ok(ResourceBody::Text(text)),
        Some(ResourceContents::BlobResourceContents { blob, .. }) => Ok(ResourceBody::Blob(blob)),
        None => Err(SwitchboardError::Transport(format!(
            "resource {uri} returned no contents"
        ))),
    }
}

/// User message carrying a server prompt as guidance for the model.
pub fn guidance_message(session: &str, prompt: &str, content: &str) -> Message {
    Message::user(format!("Guidance for {prompt} from {session}:\n{content}"))
}
