//! Message types for model communication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::error::{Result, SwitchboardError};

/// One conversation turn.
///
/// Each role carries only the fields valid for it: invocations live on
/// assistant turns, and only tool turns reference the invocation they answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolInvocation>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl Message {
    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::System {
            content: text.into(),
        }
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content: text.into(),
        }
    }

    /// Create an assistant message without invocations.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            content: text.into(),
            tool_calls: Vec::new(),
        }
    }

    /// Create an assistant message requesting tool invocations.
    pub fn assistant_with_tools(text: impl Into<String>, tool_calls: Vec<ToolInvocation>) -> Self {
        Self::Assistant {
            content: text.into(),
            tool_calls,
        }
    }

    /// Create a tool result message answering `invocation`.
    pub fn tool_result(invocation: &ToolInvocation, content: impl Into<String>) -> Self {
        Self::Tool {
            tool_call_id: invocation.id.clone(),
            name: invocation.name.clone(),
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::System { .. } => Role::System,
            Self::User { .. } => Role::User,
            Self::Assistant { .. } => Role::Assistant,
            Self::Tool { .. } => Role::Tool,
        }
    }

    /// Textual content (possibly empty).
    pub fn content(&self) -> &str {
        match self {
            Self::System { content }
            | Self::User { content }
            | Self::Assistant { content, .. }
            | Self::Tool { content, .. } => content,
        }
    }

    /// Invocations requested by this turn; empty unless assistant.
    pub fn tool_calls(&self) -> &[ToolInvocation] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    /// The invocation id a tool message answers.
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::Tool { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }
}

/// Conversation role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the model.
///
/// `arguments` is the raw text the model streamed; it is parsed only when the
/// call is dispatched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolInvocation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Ordered, append-only message history for one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    id: Uuid,
    created_at: DateTime<Utc>,
    messages: Vec<Message>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    /// Start a conversation with a system prompt.
    pub fn with_system(prompt: impl Into<String>) -> Self {
        let mut conversation = Self::new();
        conversation.messages.push(Message::system(prompt));
        conversation
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Append a message.
    ///
    /// A tool message is accepted only when it answers a still-unanswered
    /// invocation of the latest assistant turn.
    pub fn push(&mut self, message: Message) -> Result<()> {
        if let Message::Tool { tool_call_id, .. } = &message {
            if !self.pending_tool_calls().iter().any(|call| &call.id == tool_call_id) {
                return Err(SwitchboardError::InvalidState(format!(
                    "tool message '{tool_call_id}' does not answer a pending invocation"
                )));
            }
        }
        self.messages.push(message);
        Ok(())
    }

    /// Append an assistant turn together with the tool messages answering it.
    ///
    /// Nothing is appended unless every message is valid.
    pub fn commit_round(&mut self, assistant: Message, tool_messages: Vec<Message>) -> Result<()> {
        if assistant.role() != Role::Assistant {
            return Err(SwitchboardError::InvalidState(format!(
                "round must start with an assistant message, got {}",
                assistant.role()
            )));
        }
        let mut staged = self.clone();
        staged.push(assistant)?;
        for message in tool_messages {
            staged.push(message)?;
        }
        self.messages = staged.messages;
        Ok(())
    }

    /// Invocations of the latest assistant turn that have no tool message yet.
    ///
    /// Each tool message answers one invocation, so an id repeated within a
    /// turn needs as many answers as it has invocations.
    pub fn pending_tool_calls(&self) -> Vec<&ToolInvocation> {
        let mut answered: Vec<&str> = Vec::new();
        for message in self.messages.iter().rev() {
            match message {
                Message::Tool { tool_call_id, .. } => answered.push(tool_call_id),
                Message::Assistant { tool_calls, .. } => {
                    return tool_calls
                        .iter()
                        .filter(|call| {
                            match answered.iter().position(|id| *id == call.id) {
                                Some(pos) => {
                                    answered.swap_remove(pos);
                                    false
                                }
                                None => true,
                            }
                        })
                        .collect();
                }
                _ => return Vec::new(),
            }
        }
        Vec::new()
    }
}
