//! Live-output and operator-visibility events.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::ToolInvocation;

/// Events emitted while a completion is in progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    RoundStarted {
        round: usize,
    },
    /// Assistant text as it arrives from the stream.
    TextDelta {
        text: String,
    },
    /// First fragment seen for a stream index.
    ToolCallStarted {
        index: u32,
        id: Option<String>,
        name: Option<String>,
    },
    ToolDispatchStarted {
        call: ToolInvocation,
    },
    ToolDispatchFinished {
        call_id: String,
        tool_name: String,
        is_error: bool,
    },
    RoundFinished {
        round: usize,
        tool_calls: usize,
    },
}

/// Callback used for streaming conversation events.
pub type EventSink = Arc<dyn Fn(ConversationEvent) + Send + Sync>;

/// Optional sink wrapper shared by the aggregator, dispatcher and orchestrator.
#[derive(Clone, Default)]
pub struct EventEmitter {
    sink: Option<EventSink>,
}

impl EventEmitter {
    pub fn new(sink: Option<EventSink>) -> Self {
        Self { sink }
    }

    pub fn emit(&self, event: ConversationEvent) {
        if let Some(sink) = &self.sink {
            (sink)(event);
        }
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sink", &self.sink.as_ref().map(|_| ".."))
            .finish()
    }
}
