//! Shared test helpers: a scripted model provider and an in-memory capability session.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};

use switchboard::error::{Result, SwitchboardError};
use switchboard::provider::{CompletionRequest, FragmentStream, ModelProvider};
use switchboard::session::CapabilitySession;
use switchboard::tools::{ToolArguments, ToolContent, ToolManifestEntry};
use switchboard::types::*;

enum Script {
    Stream(Vec<Result<StreamFragment>>),
    Stalled(Vec<StreamFragment>),
    StartError(SwitchboardError),
}

/// What the provider was asked in one round.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
    pub temperature: Option<f64>,
}

/// A provider that replays queued fragment streams, one per round.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a turn that streams `fragments` and ends.
    pub fn queue(&self, fragments: Vec<StreamFragment>) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .push_back(Script::Stream(fragments.into_iter().map(Ok).collect()));
        self
    }

    /// Queue a turn that streams `fragments`, then fails.
    pub fn queue_broken(&self, fragments: Vec<StreamFragment>, error: SwitchboardError) -> &Self {
        let mut items: Vec<Result<StreamFragment>> = fragments.into_iter().map(Ok).collect();
        items.push(Err(error));
        self.scripts.lock().unwrap().push_back(Script::Stream(items));
        self
    }

    /// Queue a turn that streams `fragments` and then never ends.
    pub fn queue_stalled(&self, fragments: Vec<StreamFragment>) -> &Self {
        self.scripts.lock().unwrap().push_back(Script::Stalled(fragments));
        self
    }

    /// Queue a request that fails before streaming.
    pub fn queue_start_error(&self, error: SwitchboardError) -> &Self {
        self.scripts.lock().unwrap().push_back(Script::StartError(error));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn stream_completion(&self, request: &CompletionRequest<'_>) -> Result<FragmentStream> {
        self.requests.lock().unwrap().push(RecordedRequest {
            messages: request.messages.to_vec(),
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
            temperature: request.sampling.temperature,
        });
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SwitchboardError::InvalidState("no scripted response left".into()))?;
        match script {
            Script::Stream(items) => Ok(stream::iter(items).boxed()),
            Script::Stalled(fragments) => Ok(stream::iter(fragments.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            Script::StartError(error) => Err(error),
        }
    }
}

/// Fragments for a plain text answer, split into two deltas.
pub fn text_turn(text: &str) -> Vec<StreamFragment> {
    let middle = text.len() / 2;
    let (head, tail) = text.split_at(middle);
    vec![
        StreamFragment::text(head),
        StreamFragment::text(tail),
        StreamFragment::finish(FinishReason::Stop),
    ]
}

/// Fragments for a turn requesting `calls` as `(index, id, name, arguments)`.
///
/// Each invocation's arguments arrive in two halves after its opening fragment.
pub fn tool_turn(calls: &[(u32, &str, &str, &str)]) -> Vec<StreamFragment> {
    let mut fragments = Vec::new();
    for (index, id, name, _) in calls {
        fragments.push(StreamFragment::tool_call(ToolCallFragment::start(*index, *id, *name)));
    }
    for (index, _, _, arguments) in calls {
        let middle = arguments.len() / 2;
        let (head, tail) = arguments.split_at(middle);
        fragments.push(StreamFragment::tool_call(ToolCallFragment::arguments(*index, head)));
        fragments.push(StreamFragment::tool_call(ToolCallFragment::arguments(*index, tail)));
    }
    fragments.push(StreamFragment::finish(FinishReason::ToolCalls));
    fragments
}

/// Usage-only fragment.
pub fn usage(input: u32, output: u32) -> StreamFragment {
    StreamFragment {
        usage: Some(Usage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
        }),
        ..Default::default()
    }
}

#[derive(Clone)]
pub enum Reply {
    Text(String),
    Fail(String),
    Slow(Duration, String),
}

/// An in-memory session with scripted tool replies.
pub struct FakeSession {
    name: String,
    tools: Vec<ToolManifestEntry>,
    replies: HashMap<String, Reply>,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl FakeSession {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tools: Vec::new(),
            replies: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn tool(mut self, name: &str, reply: Reply) -> Self {
        self.tools.push(ToolManifestEntry::new(
            name,
            format!("{name} tool"),
            serde_json::json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
            }),
        ));
        self.replies.insert(name.to_string(), reply);
        self
    }

    pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CapabilitySession for FakeSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolManifestEntry>> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: ToolArguments) -> Result<Vec<ToolContent>> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.into_map()));
        match self.replies.get(name) {
            Some(Reply::Text(text)) => Ok(vec![ToolContent::text(text.clone())]),
            Some(Reply::Fail(message)) => Err(SwitchboardError::remote_call(name, message.clone())),
            Some(Reply::Slow(delay, text)) => {
                tokio::time::sleep(*delay).await;
                Ok(vec![ToolContent::text(text.clone())])
            }
            None => Err(SwitchboardError::UnknownTool {
                name: name.to_string(),
            }),
        }
    }
}

pub fn as_session(session: &Arc<FakeSession>) -> Arc<dyn CapabilitySession> {
    Arc::clone(session) as Arc<dyn CapabilitySession>
}
