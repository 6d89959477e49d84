//! OpenAI Chat Completions streaming provider.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Result, SwitchboardError};
use crate::types::{FinishReason, Message, StreamFragment, ToolCallFragment, Usage};

use super::http::{bearer_headers, parse_sse_data, shared_client, status_to_error, SseLineBuffer};
use super::{CompletionRequest, FragmentStream, ModelProvider};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Streaming client for any endpoint speaking the chat-completions protocol.
pub struct OpenAiProvider {
    name: &'static str,
    model: String,
    url: String,
    headers: HeaderMap,
}

impl OpenAiProvider {
    /// Bearer-authenticated provider rooted at `base_url` (`/chat/completions` is appended).
    pub fn new(model: String, api_key: String, base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            name: "openai",
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
            headers: bearer_headers(&api_key),
        }
    }

    /// Provider posting to a fully-formed completions URL with custom headers.
    pub fn with_endpoint(name: &'static str, model: String, url: String, headers: HeaderMap) -> Self {
        Self {
            name,
            model,
            url,
            headers,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn build_request_body(&self, request: &CompletionRequest<'_>) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(message_to_openai).collect();

        let mut obj = serde_json::Map::new();
        obj.insert("model".into(), self.model.clone().into());
        obj.insert("messages".into(), messages.into());
        obj.insert("stream".into(), true.into());
        obj.insert("stream_options".into(), json!({ "include_usage": true }));

        let sampling = request.sampling;
        if let Some(max) = sampling.max_tokens {
            obj.insert("max_tokens".into(), max.into());
        }
        if let Some(temp) = sampling.temperature {
            obj.insert("temperature".into(), temp.into());
        }
        if let Some(top_p) = sampling.top_p {
            obj.insert("top_p".into(), top_p.into());
        }
        if let Some(ref stops) = sampling.stop_sequences {
            obj.insert("stop".into(), json!(stops));
        }
        if let Some(seed) = sampling.seed {
            obj.insert("seed".into(), seed.into());
        }
        if let Some(ref user) = sampling.user {
            obj.insert("user".into(), user.clone().into());
        }

        if !request.tools.is_empty() {
            let tool_defs: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        }
                    })
                })
                .collect();
            obj.insert("tools".into(), tool_defs.into());
            if let Some(parallel) = sampling.parallel_tool_calls {
                obj.insert("parallel_tool_calls".into(), parallel.into());
            }
        }

        Value::Object(obj)
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        self.name
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn stream_completion(&self, request: &CompletionRequest<'_>) -> Result<FragmentStream> {
        let body = self.build_request_body(request);

        debug!(
            provider = self.name,
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "stream_completion"
        );

        let resp = shared_client()
            .post(&self.url)
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let byte_stream = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut lines = SseLineBuffer::default();
            let mut finished = false;
            futures::pin_mut!(byte_stream);

            loop {
                let at_eof = match byte_stream.next().await {
                    Some(Ok(chunk)) => {
                        lines.extend(&chunk);
                        false
                    }
                    Some(Err(e)) => {
                        yield Err(SwitchboardError::Network(e));
                        return;
                    }
                    None => {
                        lines.close();
                        true
                    }
                };

                while let Some(line) = lines.next_line() {
                    let event = match line.and_then(|line| sse_event(&line)) {
                        Ok(event) => event,
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    };
                    match event {
                        SseEvent::Skip => {}
                        SseEvent::Done => return,
                        SseEvent::Fragments(fragments) => {
                            for fragment in fragments {
                                finished |= fragment.finish_reason.is_some();
                                yield Ok(fragment);
                            }
                        }
                    }
                }

                if at_eof {
                    if !finished {
                        yield Err(SwitchboardError::Transport(
                            "stream ended before [DONE]".into(),
                        ));
                    }
                    return;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

enum SseEvent {
    Skip,
    Done,
    Fragments(Vec<StreamFragment>),
}

fn sse_event(line: &str) -> Result<SseEvent> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(SseEvent::Skip);
    }
    if line == "data: [DONE]" || line == "data:[DONE]" {
        return Ok(SseEvent::Done);
    }
    match parse_sse_data(line) {
        Some(data) => parse_stream_chunk(data).map(SseEvent::Fragments),
        None => Ok(SseEvent::Skip),
    }
}

/// Translate one SSE data payload into fragments.
///
/// A payload carrying an `error` object ends the stream with an API error.
/// A payload that is not a valid chunk is a transport error, since it may
/// have carried argument text.
pub(crate) fn parse_stream_chunk(data: &str) -> Result<Vec<StreamFragment>> {
    let chunk: OpenAiStreamChunk = serde_json::from_str(data)
        .map_err(|e| SwitchboardError::Transport(format!("malformed stream chunk: {e}")))?;

    if let Some(error) = chunk.error {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(SwitchboardError::api(200, message));
    }

    let mut fragments = Vec::new();
    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            fragments.push(StreamFragment::text(text));
        }
        for call in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match call.function {
                Some(function) => (function.name, function.arguments),
                None => (None, None),
            };
            fragments.push(StreamFragment::tool_call(ToolCallFragment {
                index: call.index,
                id: call.id,
                name,
                arguments,
            }));
        }
        if let Some(reason) = choice.finish_reason.as_deref().and_then(parse_finish_reason) {
            fragments.push(StreamFragment::finish(reason));
        }
    }
    if let Some(usage) = chunk.usage {
        fragments.push(StreamFragment {
            usage: Some(Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            }),
            ..Default::default()
        });
    }
    Ok(fragments)
}

fn parse_finish_reason(s: &str) -> Option<FinishReason> {
    match s {
        "stop" => Some(FinishReason::Stop),
        "length" => Some(FinishReason::Length),
        "tool_calls" | "function_call" => Some(FinishReason::ToolCalls),
        "content_filter" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

pub(crate) fn message_to_openai(msg: &Message) -> Value {
    match msg {
        Message::System { content } => json!({ "role": "system", "content": content }),
        Message::User { content } => json!({ "role": "user", "content": content }),
        Message::Assistant {
            content,
            tool_calls,
        } if !tool_calls.is_empty() => {
            let tc_json: Vec<Value> = tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.arguments,
                        }
                    })
                })
                .collect();
            json!({
                "role": "assistant",
                "content": if content.is_empty() { Value::Null } else { Value::String(content.clone()) },
                "tool_calls": tc_json,
            })
        }
        Message::Assistant { content, .. } => json!({ "role": "assistant", "content": content }),
        Message::Tool {
            tool_call_id,
            name,
            content,
        } => json!({
            "role": "tool",
            "tool_call_id": tool_call_id,
            "name": name,
            "content": content,
        }),
    }
}

// Chat-completions stream types (internal)

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
    error: Option<Value>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct OpenAiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

#[derive(Deserialize)]
struct OpenAiToolCallDelta {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Deserialize)]
struct OpenAiFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
