//! Reassembly of streamed fragments into one assistant turn.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use futures::StreamExt;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, SwitchboardError};
use crate::events::{ConversationEvent, EventEmitter};
use crate::provider::FragmentStream;
use crate::types::{FinishReason, Message, StreamFragment, ToolCallFragment, ToolInvocation, Usage};

#[derive(Debug, Default)]
struct PartialInvocation {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl PartialInvocation {
    fn merge(&mut self, fragment: ToolCallFragment) {
        if self.id.is_none() {
            self.id = fragment.id.filter(|id| !id.is_empty());
        }
        if self.name.is_none() {
            self.name = fragment.name.filter(|name| !name.is_empty());
        }
        if let Some(arguments) = fragment.arguments {
            self.arguments.push_str(&arguments);
        }
    }

    fn complete(self, index: u32) -> ToolInvocation {
        let id = self.id.unwrap_or_else(|| {
            let synthesized = format!("call_{index}");
            warn!(index, id = %synthesized, "stream ended without an invocation id");
            synthesized
        });
        let name = self.name.unwrap_or_else(|| {
            warn!(index, call_id = %id, "stream ended without a tool name");
            String::new()
        });
        ToolInvocation {
            id,
            name,
            arguments: self.arguments,
        }
    }
}

/// `{id}_{index}`, with a counter appended until it is unused in the turn.
fn unique_id(id: &str, index: u32, taken: &HashSet<String>) -> String {
    let base = format!("{id}_{index}");
    let mut candidate = base.clone();
    let mut n = 2;
    while taken.contains(&candidate) {
        candidate = format!("{base}_{n}");
        n += 1;
    }
    candidate
}

/// One fully aggregated model response.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantTurn {
    pub message: Message,
    pub usage: Usage,
    pub finish_reason: Option<FinishReason>,
}

/// Accumulates fragments until the stream ends.
///
/// Identifier and name are set once per index; argument text is only ever
/// appended. Invocations come out in ascending index order.
#[derive(Debug, Default)]
pub struct DeltaAggregator {
    text: String,
    invocations: BTreeMap<u32, PartialInvocation>,
    usage: Option<Usage>,
    finish_reason: Option<FinishReason>,
    events: EventEmitter,
}

impl DeltaAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: EventEmitter) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    /// Merge one fragment.
    pub fn push(&mut self, fragment: StreamFragment) {
        if let Some(text) = fragment.content.filter(|text| !text.is_empty()) {
            self.events.emit(ConversationEvent::TextDelta { text: text.clone() });
            self.text.push_str(&text);
        }
        if let Some(call) = fragment.tool_call {
            let index = call.index;
            let partial = self.invocations.entry(index).or_insert_with(|| {
                self.events.emit(ConversationEvent::ToolCallStarted {
                    index,
                    id: call.id.clone(),
                    name: call.name.clone(),
                });
                PartialInvocation::default()
            });
            partial.merge(call);
        }
        if let Some(reason) = fragment.finish_reason {
            self.finish_reason = Some(reason);
        }
        if let Some(usage) = fragment.usage {
            self.usage = Some(usage);
        }
    }

    /// Number of distinct invocation indices seen so far.
    pub fn pending_invocations(&self) -> usize {
        self.invocations.len()
    }

    /// Build the assistant turn. Only call once the stream is exhausted.
    pub fn finish(self) -> AssistantTurn {
        let mut seen = HashSet::new();
        let tool_calls: Vec<ToolInvocation> = self
            .invocations
            .into_iter()
            .map(|(index, partial)| {
                let mut call = partial.complete(index);
                if !seen.insert(call.id.clone()) {
                    let unique = unique_id(&call.id, index, &seen);
                    warn!(index, id = %call.id, renamed = %unique, "duplicate invocation id in turn");
                    call.id = unique;
                    seen.insert(call.id.clone());
                }
                call
            })
            .collect();
        debug!(
            text_len = self.text.len(),
            tool_calls = tool_calls.len(),
            "aggregated assistant turn"
        );
        AssistantTurn {
            message: Message::assistant_with_tools(self.text, tool_calls),
            usage: self.usage.unwrap_or_default(),
            finish_reason: self.finish_reason,
        }
    }

    /// Drain `stream` into a turn.
    ///
    /// Cancellation, an idle stream, or a stream error abandon the partial
    /// turn; nothing is returned for it.
    pub async fn consume(
        mut self,
        mut stream: FragmentStream,
        cancel: &CancellationToken,
        idle_timeout: Option<Duration>,
    ) -> Result<AssistantTurn> {
        let idle_timeout = idle_timeout.filter(|d| !d.is_zero());
        let mut idle_sleep = idle_timeout.map(|d| Box::pin(time::sleep(d)));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("stream canceled; discarding partial turn");
                    return Err(SwitchboardError::Canceled);
                }
                _ = async {
                    match idle_sleep.as_mut() {
                        Some(sleep) => sleep.as_mut().await,
                        None => std::future::pending().await,
                    }
                } => {
                    let ms = idle_timeout.map(|d| d.as_millis() as u64).unwrap_or_default();
                    warn!(idle_timeout_ms = ms, "model stream went idle");
                    return Err(SwitchboardError::Timeout(ms));
                }
                next = stream.next() => match next {
                    Some(Ok(fragment)) => {
                        if let (Some(sleep), Some(d)) = (idle_sleep.as_mut(), idle_timeout) {
                            sleep.as_mut().reset(time::Instant::now() + d);
                        }
                        self.push(fragment);
                    }
                    Some(Err(err)) => {
                        return Err(match err {
                            SwitchboardError::Transport(_)
                            | SwitchboardError::Network(_)
                            | SwitchboardError::Api { .. }
                            | SwitchboardError::Authentication(_)
                            | SwitchboardError::RateLimited { .. }
                            | SwitchboardError::Canceled
                            | SwitchboardError::Timeout(_) => err,
                            other => SwitchboardError::Transport(other.to_string()),
                        });
                    }
                    None => return Ok(self.finish()),
                },
            }
        }
    }
}

/// Aggregate a whole stream into one assistant message.
pub async fn aggregate(stream: FragmentStream) -> Result<Message> {
    let turn = DeltaAggregator::new()
        .consume(stream, &CancellationToken::new(), None)
        .await?;
    Ok(turn.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSink;
    use futures::stream;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    fn fragments(items: Vec<StreamFragment>) -> FragmentStream {
        stream::iter(items.into_iter().map(Ok)).boxed()
    }

    #[tokio::test]
    async fn reassembles_split_arguments() {
        let message = aggregate(fragments(vec![
            StreamFragment::tool_call(ToolCallFragment {
                index: 0,
                id: Some("c1".into()),
                name: Some("search_user".into()),
                arguments: Some(r#"{"nam"#.into()),
            }),
            StreamFragment::tool_call(ToolCallFragment::arguments(0, r#"e":"Ann"}"#)),
        ]))
        .await
        .expect("aggregate");

        assert_eq!(
            message.tool_calls(),
            [ToolInvocation::new("c1", "search_user", r#"{"name":"Ann"}"#)]
        );
        assert_eq!(message.content(), "");
    }

    #[tokio::test]
    async fn orders_invocations_by_index_not_arrival() {
        let message = aggregate(fragments(vec![
            StreamFragment::tool_call(ToolCallFragment::start(7, "late", "fetch")),
            StreamFragment::tool_call(ToolCallFragment::start(2, "early", "search_user")),
            StreamFragment::tool_call(ToolCallFragment::arguments(7, "{}")),
            StreamFragment::tool_call(ToolCallFragment::arguments(2, r#"{"name":"Bo"}"#)),
        ]))
        .await
        .expect("aggregate");

        let ids: Vec<_> = message.tool_calls().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert_eq!(message.tool_calls()[0].arguments, r#"{"name":"Bo"}"#);
    }

    #[test]
    fn id_and_name_are_set_once() {
        let mut aggregator = DeltaAggregator::new();
        aggregator.push(StreamFragment::tool_call(ToolCallFragment {
            index: 0,
            id: Some(String::new()),
            name: None,
            arguments: Some("{".into()),
        }));
        aggregator.push(StreamFragment::tool_call(ToolCallFragment::start(0, "c1", "add_user")));
        aggregator.push(StreamFragment::tool_call(ToolCallFragment::start(0, "c9", "delete_user")));
        aggregator.push(StreamFragment::tool_call(ToolCallFragment::arguments(0, "}")));

        let turn = aggregator.finish();
        assert_eq!(
            turn.message.tool_calls(),
            [ToolInvocation::new("c1", "add_user", "{}")]
        );
    }

    #[test]
    fn repeated_ids_in_one_turn_are_made_unique() {
        let mut aggregator = DeltaAggregator::new();
        aggregator.push(StreamFragment::tool_call(ToolCallFragment::start(0, "call_1", "search_user")));
        aggregator.push(StreamFragment::tool_call(ToolCallFragment {
            index: 1,
            id: None,
            name: Some("search_user".into()),
            arguments: None,
        }));
        aggregator.push(StreamFragment::tool_call(ToolCallFragment::start(2, "call_1", "fetch")));

        let turn = aggregator.finish();
        let ids: Vec<_> = turn.message.tool_calls().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["call_1", "call_1_1", "call_1_2"]);
    }

    #[test]
    fn text_only_stream_has_no_invocations() {
        let mut aggregator = DeltaAggregator::new();
        aggregator.push(StreamFragment::text("Hello, "));
        aggregator.push(StreamFragment::text("Ann."));
        aggregator.push(StreamFragment {
            finish_reason: Some(FinishReason::Stop),
            usage: Some(Usage {
                input_tokens: 10,
                output_tokens: 3,
                total_tokens: 13,
            }),
            ..Default::default()
        });

        let turn = aggregator.finish();
        assert_eq!(turn.message, Message::assistant("Hello, Ann."));
        assert_eq!(turn.finish_reason, Some(FinishReason::Stop));
        assert_eq!(turn.usage.total_tokens, 13);
    }

    #[test]
    fn missing_id_is_synthesized_from_index() {
        let mut aggregator = DeltaAggregator::new();
        aggregator.push(StreamFragment::tool_call(ToolCallFragment {
            index: 3,
            name: Some("fetch".into()),
            ..Default::default()
        }));
        let turn = aggregator.finish();
        assert_eq!(turn.message.tool_calls()[0].id, "call_3");
    }

    #[test]
    fn emits_text_and_first_sighting_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: EventSink = Arc::new(move |event| {
            if let Ok(mut events) = sink_seen.lock() {
                events.push(event);
            }
        });
        let mut aggregator = DeltaAggregator::with_events(EventEmitter::new(Some(sink)));
        aggregator.push(StreamFragment::text("Looking"));
        aggregator.push(StreamFragment::tool_call(ToolCallFragment::start(0, "c1", "search_user")));
        aggregator.push(StreamFragment::tool_call(ToolCallFragment::arguments(0, "{}")));

        let events = seen.lock().expect("lock").clone();
        assert_eq!(
            events,
            vec![
                ConversationEvent::TextDelta {
                    text: "Looking".into()
                },
                ConversationEvent::ToolCallStarted {
                    index: 0,
                    id: Some("c1".into()),
                    name: Some("search_user".into()),
                },
            ]
        );
    }

    #[tokio::test]
    async fn stream_error_discards_partial_turn() {
        let stream = stream::iter(vec![
            Ok(StreamFragment::text("partial")),
            Err(SwitchboardError::Transport("connection reset".into())),
        ])
        .boxed();
        let err = DeltaAggregator::new()
            .consume(stream, &CancellationToken::new(), None)
            .await
            .expect_err("transport failure");
        assert!(matches!(err, SwitchboardError::Transport(message) if message == "connection reset"));
    }

    #[tokio::test]
    async fn canceled_token_stops_consumption() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = DeltaAggregator::new()
            .consume(stream::pending().boxed(), &cancel, None)
            .await
            .expect_err("canceled");
        assert!(matches!(err, SwitchboardError::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_times_out() {
        let err = DeltaAggregator::new()
            .consume(
                stream::pending().boxed(),
                &CancellationToken::new(),
                Some(Duration::from_millis(250)),
            )
            .await
            .expect_err("idle");
        assert!(matches!(err, SwitchboardError::Timeout(250)));
    }
}
