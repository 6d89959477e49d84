//! The request / response / tool-execution cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::aggregate::DeltaAggregator;
use crate::config::SwitchboardConfig;
use crate::dispatch::ToolDispatcher;
use crate::error::{Result, SwitchboardError};
use crate::events::{ConversationEvent, EventEmitter, EventSink};
use crate::provider::{CompletionRequest, ModelProvider};
use crate::registry::CapabilityRegistry;
use crate::types::{Conversation, Message, SamplingConfig, ToolInvocation, Usage};
use crate::util::timeout::with_timeout;

/// Result of one `complete` call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOutcome {
    /// The final assistant answer. It has no invocations and is not yet part
    /// of the conversation.
    pub message: Message,
    /// Model calls made.
    pub rounds: usize,
    /// Token usage summed over every round.
    pub usage: Usage,
}

/// Drives a conversation until the model answers without requesting tools.
pub struct Orchestrator {
    provider: Arc<dyn ModelProvider>,
    registry: Arc<CapabilityRegistry>,
    dispatcher: ToolDispatcher,
    sampling: SamplingConfig,
    max_rounds: usize,
    tool_concurrency: usize,
    stream_idle_timeout: Option<Duration>,
    events: EventEmitter,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn ModelProvider>, registry: Arc<CapabilityRegistry>) -> Self {
        let defaults = crate::config::OrchestratorConfig::default();
        Self {
            provider,
            dispatcher: ToolDispatcher::new(Arc::clone(&registry)),
            registry,
            sampling: SamplingConfig::default(),
            max_rounds: defaults.max_rounds,
            tool_concurrency: defaults.tool_concurrency,
            stream_idle_timeout: defaults.stream_idle_timeout(),
            events: EventEmitter::default(),
        }
    }

    /// Apply the model and orchestrator sections of `config`.
    pub fn from_config(
        provider: Arc<dyn ModelProvider>,
        registry: Arc<CapabilityRegistry>,
        config: &SwitchboardConfig,
    ) -> Self {
        Self::new(provider, registry)
            .with_sampling(config.model.sampling())
            .with_max_rounds(config.orchestrator.max_rounds)
            .with_tool_concurrency(config.orchestrator.tool_concurrency)
            .with_stream_idle_timeout(config.orchestrator.stream_idle_timeout())
    }

    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    /// Tool calls of one turn allowed in flight at once. 1 runs them sequentially.
    pub fn with_tool_concurrency(mut self, concurrency: usize) -> Self {
        self.tool_concurrency = concurrency.max(1);
        self
    }

    pub fn with_stream_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    pub fn with_event_sink(mut self, sink: EventSink) -> Self {
        self.events = EventEmitter::new(Some(sink));
        self.dispatcher = self.dispatcher.with_events(self.events.clone());
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    /// Run the tool loop and return the final assistant answer.
    ///
    /// Tool rounds are appended to `conversation`; the final answer is not.
    pub async fn complete(&self, conversation: &mut Conversation) -> Result<Message> {
        self.complete_with(conversation, &CancellationToken::new())
            .await
            .map(|outcome| outcome.message)
    }

    /// [`Orchestrator::complete`] bounded by a deadline.
    ///
    /// A round interrupted by the deadline leaves no trace in `conversation`.
    pub async fn complete_within(
        &self,
        conversation: &mut Conversation,
        deadline: Duration,
    ) -> Result<CompletionOutcome> {
        let cancel = CancellationToken::new();
        with_timeout(deadline, self.complete_with(conversation, &cancel)).await
    }

    /// Run the tool loop, stopping early when `cancel` fires.
    pub async fn complete_with(
        &self,
        conversation: &mut Conversation,
        cancel: &CancellationToken,
    ) -> Result<CompletionOutcome> {
        self.answer_pending(conversation, cancel).await?;

        let tools = self.registry.manifests();
        let mut usage = Usage::default();

        for round in 1..=self.max_rounds {
            self.events.emit(ConversationEvent::RoundStarted { round });
            info!(
                round,
                messages = conversation.len(),
                tools = tools.len(),
                model = self.provider.model_id(),
                "requesting completion"
            );

            let request = CompletionRequest {
                messages: conversation.messages(),
                tools,
                sampling: &self.sampling,
            };
            let stream = tokio::select! {
                _ = cancel.cancelled() => return Err(SwitchboardError::Canceled),
                stream = self.provider.stream_completion(&request) => stream?,
            };
            let turn = DeltaAggregator::with_events(self.events.clone())
                .consume(stream, cancel, self.stream_idle_timeout)
                .await?;
            usage.merge(&turn.usage);

            if !turn.message.has_tool_calls() {
                self.events.emit(ConversationEvent::RoundFinished { round, tool_calls: 0 });
                info!(round, finish_reason = ?turn.finish_reason, "final answer received");
                return Ok(CompletionOutcome {
                    message: turn.message,
                    rounds: round,
                    usage,
                });
            }

            let calls = turn.message.tool_calls().to_vec();
            let results = self.dispatch_all(&calls, cancel).await?;
            conversation.commit_round(turn.message, results)?;
            self.events.emit(ConversationEvent::RoundFinished {
                round,
                tool_calls: calls.len(),
            });
            debug!(round, tool_calls = calls.len(), "tool round committed");
        }

        info!(max_rounds = self.max_rounds, "round limit reached");
        Err(SwitchboardError::RoundLimitExceeded {
            max_rounds: self.max_rounds,
        })
    }

    /// Answer invocations left open by the latest assistant turn.
    async fn answer_pending(&self, conversation: &mut Conversation, cancel: &CancellationToken) -> Result<()> {
        let pending: Vec<ToolInvocation> = conversation.pending_tool_calls().into_iter().cloned().collect();
        if pending.is_empty() {
            return Ok(());
        }
        debug!(pending = pending.len(), "answering pending tool calls");
        let results = self.dispatch_all(&pending, cancel).await?;
        let mut staged = conversation.clone();
        for message in results {
            staged.push(message)?;
        }
        *conversation = staged;
        Ok(())
    }

    async fn dispatch_all(&self, calls: &[ToolInvocation], cancel: &CancellationToken) -> Result<Vec<Message>> {
        let outcomes = tokio::select! {
            _ = cancel.cancelled() => return Err(SwitchboardError::Canceled),
            outcomes = self.dispatcher.execute_all(calls, self.tool_concurrency) => outcomes,
        };
        Ok(outcomes.into_iter().map(|outcome| outcome.message).collect())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("provider", &self.provider.provider_name())
            .field("model", &self.provider.model_id())
            .field("registry", &self.registry)
            .field("max_rounds", &self.max_rounds)
            .field("tool_concurrency", &self.tool_concurrency)
            .finish()
    }
}
