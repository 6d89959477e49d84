//! Tool dispatch: one invocation in, exactly one tool message out.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{stream, FutureExt, StreamExt};
use tracing::{debug, warn};

use crate::error::{Result, SwitchboardError};
use crate::events::{ConversationEvent, EventEmitter};
use crate::registry::CapabilityRegistry;
use crate::tools::{ToolArguments, ToolContent};
use crate::types::{Message, ToolInvocation};

/// The tool message produced for one invocation, plus whether it reports a failure.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub message: Message,
    pub is_error: bool,
}

/// Executes invocations against the sessions bound in a registry.
///
/// Failures never escape: unknown tools, malformed arguments and remote
/// failures all become tool messages describing the error.
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    registry: Arc<CapabilityRegistry>,
    events: EventEmitter,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            events: EventEmitter::default(),
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Execute one invocation and return its tool message.
    pub async fn execute(&self, call: &ToolInvocation) -> Message {
        self.dispatch(call).await.message
    }

    /// Execute one invocation, keeping the error flag.
    pub async fn dispatch(&self, call: &ToolInvocation) -> DispatchOutcome {
        self.events.emit(ConversationEvent::ToolDispatchStarted { call: call.clone() });
        debug!(tool = %call.name, call_id = %call.id, "dispatching tool call");

        let outcome = match self.try_call(call).await {
            Ok(content) => {
                let text = content.first().map(ToString::to_string).unwrap_or_default();
                debug!(tool = %call.name, call_id = %call.id, items = content.len(), "tool call succeeded");
                DispatchOutcome {
                    message: Message::tool_result(call, text),
                    is_error: false,
                }
            }
            Err(err) => {
                warn!(tool = %call.name, call_id = %call.id, error = %err, "tool call failed");
                DispatchOutcome {
                    message: Message::tool_result(call, format!("Error calling tool {}: {err}", call.name)),
                    is_error: true,
                }
            }
        };

        self.events.emit(ConversationEvent::ToolDispatchFinished {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            is_error: outcome.is_error,
        });
        outcome
    }

    /// Execute every invocation of a turn with at most `concurrency` in flight.
    ///
    /// Messages come back in the order of `calls`, whatever order the calls
    /// finish in. A failing call never affects its siblings.
    pub async fn execute_all(&self, calls: &[ToolInvocation], concurrency: usize) -> Vec<DispatchOutcome> {
        stream::iter(calls)
            .map(|call| self.dispatch(call))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    async fn try_call(&self, call: &ToolInvocation) -> Result<Vec<ToolContent>> {
        let arguments = ToolArguments::parse(&call.name, &call.arguments)?;
        let session = self.registry.resolve(&call.name)?;
        let result = AssertUnwindSafe(session.call_tool(&call.name, arguments))
            .catch_unwind()
            .await;
        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(err @ SwitchboardError::RemoteCall { .. })) => Err(err),
            Ok(Err(err)) => Err(SwitchboardError::remote_call(&call.name, err.to_string())),
            Err(panic) => Err(SwitchboardError::remote_call(
                &call.name,
                format!("session '{}' panicked: {}", session.name(), panic_message(&*panic)),
            )),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CapabilitySession;
    use crate::tools::ToolManifestEntry;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    struct UserDirectory;

    #[async_trait]
    impl CapabilitySession for UserDirectory {
        fn name(&self) -> &str {
            "users"
        }

        async fn list_tools(&self) -> Result<Vec<ToolManifestEntry>> {
            Ok(["search_user", "add_user", "flaky", "slow", "explode", "silent"]
                .into_iter()
                .map(|name| ToolManifestEntry::without_arguments(name, ""))
                .collect())
        }

        async fn call_tool(&self, name: &str, arguments: ToolArguments) -> Result<Vec<ToolContent>> {
            match name {
                "search_user" => Ok(vec![
                    ToolContent::text(format!("found {}", arguments.get_str("name").unwrap_or("?"))),
                    ToolContent::text("secondary"),
                ]),
                "add_user" => Err(SwitchboardError::remote_call(name, "user already exists")),
                "flaky" => Err(SwitchboardError::Transport("connection reset".into())),
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(vec![ToolContent::text("slow done")])
                }
                "explode" => panic!("boom"),
                _ => Ok(Vec::new()),
            }
        }
    }

    async fn dispatcher() -> (ToolDispatcher, Arc<dyn CapabilitySession>) {
        let session: Arc<dyn CapabilitySession> = Arc::new(UserDirectory);
        let mut registry = CapabilityRegistry::new();
        registry.register_session(&session).await.expect("register");
        (ToolDispatcher::new(Arc::new(registry)), session)
    }

    #[tokio::test]
    async fn success_uses_first_content_item() {
        let (dispatcher, _session) = dispatcher().await;
        let call = ToolInvocation::new("c1", "search_user", r#"{"name":"Ann"}"#);
        let message = dispatcher.execute(&call).await;
        assert_eq!(message, Message::tool_result(&call, "found Ann"));
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_message() {
        let (dispatcher, _session) = dispatcher().await;
        let call = ToolInvocation::new("c1", "delete_user", "{}");
        let outcome = dispatcher.dispatch(&call).await;
        assert!(outcome.is_error);
        assert_eq!(outcome.message.tool_call_id(), Some("c1"));
        assert_eq!(
            outcome.message.content(),
            "Error calling tool delete_user: Unknown tool: delete_user"
        );
    }

    #[tokio::test]
    async fn malformed_arguments_become_error_message() {
        let (dispatcher, _session) = dispatcher().await;
        let call = ToolInvocation::new("c1", "search_user", r#"{"name":"#);
        let outcome = dispatcher.dispatch(&call).await;
        assert!(outcome.is_error);
        assert!(outcome.message.content().contains("Invalid arguments for tool search_user"));
    }

    #[tokio::test]
    async fn non_remote_failures_are_reported_as_remote_call_errors() {
        let (dispatcher, _session) = dispatcher().await;
        let message = dispatcher.execute(&ToolInvocation::new("c1", "flaky", "")).await;
        assert_eq!(
            message.content(),
            "Error calling tool flaky: Tool flaky failed: Transport error: connection reset"
        );
    }

    #[tokio::test]
    async fn panicking_session_still_yields_one_message() {
        let (dispatcher, _session) = dispatcher().await;
        let outcome = dispatcher.dispatch(&ToolInvocation::new("c1", "explode", "")).await;
        assert!(outcome.is_error);
        assert!(outcome.message.content().contains("panicked: boom"));
    }

    #[tokio::test]
    async fn empty_result_is_an_empty_success() {
        let (dispatcher, _session) = dispatcher().await;
        let outcome = dispatcher.dispatch(&ToolInvocation::new("c1", "silent", "")).await;
        assert!(!outcome.is_error);
        assert_eq!(outcome.message.content(), "");
    }

    #[tokio::test]
    async fn closed_session_becomes_error_message() {
        let (dispatcher, session) = dispatcher().await;
        drop(session);
        let message = dispatcher.execute(&ToolInvocation::new("c1", "search_user", "{}")).await;
        assert_eq!(message.content(), "Error calling tool search_user: Session closed: users");
    }

    #[tokio::test]
    async fn every_input_yields_exactly_one_message_in_order() {
        let (dispatcher, _session) = dispatcher().await;
        let calls = vec![
            ToolInvocation::new("a", "add_user", r#"{"name":"Ann"}"#),
            ToolInvocation::new("b", "search_user", r#"{"name":"Ann"}"#),
            ToolInvocation::new("c", "nope", "{}"),
            ToolInvocation::new("d", "search_user", "not json"),
        ];
        let outcomes = dispatcher.execute_all(&calls, 1).await;
        let ids: Vec<_> = outcomes.iter().map(|o| o.message.tool_call_id()).collect();
        assert_eq!(ids, vec![Some("a"), Some("b"), Some("c"), Some("d")]);
        let errors: Vec<_> = outcomes.iter().map(|o| o.is_error).collect();
        assert_eq!(errors, vec![true, false, true, true]);
        assert_eq!(
            outcomes[0].message.content(),
            "Error calling tool add_user: Tool add_user failed: user already exists"
        );
    }

    #[tokio::test]
    async fn concurrent_dispatch_preserves_request_order() {
        let (dispatcher, _session) = dispatcher().await;
        let calls = vec![
            ToolInvocation::new("first", "slow", ""),
            ToolInvocation::new("second", "search_user", r#"{"name":"Bo"}"#),
        ];
        let outcomes = dispatcher.execute_all(&calls, 4).await;
        let contents: Vec<_> = outcomes.iter().map(|o| o.message.content()).collect();
        assert_eq!(contents, vec!["slow done", "found Bo"]);
    }
}
