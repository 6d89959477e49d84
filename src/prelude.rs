//! Convenience re-exports for common use.

pub use crate::aggregate::{aggregate, AssistantTurn, DeltaAggregator};
pub use crate::config::SwitchboardConfig;
pub use crate::dispatch::ToolDispatcher;
pub use crate::error::{Result, SwitchboardError};
pub use crate::events::{ConversationEvent, EventSink};
pub use crate::orchestrator::{CompletionOutcome, Orchestrator};
pub use crate::provider::{CompletionRequest, FragmentStream, ModelProvider};
pub use crate::registry::{CapabilityRegistry, CollisionPolicy};
pub use crate::session::CapabilitySession;
pub use crate::tools::{ToolArguments, ToolContent, ToolManifestEntry};
pub use crate::types::{
    Conversation, FinishReason, Message, Role, SamplingConfig, StreamFragment, ToolCallFragment,
    ToolInvocation, Usage,
};

#[cfg(feature = "mcp")]
pub use crate::mcp::{McpSession, ResourceBody};
