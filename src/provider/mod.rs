//! Model completion service trait and implementations.

pub mod azure;
pub mod http;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::{ModelConfig, ProviderFlavor};
use crate::error::{Result, SwitchboardError};
use crate::tools::ToolManifestEntry;
use crate::types::{Message, SamplingConfig, StreamFragment};

/// Incremental model output. Ends when the response is complete.
pub type FragmentStream = BoxStream<'static, Result<StreamFragment>>;

/// One streaming completion request.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolManifestEntry],
    pub sampling: &'a SamplingConfig,
}

/// A remote model accessed over a streaming completion interface.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "openai", "azure").
    fn provider_name(&self) -> &str;
    /// The model or deployment this provider instance serves.
    fn model_id(&self) -> &str;

    /// Start a streaming completion.
    ///
    /// Failing before the first fragment and failing mid-stream are both
    /// surfaced to the caller; the provider never retries.
    async fn stream_completion(&self, request: &CompletionRequest<'_>) -> Result<FragmentStream>;
}

/// Build the provider described by `config`.
pub fn create_provider(config: &ModelConfig) -> Result<Arc<dyn ModelProvider>> {
    let api_key = config
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| SwitchboardError::Authentication("Missing DIAL_API_KEY".into()))?;
    match config.flavor {
        ProviderFlavor::OpenAi => Ok(Arc::new(openai::OpenAiProvider::new(
            config.model.clone(),
            api_key,
            config.endpoint.clone(),
        ))),
        ProviderFlavor::Azure => {
            let endpoint = config.endpoint.clone().ok_or_else(|| {
                SwitchboardError::Configuration("Missing DIAL_ENDPOINT for azure flavor".into())
            })?;
            Ok(Arc::new(azure::AzureOpenAiProvider::new(
                endpoint,
                config.model.clone(),
                api_key,
                config.api_version.clone(),
            )))
        }
    }
}
