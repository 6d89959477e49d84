//! Azure OpenAI (and DIAL) deployment provider.

use async_trait::async_trait;

use crate::error::Result;

use super::http::api_key_headers;
use super::openai::OpenAiProvider;
use super::{CompletionRequest, FragmentStream, ModelProvider};

/// Chat completions against an Azure-style deployment.
pub struct AzureOpenAiProvider {
    inner: OpenAiProvider,
}

impl AzureOpenAiProvider {
    /// Create with Azure-specific endpoint.
    /// `endpoint`: e.g., "https://ai-proxy.lab.epam.com"
    /// `deployment`: e.g., "gpt-4o"
    /// `api_version`: e.g., "2025-01-01-preview"
    pub fn new(endpoint: String, deployment: String, api_key: String, api_version: String) -> Self {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint.trim_end_matches('/'),
            deployment,
            api_version
        );
        Self {
            inner: OpenAiProvider::with_endpoint("azure", deployment, url, api_key_headers(&api_key)),
        }
    }

    pub fn url(&self) -> &str {
        self.inner.url()
    }
}

#[async_trait]
impl ModelProvider for AzureOpenAiProvider {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn stream_completion(&self, request: &CompletionRequest<'_>) -> Result<FragmentStream> {
        self.inner.stream_completion(request).await
    }
}
