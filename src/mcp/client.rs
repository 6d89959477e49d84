//! rmcp-backed capability session.

use async_trait::async_trait;
use rmcp::{
    model::{
        CallToolRequestParams, CallToolResult, ClientInfo, Content, GetPromptRequestParams, JsonObject,
        ProtocolVersion, ReadResourceRequestParams,
    },
    service::{ClientInitializeError, DynService, Peer, RoleClient, RunningService, ServiceError, ServiceExt},
    transport::{StreamableHttpClientTransport, TokioChildProcess},
};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{ServerConfig, ServerTransport};
use crate::error::{Result, SwitchboardError};
use crate::session::CapabilitySession;
use crate::tools::{ToolArguments, ToolContent, ToolManifestEntry};
use crate::types::Conversation;

use super::catalog::{
    first_resource_body, guidance_message, map_prompt, map_resource, prompt_text, McpPrompt, McpResource,
    ResourceBody,
};

pub type McpRunningService = RunningService<RoleClient, Box<dyn DynService<RoleClient>>>;

/// A connected Model Context Protocol server.
///
/// The handshake happens in the constructors; [`McpSession::disconnect`]
/// ends the lifecycle. Calls made after disconnecting fail with
/// [`SwitchboardError::SessionClosed`].
pub struct McpSession {
    name: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<McpRunningService>>,
}

impl McpSession {
    /// Connect to a streamable HTTP endpoint such as `http://localhost:8006/mcp`.
    pub async fn connect_http(name: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let url = url.into();
        debug!(session = %name, %url, "connecting MCP server over HTTP");
        let transport = StreamableHttpClientTransport::from_uri(url);
        let service = client_info()
            .into_dyn()
            .serve(transport)
            .await
            .map_err(map_client_initialize_error)?;
        Ok(Self::from_running_service(name, service))
    }

    /// Spawn `command` and speak MCP over its stdio.
    pub async fn spawn_stdio(name: impl Into<String>, command: &str, args: &[String]) -> Result<Self> {
        let name = name.into();
        debug!(session = %name, command, "spawning MCP server");
        let mut cmd = Command::new(command);
        cmd.args(args);
        let transport = TokioChildProcess::new(cmd)?;
        let service = client_info()
            .into_dyn()
            .serve(transport)
            .await
            .map_err(map_client_initialize_error)?;
        Ok(Self::from_running_service(name, service))
    }

    /// Connect the server described by `config`.
    pub async fn connect(config: &ServerConfig) -> Result<Self> {
        match &config.transport {
            ServerTransport::Http { url } => Self::connect_http(&config.name, url).await,
            ServerTransport::Stdio { command, args } => {
                Self::spawn_stdio(&config.name, command, args).await
            }
        }
    }

    /// Wrap an already-initialized rmcp service.
    pub fn from_running_service(name: impl Into<String>, service: McpRunningService) -> Self {
        let name = name.into();
        if let Some(server) = service.peer_info() {
            info!(
                session = %name,
                server = %server.server_info.name,
                version = %server.server_info.version,
                "MCP session ready"
            );
        }
        Self {
            name,
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
        }
    }

    /// Instructions the server sent during the handshake.
    pub fn instructions(&self) -> Option<String> {
        self.peer.peer_info().and_then(|info| info.instructions.clone())
    }

    pub async fn is_connected(&self) -> bool {
        self.service.lock().await.is_some()
    }

    /// End the session. Disconnecting twice is a no-op.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(service) = self.service.lock().await.take() else {
            return Ok(());
        };
        let reason = service
            .cancel()
            .await
            .map_err(|e| SwitchboardError::Transport(format!("MCP shutdown failed: {e}")))?;
        debug!(session = %self.name, ?reason, "MCP session closed");
        Ok(())
    }

    /// Prompt templates the server advertises.
    pub async fn list_prompts(&self) -> Result<Vec<McpPrompt>> {
        self.ensure_connected().await?;
        let prompts = self
            .peer
            .list_all_prompts()
            .await
            .map_err(|e| map_service_error("list_prompts", e))?;
        Ok(prompts.into_iter().map(map_prompt).collect())
    }

    /// Render a prompt without arguments and return its text messages joined.
    pub async fn get_prompt(&self, name: &str) -> Result<String> {
        self.ensure_connected().await?;
        let result = self
            .peer
            .get_prompt(GetPromptRequestParams {
                meta: None,
                name: name.to_owned(),
                arguments: None,
            })
            .await
            .map_err(|e| map_service_error("get_prompt", e))?;
        Ok(prompt_text(&result))
    }

    /// Resources the server advertises.
    pub async fn list_resources(&self) -> Result<Vec<McpResource>> {
        self.ensure_connected().await?;
        let resources = self
            .peer
            .list_all_resources()
            .await
            .map_err(|e| map_service_error("list_resources", e))?;
        Ok(resources.into_iter().map(map_resource).collect())
    }

    /// Read the first content item of the resource at `uri`.
    pub async fn read_resource(&self, uri: &str) -> Result<ResourceBody> {
        self.ensure_connected().await?;
        let result = self
            .peer
            .read_resource(ReadResourceRequestParams {
                meta: None,
                uri: uri.to_owned(),
            })
            .await
            .map_err(|e| map_service_error("read_resource", e))?;
        first_resource_body(uri, result.contents)
    }

    /// Append every server prompt to `conversation` as a guidance user message.
    ///
    /// A server without prompt support contributes nothing. Returns the
    /// number of messages appended.
    pub async fn seed_guidance(&self, conversation: &mut Conversation) -> Result<usize> {
        let prompts = match self.list_prompts().await {
            Ok(prompts) => prompts,
            Err(e @ SwitchboardError::SessionClosed(_)) => return Err(e),
            Err(e) => {
                warn!(session = %self.name, error = %e, "server prompts unavailable");
                return Ok(0);
            }
        };
        let mut seeded = 0;
        for prompt in prompts {
            let content = self.get_prompt(&prompt.name).await?;
            conversation.push(guidance_message(&self.name, &prompt.name, &content))?;
            seeded += 1;
        }
        info!(session = %self.name, seeded, "seeded guidance prompts");
        Ok(seeded)
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.service.lock().await.is_none() {
            return Err(SwitchboardError::SessionClosed(self.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl CapabilitySession for McpSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolManifestEntry>> {
        self.ensure_connected().await?;
        let tools = match self.peer.list_all_tools().await {
            Ok(tools) => tools,
            Err(ServiceError::UnexpectedResponse) => self
                .peer
                .list_tools(None)
                .await
                .map(|page| page.tools)
                .map_err(|e| map_service_error("list_tools", e))?,
            Err(e) => return Err(map_service_error("list_tools", e)),
        };
        Ok(tools.into_iter().map(map_tool).collect())
    }

    async fn call_tool(&self, name: &str, arguments: ToolArguments) -> Result<Vec<ToolContent>> {
        self.ensure_connected().await?;
        let result = self
            .peer
            .call_tool(CallToolRequestParams {
                meta: None,
                name: name.to_owned().into(),
                arguments: coerce_arguments(arguments),
                task: None,
            })
            .await
            .map_err(|e| SwitchboardError::remote_call(name, map_service_error("call_tool", e).to_string()))?;
        map_call_result(name, result)
    }
}

fn client_info() -> ClientInfo {
    ClientInfo {
        protocol_version: ProtocolVersion::LATEST,
        ..Default::default()
    }
}

fn map_tool(tool: rmcp::model::Tool) -> ToolManifestEntry {
    ToolManifestEntry {
        name: tool.name.to_string(),
        description: tool.description.map(|d| d.to_string()).unwrap_or_default(),
        input_schema: serde_json::Value::Object((*tool.input_schema).clone()),
    }
}

/// Empty argument objects are sent as absent.
fn coerce_arguments(arguments: ToolArguments) -> Option<JsonObject> {
    if arguments.is_empty() {
        None
    } else {
        Some(arguments.into_map())
    }
}

fn map_content(item: &Content) -> ToolContent {
    if let Some(text) = item.as_text() {
        return ToolContent::text(text.text.clone());
    }
    match serde_json::to_value(item) {
        Ok(value) => ToolContent::json(value),
        Err(e) => ToolContent::text(format!("<unserializable content: {e}>")),
    }
}

fn map_call_result(name: &str, result: CallToolResult) -> Result<Vec<ToolContent>> {
    let content: Vec<ToolContent> = result.content.iter().map(map_content).collect();

    if result.is_error.unwrap_or(false) {
        let text: Vec<String> = content
            .iter()
            .filter_map(|item| match item {
                ToolContent::Text { text } => Some(text.clone()),
                ToolContent::Json { .. } => None,
            })
            .collect();
        let message = if text.is_empty() {
            result
                .structured_content
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "MCP tool returned an error result".into())
        } else {
            text.join("\n")
        };
        return Err(SwitchboardError::remote_call(name, message));
    }

    if content.is_empty() {
        if let Some(structured) = result.structured_content {
            return Ok(vec![ToolContent::json(structured)]);
        }
    }
    Ok(content)
}

fn map_client_initialize_error(error: ClientInitializeError) -> SwitchboardError {
    match error {
        ClientInitializeError::ConnectionClosed(context) => {
            SwitchboardError::Transport(format!("MCP initialize connection closed: {context}"))
        }
        ClientInitializeError::TransportError { error, context } => SwitchboardError::Transport(
            format!("MCP initialize transport error ({context}): {error}"),
        ),
        ClientInitializeError::JsonRpcError(error) => SwitchboardError::Configuration(format!(
            "MCP initialize JSON-RPC error {}: {}",
            error.code.0, error.message
        )),
        ClientInitializeError::Cancelled => SwitchboardError::Canceled,
        other => SwitchboardError::Transport(format!("MCP initialize error: {other}")),
    }
}

fn map_service_error(context: &str, error: ServiceError) -> SwitchboardError {
    match error {
        ServiceError::McpError(error) => {
            SwitchboardError::Transport(format!("{context}: MCP error {}: {}", error.code.0, error.message))
        }
        ServiceError::TransportSend(error) => {
            SwitchboardError::Transport(format!("{context}: MCP transport send failed: {error}"))
        }
        ServiceError::TransportClosed => {
            SwitchboardError::Transport(format!("{context}: MCP transport closed"))
        }
        ServiceError::UnexpectedResponse => {
            SwitchboardError::Transport(format!("{context}: unexpected MCP response"))
        }
        ServiceError::Cancelled { reason } => {
            let suffix = reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default();
            SwitchboardError::Transport(format!("{context}: MCP request cancelled{suffix}"))
        }
        ServiceError::Timeout { timeout } => SwitchboardError::Timeout(timeout.as_millis() as u64),
        other => SwitchboardError::Transport(format!("{context}: MCP service error: {other}")),
    }
}
