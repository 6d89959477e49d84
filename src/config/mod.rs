//! Configuration system (layered: defaults < config file < environment).

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;

use crate::error::{Result, SwitchboardError};
use crate::registry::CollisionPolicy;
use crate::types::SamplingConfig;

pub const ENV_API_KEY: &str = "DIAL_API_KEY";
pub const ENV_ENDPOINT: &str = "DIAL_ENDPOINT";
pub const ENV_MODEL: &str = "SWITCHBOARD_MODEL";
pub const ENV_API_VERSION: &str = "SWITCHBOARD_API_VERSION";
pub const ENV_MAX_ROUNDS: &str = "SWITCHBOARD_MAX_ROUNDS";
pub const ENV_TOOL_CONCURRENCY: &str = "SWITCHBOARD_TOOL_CONCURRENCY";
pub const ENV_CONFIG_PATH: &str = "SWITCHBOARD_CONFIG";

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_API_VERSION: &str = "2025-01-01-preview";
pub const DEFAULT_MAX_ROUNDS: usize = 16;
pub const DEFAULT_STREAM_IDLE_TIMEOUT_MS: u64 = 120_000;

/// Full configuration for a switchboard process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SwitchboardConfig {
    pub model: ModelConfig,
    pub orchestrator: OrchestratorConfig,
    pub registry: RegistryConfig,
    pub servers: Vec<ServerConfig>,
}

/// Which completion endpoint shape to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderFlavor {
    /// `{base}/chat/completions` with Bearer auth.
    #[serde(rename = "openai")]
    #[strum(serialize = "openai")]
    OpenAi,
    /// Azure / DIAL deployments with an `api-key` header.
    #[default]
    Azure,
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub flavor: ProviderFlavor,
    pub endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Model name, or deployment name for the azure flavor.
    pub model: String,
    pub api_version: String,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            flavor: ProviderFlavor::default(),
            endpoint: None,
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            temperature: 0.0,
            max_tokens: None,
        }
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("flavor", &self.flavor)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("api_version", &self.api_version)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ModelConfig {
    /// Sampling settings sent with every completion.
    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig::builder()
            .temperature(self.temperature)
            .maybe_max_tokens(self.max_tokens)
            .build()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on model calls per `complete`.
    pub max_rounds: usize,
    /// Tool calls of one turn allowed in flight at once; 1 is sequential.
    pub tool_concurrency: usize,
    /// Abandon a model stream silent for this long; 0 disables the check.
    pub stream_idle_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            tool_concurrency: 1,
            stream_idle_timeout_ms: DEFAULT_STREAM_IDLE_TIMEOUT_MS,
        }
    }
}

impl OrchestratorConfig {
    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        (self.stream_idle_timeout_ms > 0).then(|| Duration::from_millis(self.stream_idle_timeout_ms))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    pub collision_policy: CollisionPolicy,
}

/// One capability server to connect at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: ServerTransport,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ServerTransport {
    /// Streamable HTTP endpoint.
    Http { url: String },
    /// Child process speaking MCP over stdio.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl SwitchboardConfig {
    /// Load `.env`, the config file (if any), then environment overrides, and validate.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let path = std::env::var(ENV_CONFIG_PATH)
            .ok()
            .map(PathBuf::from)
            .or_else(|| default_config_path().filter(|p| p.exists()));
        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config file");
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SwitchboardError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| SwitchboardError::Configuration(format!("invalid config: {e}")))
    }

    /// Overlay values found through `lookup` (normally the process environment).
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(key) = lookup(ENV_API_KEY) {
            self.model.api_key = Some(key);
        }
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.model.endpoint = Some(endpoint);
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.model.model = model;
        }
        if let Some(version) = lookup(ENV_API_VERSION) {
            self.model.api_version = version;
        }
        if let Some(raw) = lookup(ENV_MAX_ROUNDS) {
            self.orchestrator.max_rounds = parse_number(ENV_MAX_ROUNDS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TOOL_CONCURRENCY) {
            self.orchestrator.tool_concurrency = parse_number(ENV_TOOL_CONCURRENCY, &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(SwitchboardError::Configuration(format!("{ENV_API_KEY} is not set")));
        }
        if self.model.flavor == ProviderFlavor::Azure && self.model.endpoint.is_none() {
            return Err(SwitchboardError::Configuration(format!(
                "{ENV_ENDPOINT} is required for the azure flavor"
            )));
        }
        if self.model.model.trim().is_empty() {
            return Err(SwitchboardError::Configuration("model must not be empty".into()));
        }
        if self.orchestrator.max_rounds == 0 {
            return Err(SwitchboardError::Configuration("max_rounds must be at least 1".into()));
        }
        if self.orchestrator.tool_concurrency == 0 {
            return Err(SwitchboardError::Configuration(
                "tool_concurrency must be at least 1".into(),
            ));
        }
        let mut names = HashSet::new();
        for server in &self.servers {
            if server.name.trim().is_empty() {
                return Err(SwitchboardError::Configuration("server name must not be empty".into()));
            }
            if !names.insert(server.name.as_str()) {
                return Err(SwitchboardError::Configuration(format!(
                    "Duplicate server name '{}'",
                    server.name
                )));
            }
        }
        Ok(())
    }
}

/// `~/.switchboard/config.toml`, when a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    directories::UserDirs::new().map(|dirs| dirs.home_dir().join(".switchboard").join("config.toml"))
}

fn parse_number(key: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|_| SwitchboardError::Configuration(format!("{key} must be a number, got '{raw}'")))
}
