//! Error types for Switchboard.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all Switchboard operations.
#[derive(Error, Debug)]
pub enum SwitchboardError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid arguments for tool {tool_name}: {message}")]
    ArgumentParse { tool_name: String, message: String },

    #[error("Tool {tool_name} failed: {message}")]
    RemoteCall { tool_name: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Tool {name} is advertised by both {first} and {second}")]
    DuplicateTool {
        name: String,
        first: String,
        second: String,
    },

    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Completion canceled")]
    Canceled,

    #[error("Tool loop exceeded {max_rounds} rounds")]
    RoundLimitExceeded { max_rounds: usize },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl SwitchboardError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn remote_call(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteCall {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownTool { .. }
            | Self::ArgumentParse { .. }
            | Self::RemoteCall { .. }
            | Self::SessionClosed(_) => ErrorCategory::Tool,
            Self::Transport(_) | Self::Network(_) => ErrorCategory::Network,
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) | Self::DuplicateTool { .. } => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Canceled => ErrorCategory::Canceled,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            Self::Io(_) | Self::RoundLimitExceeded { .. } | Self::InvalidState(_) => {
                ErrorCategory::Unknown
            }
        }
    }

    /// Whether the dispatcher turns this error into a tool message instead of
    /// surfacing it.
    pub fn is_locally_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Tool)
    }

    /// Whether retrying the whole `complete` call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit
                | ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Server
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        if let Self::RoundLimitExceeded { .. } = self {
            return RecoverySuggestion::ReduceRounds;
        }
        match self.category() {
            ErrorCategory::Tool => RecoverySuggestion::None,
            ErrorCategory::Authentication => RecoverySuggestion::CheckCredentials,
            ErrorCategory::RateLimit | ErrorCategory::Network | ErrorCategory::Server => {
                RecoverySuggestion::RetryWithBackoff
            }
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            _ => RecoverySuggestion::Abort,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SwitchboardError>;
