//! Sampling settings and related enums.

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Sampling parameters sent with every completion request.
///
/// The default is deterministic (temperature 0).
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
pub struct SamplingConfig {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
    pub seed: Option<u64>,
    pub stop_sequences: Option<Vec<String>>,
    pub parallel_tool_calls: Option<bool>,
    pub user: Option<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self::deterministic()
    }
}

impl SamplingConfig {
    /// Zero-temperature sampling.
    pub fn deterministic() -> Self {
        Self {
            temperature: Some(0.0),
            top_p: None,
            max_tokens: None,
            seed: None,
            stop_sequences: None,
            parallel_tool_calls: None,
            user: None,
        }
    }
}

/// Why generation finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}
