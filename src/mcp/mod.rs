//! MCP (Model Context Protocol) capability sessions.

pub mod catalog;
pub mod client;

pub use catalog::{guidance_message, McpPrompt, McpResource, ResourceBody};
pub use client::{McpRunningService, McpSession};
