//! Switchboard: a tool-calling conversation orchestrator
//!
//! Streams a hosted model's response, reassembles the tool invocations it
//! requests, routes each one to the capability session that advertises the
//! tool, feeds the results back, and repeats until the model answers.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use switchboard::prelude::*;
//!
//! # async fn example() -> switchboard::error::Result<()> {
//! let config = SwitchboardConfig::load()?;
//! let provider = switchboard::provider::create_provider(&config.model)?;
//!
//! let users = Arc::new(McpSession::connect_http("users", "http://localhost:8006/mcp").await?);
//! let mut registry = CapabilityRegistry::with_policy(config.registry.collision_policy);
//! registry.register_session(&(users.clone() as Arc<dyn CapabilitySession>)).await?;
//!
//! let orchestrator = Orchestrator::from_config(provider, Arc::new(registry), &config);
//! let mut conversation = Conversation::with_system("You are a user-management assistant.");
//! users.seed_guidance(&mut conversation).await?;
//! conversation.push(Message::user("Find Ann"))?;
//! let answer = orchestrator.complete(&mut conversation).await?;
//! println!("{}", answer.content());
//! conversation.push(answer)?;
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod prelude;
pub mod provider;
pub mod registry;
pub mod session;
pub mod tools;
pub mod types;
pub mod util;

#[cfg(feature = "mcp")]
pub mod mcp;
