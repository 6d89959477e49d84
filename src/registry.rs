//! Tool name to capability session routing.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SwitchboardError};
use crate::session::CapabilitySession;
use crate::tools::ToolManifestEntry;

/// What to do when two sessions advertise the same tool name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Fail registration with [`SwitchboardError::DuplicateTool`].
    #[default]
    Reject,
    /// Keep the session registered first and ignore later duplicates.
    FirstRegisteredWins,
}

struct Route {
    session_name: String,
    session: Weak<dyn CapabilitySession>,
}

/// Maps tool names to the session that executes them.
///
/// Sessions are held weakly: the registry never keeps a session alive.
#[derive(Default)]
pub struct CapabilityRegistry {
    policy: CollisionPolicy,
    routes: HashMap<String, Route>,
    manifests: Vec<ToolManifestEntry>,
    session_names: Vec<String>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: CollisionPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    /// Bind every tool in `tools` to `session`.
    ///
    /// Returns how many tools were bound. On error nothing is registered.
    pub fn register(
        &mut self,
        session: &Arc<dyn CapabilitySession>,
        tools: Vec<ToolManifestEntry>,
    ) -> Result<usize> {
        let session_name = session.name().trim().to_owned();
        if session_name.is_empty() {
            return Err(SwitchboardError::Configuration(
                "session name must not be empty".into(),
            ));
        }
        if self.session_names.contains(&session_name) {
            return Err(SwitchboardError::Configuration(format!(
                "Duplicate session name '{session_name}'"
            )));
        }

        let mut accepted: Vec<ToolManifestEntry> = Vec::with_capacity(tools.len());
        for tool in tools {
            if accepted.iter().any(|seen| seen.name == tool.name) {
                debug!(session = %session_name, tool = %tool.name, "duplicate tool in one manifest ignored");
                continue;
            }
            if let Some(existing) = self.routes.get(&tool.name) {
                match self.policy {
                    CollisionPolicy::Reject => {
                        return Err(SwitchboardError::DuplicateTool {
                            name: tool.name,
                            first: existing.session_name.clone(),
                            second: session_name,
                        });
                    }
                    CollisionPolicy::FirstRegisteredWins => {
                        warn!(
                            tool = %tool.name,
                            kept = %existing.session_name,
                            ignored = %session_name,
                            "tool advertised by multiple sessions"
                        );
                        continue;
                    }
                }
            }
            accepted.push(tool);
        }

        let weak = Arc::downgrade(session);
        for tool in &accepted {
            self.routes.insert(
                tool.name.clone(),
                Route {
                    session_name: session_name.clone(),
                    session: weak.clone(),
                },
            );
        }
        let count = accepted.len();
        debug!(session = %session_name, tools = count, "registered session");
        self.manifests.extend(accepted);
        self.session_names.push(session_name);
        Ok(count)
    }

    /// List the session's tools and register them.
    pub async fn register_session(&mut self, session: &Arc<dyn CapabilitySession>) -> Result<usize> {
        let tools = session.list_tools().await?;
        self.register(session, tools)
    }

    /// Find the session that executes `tool_name`.
    pub fn resolve(&self, tool_name: &str) -> Result<Arc<dyn CapabilitySession>> {
        let route = self
            .routes
            .get(tool_name)
            .ok_or_else(|| SwitchboardError::UnknownTool {
                name: tool_name.to_string(),
            })?;
        route
            .session
            .upgrade()
            .ok_or_else(|| SwitchboardError::SessionClosed(route.session_name.clone()))
    }

    /// Name of the session bound to `tool_name`.
    pub fn session_for(&self, tool_name: &str) -> Option<&str> {
        self.routes.get(tool_name).map(|route| route.session_name.as_str())
    }

    /// Union of registered manifests, in registration order.
    pub fn manifests(&self) -> &[ToolManifestEntry] {
        &self.manifests
    }

    pub fn session_names(&self) -> &[String] {
        &self.session_names
    }

    pub fn contains(&self, tool_name: &str) -> bool {
        self.routes.contains_key(tool_name)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("policy", &self.policy)
            .field("sessions", &self.session_names)
            .field("tools", &self.manifests.iter().map(|m| &m.name).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolArguments, ToolContent};
    use async_trait::async_trait;

    struct NamedSession {
        name: String,
        tools: Vec<ToolManifestEntry>,
    }

    #[async_trait]
    impl CapabilitySession for NamedSession {
        fn name(&self) -> &str {
            &self.name
        }

        async fn list_tools(&self) -> Result<Vec<ToolManifestEntry>> {
            Ok(self.tools.clone())
        }

        async fn call_tool(&self, name: &str, _arguments: ToolArguments) -> Result<Vec<ToolContent>> {
            Ok(vec![ToolContent::text(format!("{}:{name}", self.name))])
        }
    }

    fn session(name: &str, tools: &[&str]) -> Arc<dyn CapabilitySession> {
        Arc::new(NamedSession {
            name: name.into(),
            tools: tools
                .iter()
                .map(|tool| ToolManifestEntry::without_arguments(*tool, format!("{tool} description")))
                .collect(),
        })
    }

    #[tokio::test]
    async fn resolves_tools_to_owning_session() {
        let users = session("users", &["search_user", "add_user"]);
        let fetch = session("fetch", &["fetch"]);
        let mut registry = CapabilityRegistry::new();
        assert_eq!(registry.register_session(&users).await.expect("users"), 2);
        assert_eq!(registry.register_session(&fetch).await.expect("fetch"), 1);

        assert_eq!(registry.resolve("fetch").expect("resolve").name(), "fetch");
        assert_eq!(registry.resolve("add_user").expect("resolve").name(), "users");
        let names: Vec<_> = registry.manifests().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["search_user", "add_user", "fetch"]);
    }

    #[test]
    fn unknown_tool_fails_resolution() {
        let registry = CapabilityRegistry::new();
        let err = match registry.resolve("delete_user") {
            Ok(_) => panic!("unregistered tool should not resolve"),
            Err(err) => err,
        };
        assert!(matches!(err, SwitchboardError::UnknownTool { name } if name == "delete_user"));
    }

    #[tokio::test]
    async fn reject_policy_reports_collision_and_registers_nothing() {
        let first = session("alpha", &["search"]);
        let second = session("beta", &["stats", "search"]);
        let mut registry = CapabilityRegistry::new();
        registry.register_session(&first).await.expect("first");

        let err = registry
            .register_session(&second)
            .await
            .expect_err("collision should be rejected");
        assert!(matches!(
            err,
            SwitchboardError::DuplicateTool { name, first, second }
            if name == "search" && first == "alpha" && second == "beta"
        ));
        assert!(!registry.contains("stats"));
        assert_eq!(registry.session_names(), ["alpha".to_string()]);
    }

    #[tokio::test]
    async fn first_registered_wins_keeps_earlier_binding() {
        let first = session("alpha", &["search"]);
        let second = session("beta", &["search", "stats"]);
        let mut registry = CapabilityRegistry::with_policy(CollisionPolicy::FirstRegisteredWins);
        registry.register_session(&first).await.expect("first");
        assert_eq!(registry.register_session(&second).await.expect("second"), 1);

        assert_eq!(registry.session_for("search"), Some("alpha"));
        assert_eq!(registry.session_for("stats"), Some("beta"));
        assert_eq!(registry.manifests().len(), 2);
    }

    #[tokio::test]
    async fn dropped_session_resolves_to_session_closed() {
        let mut registry = CapabilityRegistry::new();
        {
            let transient = session("transient", &["ping"]);
            registry.register_session(&transient).await.expect("register");
        }
        let err = match registry.resolve("ping") {
            Ok(_) => panic!("dropped session should not resolve"),
            Err(err) => err,
        };
        assert!(matches!(err, SwitchboardError::SessionClosed(name) if name == "transient"));
    }

    #[test]
    fn duplicate_session_names_are_rejected() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(&session("users", &[]), Vec::new())
            .expect("first");
        let err = registry
            .register(&session("users", &[]), Vec::new())
            .expect_err("duplicate name");
        assert!(matches!(err, SwitchboardError::Configuration(message) if message.contains("Duplicate session")));
    }
}
