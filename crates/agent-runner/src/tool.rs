//! Tool capability and per-run tool resolution

use std::collections::HashSet;
use std::sync::Arc;

use agent_core::{Agent, OpaqueValue};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::{Result, RuntimeError};
use crate::options::AgentRunOptions;
use crate::registry::Registry;

/// Error returned by a tool's own logic
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A callable tool
#[async_trait]
pub trait Tool: Send + Sync {
    /// Human-readable description offered to the model
    fn description(&self) -> &str {
        ""
    }

    /// JSON schema of the arguments, if the tool publishes one
    fn parameters(&self) -> OpaqueValue {
        OpaqueValue::null()
    }

    async fn call(&self, arguments: OpaqueValue) -> std::result::Result<OpaqueValue, ToolError>;
}

/// What the model is told about a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: OpaqueValue,
}

/// The tools one run may call, after allow/block filtering
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<(String, Arc<dyn Tool>)>,
    blocked: HashSet<String>,
}

impl ToolSet {
    /// Resolve the agent's tools against the registry and the run's lists.
    ///
    /// The block-list always wins over the allow-list. An allow-list entry that
    /// names an unregistered tool is a configuration error. Agent tool names
    /// without a registered tool are simply unavailable.
    pub fn resolve(registry: &Registry, agent: &Agent, options: &AgentRunOptions) -> Result<Self> {
        if let Some(allowed) = &options.allowed_tools {
            if let Some(unknown) = allowed.iter().find(|name| registry.tool(name).is_none()) {
                return Err(RuntimeError::UnknownTool {
                    tool: unknown.clone(),
                });
            }
        }

        let blocked: HashSet<String> = options.blocked_tools.iter().cloned().collect();
        let mut tools = Vec::new();
        for name in &agent.tools {
            if blocked.contains(name) {
                continue;
            }
            if let Some(allowed) = &options.allowed_tools {
                if !allowed.contains(name) {
                    continue;
                }
            }
            match registry.tool(name) {
                Some(tool) => tools.push((name.clone(), tool)),
                None => debug!("Tool {} referenced by agent {} is not registered", name, agent.id),
            }
        }

        Ok(Self { tools, blocked })
    }

    /// Look up a tool the model asked for
    pub fn permit(&self, name: &str) -> Result<Arc<dyn Tool>> {
        if self.blocked.contains(name) {
            return Err(RuntimeError::ToolNotAllowed {
                tool: name.to_string(),
            });
        }
        self.tools
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, tool)| Arc::clone(tool))
            .ok_or_else(|| RuntimeError::UnknownTool {
                tool: name.to_string(),
            })
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|(name, tool)| ToolSpec {
                name: name.clone(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::EchoTool;

    fn registry() -> Registry {
        let registry = Registry::new();
        registry.register_tool("search", Arc::new(EchoTool));
        registry.register_tool("lookup", Arc::new(EchoTool));
        registry.register_tool("delete", Arc::new(EchoTool));
        registry
    }

    fn agent() -> Agent {
        Agent::new("a", "A", "m").with_tools(["search", "lookup", "delete", "missing"])
    }

    #[test]
    fn test_unregistered_agent_tools_are_unavailable() {
        let set = ToolSet::resolve(&registry(), &agent(), &AgentRunOptions::default()).unwrap();
        assert_eq!(set.names(), vec!["search", "lookup", "delete"]);
        assert!(matches!(set.permit("missing"), Err(RuntimeError::UnknownTool { .. })));
    }

    #[test]
    fn test_block_list_wins_over_allow_list() {
        let options = AgentRunOptions::default()
            .allow_tools(["search", "delete"])
            .block_tools(["delete"]);
        let set = ToolSet::resolve(&registry(), &agent(), &options).unwrap();

        assert_eq!(set.names(), vec!["search"]);
        assert!(matches!(set.permit("delete"), Err(RuntimeError::ToolNotAllowed { .. })));
        assert!(matches!(set.permit("lookup"), Err(RuntimeError::UnknownTool { .. })));
        assert!(set.permit("search").is_ok());
    }

    #[test]
    fn test_unknown_allow_list_entry_is_configuration_error() {
        let options = AgentRunOptions::default().allow_tools(["search", "teleport"]);
        let err = ToolSet::resolve(&registry(), &agent(), &options).err().unwrap();
        assert!(matches!(err, RuntimeError::UnknownTool { tool } if tool == "teleport"));
    }

    #[test]
    fn test_specs_use_registered_names() {
        let set = ToolSet::resolve(&registry(), &agent(), &AgentRunOptions::default()).unwrap();
        let specs = set.specs();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].name, "search");
        assert_eq!(specs[0].description, "Echoes its arguments");
    }
}
