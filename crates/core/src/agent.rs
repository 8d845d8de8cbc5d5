//! Agent descriptors and conversation addressing

use serde::{Deserialize, Serialize};

/// Immutable description of an agent, created at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Name of the registered model this agent talks to
    pub model: String,
    /// Instruction text rendered as the leading system message
    #[serde(default)]
    pub instructions: String,
    /// Tools the agent may call; names without a registered tool are unavailable
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    /// Pre-hooks, in execution order
    #[serde(default)]
    pub pre_hooks: Vec<String>,
    /// Post-hooks, in execution order
    #[serde(default)]
    pub post_hooks: Vec<String>,
}

impl Agent {
    pub fn new(id: impl Into<String>, name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            model: model.into(),
            instructions: String::new(),
            tools: Vec::new(),
            mcp_servers: Vec::new(),
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_mcp_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mcp_servers = servers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pre_hooks<I, S>(mut self, hooks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pre_hooks = hooks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_post_hooks<I, S>(mut self, hooks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.post_hooks = hooks.into_iter().map(Into::into).collect();
        self
    }
}

/// Addresses one logical conversation: which agent, which user, which session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentSessionContext {
    pub agent_id: String,
    pub user_id: String,
    pub session_id: String,
}

impl AgentSessionContext {
    pub fn new(
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}
