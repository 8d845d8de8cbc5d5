//! Per-run options

use std::collections::HashMap;

use agent_core::OpaqueValue;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context_window::ContextWindowConfig;
use crate::model::GenerationOptions;
use crate::policy::ExecutionPolicy;

/// Generation parameters and tool filtering for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRunOptions {
    #[serde(default)]
    pub generation: GenerationOptions,
    /// When set, only these tools may be used; every name must be registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    /// Never usable, whatever the allow-list says
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_tools: Vec<String>,
}

impl AgentRunOptions {
    pub fn with_generation(mut self, generation: GenerationOptions) -> Self {
        self.generation = generation;
        self
    }

    pub fn allow_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    pub fn block_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_tools = tools.into_iter().map(Into::into).collect();
        self
    }
}

/// Everything a caller can tune for one `run`/`stream` call
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub options: AgentRunOptions,
    /// Falls back to the runtime's default policy when unset
    pub policy: Option<ExecutionPolicy>,
    /// Feed the session's (compacted) history to the model
    pub load_history: bool,
    /// Falls back to the runtime's configured window when unset
    pub context_window: Option<ContextWindowConfig>,
    pub parent_run_id: Option<Uuid>,
    pub metadata: HashMap<String, OpaqueValue>,
    /// Cancels the invocation from outside
    pub cancel: Option<CancellationToken>,
}

impl RunRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: AgentRunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_history(mut self) -> Self {
        self.load_history = true;
        self
    }

    pub fn with_context_window(mut self, window: ContextWindowConfig) -> Self {
        self.context_window = Some(window);
        self
    }

    pub fn with_parent_run(mut self, parent_run_id: Uuid) -> Self {
        self.parent_run_id = Some(parent_run_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<OpaqueValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}
