use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use agent_core::{AgentSessionContext, Message, OpaqueValue, Run};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context_window::ContextWindowConfig;
use crate::options::AgentRunOptions;

/// Which side of the run a hook belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPhase {
    Pre,
    Post,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pre => write!(f, "pre"),
            Self::Post => write!(f, "post"),
        }
    }
}

/// Name and scheduling of a registered hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookConfig {
    pub name: String,
    /// Awaited in-line when true, launched in the background otherwise
    pub blocking: bool,
}

impl HookConfig {
    pub fn blocking(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocking: true,
        }
    }

    pub fn background(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocking: false,
        }
    }
}

/// What a hook sees of the current invocation.
///
/// Blocking pre-hooks get it mutably: edits to `message` reach the model and
/// entries put in `session_data` are saved with the run. Every other hook gets
/// a frozen copy.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub agent_id: String,
    pub user_id: String,
    pub session_id: String,
    /// The outbound user message
    pub message: Message,
    pub options: AgentRunOptions,
    /// Session-data updates produced by this run
    pub session_data: HashMap<String, OpaqueValue>,
    pub metadata: HashMap<String, OpaqueValue>,
}

impl HookContext {
    pub fn new(context: &AgentSessionContext, message: Message, options: AgentRunOptions) -> Self {
        Self {
            agent_id: context.agent_id.clone(),
            user_id: context.user_id.clone(),
            session_id: context.session_id.clone(),
            message,
            options,
            session_data: HashMap::new(),
            metadata: HashMap::new(),
        }
    }
}

#[async_trait]
pub trait PreHook: Send + Sync {
    async fn run(&self, context: &mut HookContext) -> anyhow::Result<()>;
}

#[async_trait]
pub trait PostHook: Send + Sync {
    async fn run(&self, context: &HookContext, run: &Run) -> anyhow::Result<()>;
}

/// Input of a summary hook after history was compacted
#[derive(Debug, Clone)]
pub struct SummaryInput {
    pub existing_summary: Option<String>,
    pub dropped: Vec<Message>,
    pub retained: Vec<Message>,
    pub config: ContextWindowConfig,
}

#[async_trait]
pub trait SummaryHook: Send + Sync {
    /// Return a replacement summary, or `None` to keep the existing one
    async fn summarize(&self, input: &SummaryInput) -> anyhow::Result<Option<String>>;
}

#[derive(Clone)]
pub struct RegisteredPreHook {
    pub config: HookConfig,
    pub hook: Arc<dyn PreHook>,
}

impl RegisteredPreHook {
    pub fn new(config: HookConfig, hook: impl PreHook + 'static) -> Self {
        Self {
            config,
            hook: Arc::new(hook),
        }
    }
}

#[derive(Clone)]
pub struct RegisteredPostHook {
    pub config: HookConfig,
    pub hook: Arc<dyn PostHook>,
}

impl RegisteredPostHook {
    pub fn new(config: HookConfig, hook: impl PostHook + 'static) -> Self {
        Self {
            config,
            hook: Arc::new(hook),
        }
    }
}

#[derive(Clone)]
pub struct RegisteredSummaryHook {
    pub name: String,
    pub hook: Arc<dyn SummaryHook>,
}

impl RegisteredSummaryHook {
    pub fn new(name: impl Into<String>, hook: impl SummaryHook + 'static) -> Self {
        Self {
            name: name.into(),
            hook: Arc::new(hook),
        }
    }
}

/// A non-blocking hook that returned an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookFailure {
    pub hook: String,
    pub phase: HookPhase,
    pub message: String,
    pub at: DateTime<Utc>,
}
