//! Descriptor registry
//!
//! One lock guards every table. Lookups clone an `Arc` out and release the
//! lock straight away, so no invocation ever holds it across an await.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use agent_core::Agent;
use tracing::debug;

use crate::error::{Result, RuntimeError};
use crate::hooks::{RegisteredPostHook, RegisteredPreHook, RegisteredSummaryHook};
use crate::model::Model;
use crate::tool::Tool;

#[derive(Default)]
struct RegistryInner {
    agents: HashMap<String, Arc<Agent>>,
    models: HashMap<String, Arc<dyn Model>>,
    tools: HashMap<String, Arc<dyn Tool>>,
    pre_hooks: HashMap<String, RegisteredPreHook>,
    post_hooks: HashMap<String, RegisteredPostHook>,
    /// Keyed by agent id
    summary_hooks: HashMap<String, RegisteredSummaryHook>,
}

/// Agents and capability handles, keyed by id or name
#[derive(Default)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an agent, replacing any agent with the same id
    pub fn register_agent(&self, agent: Agent) {
        debug!(agent_id = %agent.id, "Registering agent");
        self.write().agents.insert(agent.id.clone(), Arc::new(agent));
    }

    pub fn register_model(&self, name: impl Into<String>, model: Arc<dyn Model>) {
        self.write().models.insert(name.into(), model);
    }

    pub fn register_tool(&self, name: impl Into<String>, tool: Arc<dyn Tool>) {
        self.write().tools.insert(name.into(), tool);
    }

    pub fn register_pre_hook(&self, hook: RegisteredPreHook) {
        self.write().pre_hooks.insert(hook.config.name.clone(), hook);
    }

    pub fn register_post_hook(&self, hook: RegisteredPostHook) {
        self.write().post_hooks.insert(hook.config.name.clone(), hook);
    }

    /// Attach the summary hook used when an agent's history is compacted
    pub fn register_summary_hook(&self, agent_id: impl Into<String>, hook: RegisteredSummaryHook) {
        self.write().summary_hooks.insert(agent_id.into(), hook);
    }

    pub fn agent(&self, agent_id: &str) -> Result<Arc<Agent>> {
        self.read()
            .agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| RuntimeError::AgentNotFound {
                agent_id: agent_id.to_string(),
            })
    }

    pub fn model(&self, name: &str) -> Result<Arc<dyn Model>> {
        self.read()
            .models
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::ModelNotFound {
                model: name.to_string(),
            })
    }

    pub fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.read().tools.get(name).cloned()
    }

    pub fn pre_hook(&self, name: &str) -> Option<RegisteredPreHook> {
        self.read().pre_hooks.get(name).cloned()
    }

    pub fn post_hook(&self, name: &str) -> Option<RegisteredPostHook> {
        self.read().post_hooks.get(name).cloned()
    }

    pub fn summary_hook(&self, agent_id: &str) -> Option<RegisteredSummaryHook> {
        self.read().summary_hooks.get(agent_id).cloned()
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().agents.keys().cloned().collect();
        ids.sort();
        ids
    }
}
