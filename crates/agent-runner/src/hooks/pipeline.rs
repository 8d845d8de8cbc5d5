use std::sync::{Arc, Mutex, PoisonError};

use agent_core::{Agent, Run};
use chrono::Utc;
use tracing::{debug, warn};

use super::background::BackgroundTasks;
use super::types::{HookContext, HookFailure, HookPhase, RegisteredPostHook, RegisteredPreHook};
use crate::error::{Result, RuntimeError};
use crate::registry::Registry;

/// Runs an agent's hooks and owns the background tasks they leave behind
#[derive(Clone, Default)]
pub struct HookPipeline {
    tasks: BackgroundTasks,
    failures: Arc<Mutex<Vec<HookFailure>>>,
}

/// Resolve names in declaration order, then split into (blocking, background)
fn partition<H>(
    names: &[String],
    resolve: impl Fn(&str) -> Option<H>,
    is_blocking: impl Fn(&H) -> bool,
    phase: HookPhase,
) -> (Vec<H>, Vec<H>) {
    let mut blocking = Vec::new();
    let mut background = Vec::new();
    for name in names {
        match resolve(name) {
            Some(hook) if is_blocking(&hook) => blocking.push(hook),
            Some(hook) => background.push(hook),
            None => warn!(hook = %name, %phase, "Hook is not registered, skipping"),
        }
    }
    (blocking, background)
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the agent's pre-hooks.
    ///
    /// Blocking hooks see and may edit `context`; the first error aborts.
    /// Background hooks get a copy taken after the blocking phase.
    pub async fn run_pre_hooks(
        &self,
        registry: &Registry,
        agent: &Agent,
        context: &mut HookContext,
    ) -> Result<()> {
        let (blocking, background) = partition(
            &agent.pre_hooks,
            |name| registry.pre_hook(name),
            |hook: &RegisteredPreHook| hook.config.blocking,
            HookPhase::Pre,
        );

        for registered in blocking {
            debug!(hook = %registered.config.name, "Running blocking pre-hook");
            registered
                .hook
                .run(context)
                .await
                .map_err(|e| hook_failed(&registered.config.name, e))?;
        }

        for registered in background {
            let mut frozen = context.clone();
            let failures = Arc::clone(&self.failures);
            let name = registered.config.name.clone();
            self.tasks.spawn(name.clone(), async move {
                if let Err(e) = registered.hook.run(&mut frozen).await {
                    record_failure(&failures, name, HookPhase::Pre, e);
                }
            });
        }

        Ok(())
    }

    /// Run the agent's post-hooks against a finished run
    pub async fn run_post_hooks(
        &self,
        registry: &Registry,
        agent: &Agent,
        context: &HookContext,
        run: &Run,
    ) -> Result<()> {
        let (blocking, background) = partition(
            &agent.post_hooks,
            |name| registry.post_hook(name),
            |hook: &RegisteredPostHook| hook.config.blocking,
            HookPhase::Post,
        );

        for registered in blocking {
            debug!(hook = %registered.config.name, run_id = %run.id, "Running blocking post-hook");
            registered
                .hook
                .run(context, run)
                .await
                .map_err(|e| hook_failed(&registered.config.name, e))?;
        }

        if background.is_empty() {
            return Ok(());
        }
        let snapshot = Arc::new(run.clone());
        for registered in background {
            let frozen = context.clone();
            let run = Arc::clone(&snapshot);
            let failures = Arc::clone(&self.failures);
            let name = registered.config.name.clone();
            self.tasks.spawn(name.clone(), async move {
                if let Err(e) = registered.hook.run(&frozen, &run).await {
                    record_failure(&failures, name, HookPhase::Post, e);
                }
            });
        }

        Ok(())
    }

    /// Block until every background hook launched so far has finished
    pub async fn wait_for_background_hooks(&self) {
        self.tasks.wait_all().await;
    }

    /// Abort all background hooks; returns how many were still running
    pub fn cancel_background_hooks(&self) -> usize {
        self.tasks.cancel_all()
    }

    pub fn background_hook_count(&self) -> usize {
        self.tasks.len()
    }

    /// Failures reported by background hooks, oldest first
    pub fn background_failures(&self) -> Vec<HookFailure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn hook_failed(hook: &str, err: anyhow::Error) -> RuntimeError {
    RuntimeError::HookFailed {
        hook: hook.to_string(),
        message: format!("{:#}", err),
    }
}

fn record_failure(
    failures: &Mutex<Vec<HookFailure>>,
    hook: String,
    phase: HookPhase,
    err: anyhow::Error,
) {
    warn!(%hook, %phase, error = %format!("{:#}", err), "Background hook failed");
    failures
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(HookFailure {
            hook,
            phase,
            message: format!("{:#}", err),
            at: Utc::now(),
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookConfig;
    use crate::options::AgentRunOptions;
    use crate::testing::{FailingPostHook, RecordingHook, RewriteHook};
    use agent_core::{AgentSessionContext, Message};
    use std::time::Duration;

    fn context() -> HookContext {
        HookContext::new(
            &AgentSessionContext::new("agent", "user", "session"),
            Message::user("hello"),
            AgentRunOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_blocking_pre_hooks_run_in_order_and_mutate() {
        let registry = Registry::new();
        let log = RecordingHook::new();
        registry.register_pre_hook(RegisteredPreHook::new(
            HookConfig::blocking("rewrite"),
            RewriteHook::new("rewritten"),
        ));
        registry.register_pre_hook(RegisteredPreHook::new(
            HookConfig::blocking("record"),
            log.clone(),
        ));
        let agent = Agent::new("agent", "A", "m").with_pre_hooks(["rewrite", "record", "absent"]);

        let pipeline = HookPipeline::new();
        let mut ctx = context();
        pipeline.run_pre_hooks(&registry, &agent, &mut ctx).await.unwrap();

        assert_eq!(ctx.message.content, "rewritten");
        assert_eq!(log.seen(), vec!["rewritten".to_string()]);
    }

    #[tokio::test]
    async fn test_background_pre_hook_sees_frozen_copy() {
        let registry = Registry::new();
        registry.register_pre_hook(RegisteredPreHook::new(
            HookConfig::background("rewrite"),
            RewriteHook::new("ignored"),
        ));
        let agent = Agent::new("agent", "A", "m").with_pre_hooks(["rewrite"]);

        let pipeline = HookPipeline::new();
        let mut ctx = context();
        pipeline.run_pre_hooks(&registry, &agent, &mut ctx).await.unwrap();
        pipeline.wait_for_background_hooks().await;

        assert_eq!(ctx.message.content, "hello");
    }

    #[tokio::test]
    async fn test_blocking_post_hook_error_surfaces() {
        let registry = Registry::new();
        registry.register_post_hook(RegisteredPostHook::new(
            HookConfig::blocking("audit"),
            FailingPostHook::new(Duration::ZERO),
        ));
        let agent = Agent::new("agent", "A", "m").with_post_hooks(["audit"]);
        let run = Run::new("agent", "session", "user", "m");

        let err = HookPipeline::new()
            .run_post_hooks(&registry, &agent, &context(), &run)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::HookFailed { hook, .. } if hook == "audit"));
    }

    #[tokio::test]
    async fn test_background_failures_are_recorded_not_raised() {
        let registry = Registry::new();
        registry.register_post_hook(RegisteredPostHook::new(
            HookConfig::background("audit"),
            FailingPostHook::new(Duration::from_millis(30)),
        ));
        let agent = Agent::new("agent", "A", "m").with_post_hooks(["audit"]);
        let run = Run::new("agent", "session", "user", "m");

        let pipeline = HookPipeline::new();
        pipeline
            .run_post_hooks(&registry, &agent, &context(), &run)
            .await
            .unwrap();
        assert_eq!(pipeline.background_hook_count(), 1);

        pipeline.wait_for_background_hooks().await;
        assert_eq!(pipeline.background_hook_count(), 0);

        let failures = pipeline.background_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].hook, "audit");
        assert_eq!(failures[0].phase, HookPhase::Post);
    }
}
