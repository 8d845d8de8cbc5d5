//! Orchestrator
//!
//! Entry point of the runtime. One invocation resolves the session, agent and
//! model, runs the pre-hooks, drives the agent loop under the execution policy,
//! finalizes the [`Run`], runs the post-hooks and persists everything.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use agent_core::{
    AgentSessionContext, Message, OpaqueValue, Run, RunMetrics, RunStatus, RunSummary, Session,
    Storage,
};
use futures::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::agent_loop::{AgentLoop, EventSink, LoopTrace, StreamEvent};
use crate::config::RuntimeConfig;
use crate::context_window::ContextWindowManager;
use crate::error::{Result, RuntimeError};
use crate::hooks::{HookContext, HookFailure, HookPipeline};
use crate::options::RunRequest;
use crate::policy::enforce;
use crate::registry::Registry;
use crate::tool::ToolSet;

/// Events of a streamed invocation; ends with `Completed` or an error
pub type RunStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

const POST_HOOK_ERROR_KEY: &str = "post_hook_error";

/// A value that can be decoded from a completed run's content
pub trait RunResult: Sized {
    fn from_run(run: &Run) -> Result<Self>;
}

impl RunResult for String {
    fn from_run(run: &Run) -> Result<Self> {
        Ok(run.content_text()?)
    }
}

impl RunResult for Vec<u8> {
    fn from_run(run: &Run) -> Result<Self> {
        run.content.clone().ok_or(RuntimeError::NoData)
    }
}

impl RunResult for serde_json::Value {
    fn from_run(run: &Run) -> Result<Self> {
        Ok(run.decode_content()?)
    }
}

/// Decode the content as JSON into `T`
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: DeserializeOwned> RunResult for Json<T> {
    fn from_run(run: &Run) -> Result<Self> {
        Ok(Json(run.decode_content()?))
    }
}

/// Drives agent invocations
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<Registry>,
    storage: Arc<dyn Storage>,
    hooks: HookPipeline,
    context_window: ContextWindowManager,
    config: Arc<RuntimeConfig>,
}

impl Orchestrator {
    pub fn new(registry: Arc<Registry>, storage: Arc<dyn Storage>) -> Self {
        Self::with_config(registry, storage, RuntimeConfig::default())
    }

    pub fn with_config(
        registry: Arc<Registry>,
        storage: Arc<dyn Storage>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            registry,
            storage,
            hooks: HookPipeline::new(),
            context_window: ContextWindowManager::new(config.context_window),
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Create a session for `context`; an empty session id gets a generated one
    pub async fn create_session(&self, context: &AgentSessionContext) -> Result<Session> {
        Ok(self.storage.create_session(context).await?)
    }

    /// Run the agent once and return the finalized, persisted run.
    ///
    /// When the invocation fails after the run was created, the run is still
    /// persisted as failed or cancelled before the error is returned.
    pub async fn run(
        &self,
        context: &AgentSessionContext,
        message: impl Into<String>,
        request: RunRequest,
    ) -> Result<Run> {
        self.execute(context, message.into(), request, None).await
    }

    /// Like [`Orchestrator::run`], also decoding the run's content as `R`
    pub async fn run_as<R: RunResult>(
        &self,
        context: &AgentSessionContext,
        message: impl Into<String>,
        request: RunRequest,
    ) -> Result<(Run, R)> {
        let run = self.run(context, message, request).await?;
        let output = R::from_run(&run)?;
        Ok((run, output))
    }

    /// Run the agent, yielding deltas and tool activity as they happen.
    ///
    /// Nothing executes until the stream is first polled. The final item is
    /// `Completed` with the same run `run` would have returned, or the error.
    pub fn stream(
        &self,
        context: &AgentSessionContext,
        message: impl Into<String>,
        request: RunRequest,
    ) -> RunStream {
        let this = self.clone();
        let context = context.clone();
        let message = message.into();

        let start = async move {
            let (tx, rx) = mpsc::channel(this.config.stream_buffer);
            let sink = EventSink::new(tx.clone());
            tokio::spawn(async move {
                let last = this
                    .execute(&context, message, request, Some(sink))
                    .await
                    .map(|run| StreamEvent::Completed(Box::new(run)));
                if tx.send(last).await.is_err() {
                    debug!("Stream receiver dropped before completion");
                }
            });
            ReceiverStream::new(rx)
        };
        Box::pin(stream::once(start).flatten())
    }

    /// Wait for every background hook launched so far
    pub async fn wait_for_background_hooks(&self) {
        self.hooks.wait_for_background_hooks().await;
    }

    /// Abort every background hook; returns how many were still running
    pub fn cancel_background_hooks(&self) -> usize {
        self.hooks.cancel_background_hooks()
    }

    /// Errors reported by background hooks so far
    pub fn background_hook_failures(&self) -> Vec<HookFailure> {
        self.hooks.background_failures()
    }

    #[instrument(
        skip_all,
        fields(agent_id = %context.agent_id, session_id = %context.session_id, streaming = events.is_some())
    )]
    async fn execute(
        &self,
        context: &AgentSessionContext,
        message: String,
        request: RunRequest,
        events: Option<EventSink>,
    ) -> Result<Run> {
        let session = self.storage.load_session(&context.session_id).await?;
        if session.agent_id != context.agent_id {
            return Err(RuntimeError::invalid_configuration(format!(
                "session {} belongs to agent {}, not {}",
                session.id, session.agent_id, context.agent_id
            )));
        }
        let agent = self.registry.agent(&context.agent_id)?;
        let model = self.registry.model(&agent.model)?;
        let tools = ToolSet::resolve(&self.registry, &agent, &request.options)?;

        let mut hook_context =
            HookContext::new(context, Message::user(message), request.options.clone());
        hook_context.metadata = request.metadata.clone();
        self.hooks
            .run_pre_hooks(&self.registry, &agent, &mut hook_context)
            .await?;

        let mut run = Run::new(&agent.id, &session.id, &context.user_id, model.name());
        run.provider = model.provider().to_string();
        run.parent_run_id = request.parent_run_id;
        run.metadata = hook_context.metadata.clone();
        info!(run_id = %run.id, model = %run.model, "Starting run");

        let mut base = Vec::new();
        if !agent.instructions.is_empty() {
            base.push(Message::system(&agent.instructions));
        }
        let mut summary_update = None;
        if request.load_history {
            let summary_hook = self.registry.summary_hook(&agent.id);
            let prepared = self
                .context_window
                .prepare(
                    &session.messages,
                    session.summary.as_deref(),
                    summary_hook.as_ref(),
                    request.context_window,
                )
                .await;
            if prepared.summary_changed {
                summary_update = prepared.summary;
            }
            base.extend(prepared.messages);
        }
        let user_message = hook_context.message.clone();
        base.push(user_message.clone());

        let policy = request
            .policy
            .clone()
            .unwrap_or_else(|| self.config.default_policy.clone());
        let mut agent_loop = AgentLoop::new(model, tools, request.options.generation.clone())
            .with_max_tool_calls(policy.max_tool_calls);
        if let Some(sink) = events {
            agent_loop = agent_loop.with_events(sink);
        }
        let cancel = request.cancel.clone().unwrap_or_else(CancellationToken::new);

        let started = Instant::now();
        let outcome = enforce(&policy, &cancel, |attempt, token| {
            debug!(run_id = %run.id, attempt, "Running agent loop");
            agent_loop.run(&base, token)
        })
        .await;

        let trace = agent_loop.trace().snapshot();
        let duration_ms = started.elapsed().as_millis() as u64;
        run.metrics = Some(metrics(&trace, outcome.attempts, duration_ms));
        run.messages = std::iter::once(user_message).chain(trace.messages).collect();
        run.tool_executions = trace.tool_executions;
        if !hook_context.session_data.is_empty() {
            run.session_data = Some(hook_context.session_data.clone());
        }

        match &outcome.result {
            Ok(final_message) => run.mark_completed(Some(content_bytes(final_message)?))?,
            Err(RuntimeError::Cancelled) => run.mark_cancelled()?,
            Err(e) => run.mark_failed(e.to_string())?,
        }
        match &outcome.result {
            Ok(_) => info!(run_id = %run.id, duration_ms, "Run completed"),
            Err(e) => warn!(run_id = %run.id, error = %e, status = run.status.as_str(), "Run did not complete"),
        }

        let post_result = self
            .hooks
            .run_post_hooks(&self.registry, &agent, &hook_context, &run)
            .await;
        if let Err(e) = &post_result {
            run.metadata
                .insert(POST_HOOK_ERROR_KEY.to_string(), OpaqueValue::from(e.to_string()));
        }

        self.persist(&run, summary_update).await?;

        outcome.result?;
        post_result?;
        Ok(run)
    }

    /// Save the run and fold it into its session
    async fn persist(&self, run: &Run, summary: Option<String>) -> Result<()> {
        self.storage.save_run(run).await?;

        self.storage
            .append_messages(&run.session_id, &run.messages)
            .await?;
        self.storage
            .append_run(&run.session_id, RunSummary::from(run))
            .await?;
        if summary.is_some() {
            self.storage.update_summary(&run.session_id, summary).await?;
        }
        if let (RunStatus::Completed, Some(data)) = (run.status, &run.session_data) {
            self.storage
                .merge_session_data(&run.session_id, data.clone())
                .await?;
        }
        debug!(run_id = %run.id, "Run persisted");
        Ok(())
    }
}

fn metrics(trace: &LoopTrace, attempts: u32, duration_ms: u64) -> RunMetrics {
    RunMetrics {
        attempts,
        model_calls: trace.model_calls,
        tool_calls: trace.tool_executions.len() as u32,
        input_tokens: trace.usage.input_tokens,
        output_tokens: trace.usage.output_tokens,
        total_tokens: trace.usage.total(),
        duration_ms,
    }
}

/// Raw content of the final message: its structured payload as JSON, else its text
fn content_bytes(message: &Message) -> Result<Vec<u8>> {
    match &message.payload {
        Some(payload) => {
            serde_json::to_vec(payload).map_err(|e| RuntimeError::InvalidJsonResponse {
                message: e.to_string(),
            })
        }
        None => Ok(message.content.clone().into_bytes()),
    }
}
