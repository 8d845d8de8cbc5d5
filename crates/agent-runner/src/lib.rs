//! Agent Runner - execution runtime for agent invocations
//!
//! This crate drives one invocation of an agent: pre-hooks, the
//! model/tool loop under an execution policy, optional history compaction,
//! post-hooks, and persistence of the resulting run.

mod agent_loop;
mod config;
mod context_window;
mod error;
mod hooks;
mod model;
mod options;
mod orchestrator;
mod policy;
mod registry;
pub mod telemetry;
mod tool;

#[cfg(test)]
mod testing;

pub use agent_loop::{EventSink, StreamEvent};
pub use config::{RuntimeConfig, DEFAULT_DATA_DIR, DEFAULT_STREAM_BUFFER};
pub use context_window::{compact, estimate_tokens, Compaction, ContextWindowConfig, ContextWindowManager};
pub use error::{Result, RuntimeError};
pub use hooks::{
    BackgroundTasks, HookConfig, HookContext, HookFailure, HookPhase, HookPipeline, PostHook,
    PreHook, RegisteredPostHook, RegisteredPreHook, RegisteredSummaryHook, SummaryHook,
    SummaryInput,
};
pub use model::{GenerationOptions, Model, ModelDelta, ModelRequest, ModelResponse, ModelStream, Usage};
pub use options::{AgentRunOptions, RunRequest};
pub use orchestrator::{Json, Orchestrator, RunResult, RunStream};
pub use policy::{enforce, ExecutionPolicy, PolicyOutcome};
pub use registry::Registry;
pub use tool::{Tool, ToolError, ToolSet, ToolSpec};
