//! Pre-, post- and summary hooks
//!
//! Agents name their hooks; the registry resolves names to registered hooks and
//! the [`HookPipeline`] runs them. Blocking hooks are awaited in declaration
//! order; non-blocking hooks are launched afterwards as tracked background tasks.

mod background;
mod pipeline;
mod types;

pub use background::BackgroundTasks;
pub use pipeline::HookPipeline;
pub use types::{
    HookConfig, HookContext, HookFailure, HookPhase, PostHook, PreHook, RegisteredPostHook,
    RegisteredPreHook, RegisteredSummaryHook, SummaryHook, SummaryInput,
};
