//! Core library for the agent runtime
//!
//! This crate contains the data model shared by every invocation:
//! - Agent descriptors and session addressing
//! - Sessions, messages, runs and tool executions
//! - Opaque values for free-form metadata and tool payloads
//! - The storage interface with in-memory and file-backed implementations

pub mod agent;
pub mod error;
pub mod message;
pub mod run;
pub mod session;
pub mod storage;
pub mod value;

pub use agent::{Agent, AgentSessionContext};
pub use error::Error;
pub use message::{Message, MessageRole, ToolCall};
pub use run::{Run, RunMetrics, RunStatus, RunSummary, ToolExecution};
pub use session::{Session, SessionStats};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use value::OpaqueValue;

pub type Result<T> = std::result::Result<T, Error>;
