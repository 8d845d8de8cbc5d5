//! Run - Persistent record of one agent invocation
//!
//! A Run is created in `running` state when an invocation starts, collects the
//! messages and tool activity of that invocation, is finalized to a terminal
//! status exactly once, and is then persisted and never changed again.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{Message, ToolCall};
use crate::value::OpaqueValue;
use crate::{Error, Result};

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Check if the status represents a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Statuses only move forward: running, then optionally paused, then a
    /// terminal status that never changes.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match self {
            Self::Running => next != Self::Running,
            Self::Paused => next.is_terminal(),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One tool invocation inside a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub id: Uuid,
    /// Id of the model's tool call this execution answers
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: OpaqueValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<OpaqueValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl ToolExecution {
    pub fn succeeded(call: &ToolCall, result: OpaqueValue, duration_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            result: Some(result),
            error: None,
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(call: &ToolCall, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            result: None,
            error: Some(error.into()),
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Counters collected while a run executes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Attempts made by the execution policy (1 + retries used)
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub model_calls: u32,
    #[serde(default)]
    pub tool_calls: u32,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub duration_ms: u64,
}

/// A persistent execution record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub agent_id: String,
    pub session_id: String,
    pub user_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<Uuid>,

    /// Messages produced during this invocation, starting with the user message
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Raw final content, stored as base64 so arbitrary bytes survive
    #[serde(
        default,
        with = "base64_bytes",
        skip_serializing_if = "Option::is_none"
    )]
    pub content: Option<Vec<u8>>,

    pub status: RunStatus,

    pub model: String,
    #[serde(default)]
    pub provider: String,

    #[serde(default)]
    pub tool_executions: Vec<ToolExecution>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<RunMetrics>,

    /// Session data written during this run, merged into the session afterwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_data: Option<HashMap<String, OpaqueValue>>,

    #[serde(default)]
    pub metadata: HashMap<String, OpaqueValue>,

    /// Error message (if failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a new run in `running` state
    pub fn new(
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            parent_run_id: None,
            messages: Vec::new(),
            content: None,
            status: RunStatus::Running,
            model: model.into(),
            provider: String::new(),
            tool_executions: Vec::new(),
            metrics: None,
            session_data: None,
            metadata: HashMap::new(),
            error: None,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Mark the run as completed with its final content
    pub fn mark_completed(&mut self, content: Option<Vec<u8>>) -> Result<()> {
        self.transition(RunStatus::Completed)?;
        self.content = content;
        Ok(())
    }

    /// Mark the run as failed
    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(RunStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Mark the run as cancelled
    pub fn mark_cancelled(&mut self) -> Result<()> {
        self.transition(RunStatus::Cancelled)
    }

    fn transition(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidInput(format!(
                "run {} cannot move from {} to {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Check if the run is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Decode the raw content as text
    pub fn content_text(&self) -> Result<String> {
        let bytes = self.content.as_ref().ok_or(Error::NoData)?;
        String::from_utf8(bytes.clone()).map_err(|_| Error::InvalidUtf8Data)
    }

    /// Decode the raw content as JSON into `T`
    pub fn decode_content<T: DeserializeOwned>(&self) -> Result<T> {
        let bytes = self.content.as_ref().ok_or(Error::NoData)?;
        serde_json::from_slice(bytes).map_err(|e| Error::InvalidJsonResponse(e.to_string()))
    }

    /// The last assistant message, if the run produced one
    pub fn final_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::message::MessageRole::Assistant)
    }
}

/// Summary of a run, appended to its session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub status: RunStatus,
    pub message_count: usize,
    pub tool_execution_count: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<&Run> for RunSummary {
    fn from(run: &Run) -> Self {
        Self {
            id: run.id,
            status: run.status,
            message_count: run.messages.len(),
            tool_execution_count: run.tool_executions.len(),
            created_at: run.created_at,
            ended_at: run.ended_at,
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text: Option<String> = Option::deserialize(deserializer)?;
        text.map(|t| STANDARD.decode(t).map_err(serde::de::Error::custom))
            .transpose()
    }
}
