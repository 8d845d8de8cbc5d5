//! Sessions - durable conversation state shared by a sequence of runs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentSessionContext;
use crate::message::Message;
use crate::run::RunSummary;
use crate::value::OpaqueValue;

/// Conversation memory for one (agent, user) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub agent_id: String,
    pub user_id: String,

    /// Conversation memory, in append order
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Runs executed against this session, in append order
    #[serde(default)]
    pub runs: Vec<RunSummary>,

    /// Free-form data shared across runs
    #[serde(default)]
    pub data: HashMap<String, OpaqueValue>,

    /// Rolling summary of compacted history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create an empty session with a fresh id
    pub fn new(agent_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), agent_id, user_id)
    }

    /// Create an empty session with a specific id
    pub fn with_id(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            user_id: user_id.into(),
            messages: Vec::new(),
            runs: Vec::new(),
            data: HashMap::new(),
            summary: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The address of this session
    pub fn context(&self) -> AgentSessionContext {
        AgentSessionContext::new(&self.agent_id, &self.user_id, &self.id)
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    pub fn append_messages(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
        self.touch();
    }

    pub fn append_run(&mut self, run: RunSummary) {
        self.runs.push(run);
        self.touch();
    }

    pub fn set_summary(&mut self, summary: Option<String>) {
        self.summary = summary;
        self.touch();
    }

    /// Insert or replace data entries; keys not mentioned are kept
    pub fn merge_data(&mut self, updates: HashMap<String, OpaqueValue>) {
        self.data.extend(updates);
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Aggregate counters reported by a storage backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub total_runs: usize,
    pub total_messages: usize,
    /// Creation time of the oldest session
    pub earliest: Option<DateTime<Utc>>,
    /// Last update time of the most recently touched session
    pub latest: Option<DateTime<Utc>>,
}

impl SessionStats {
    /// Fold the counters of many sessions together
    pub fn collect<'a>(sessions: impl IntoIterator<Item = &'a Session>) -> Self {
        sessions.into_iter().fold(Self::default(), |mut stats, s| {
            stats.total_sessions += 1;
            stats.total_runs += s.run_count();
            stats.total_messages += s.message_count();
            stats.earliest = Some(stats.earliest.map_or(s.created_at, |e| e.min(s.created_at)));
            stats.latest = Some(stats.latest.map_or(s.updated_at, |l| l.max(s.updated_at)));
            stats
        })
    }
}
