//! Storage for sessions and runs
//!
//! The runtime only talks to the [`Storage`] trait. Every session mutation is a
//! read-modify-write done under the store's own lock, so two invocations that
//! touch the same session append to it rather than overwrite each other.

mod file_store;
mod memory_store;

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::agent::AgentSessionContext;
use crate::message::Message;
use crate::run::{Run, RunSummary};
use crate::session::{Session, SessionStats};
use crate::value::OpaqueValue;
use crate::{Error, Result};

pub use file_store::FileStorage;
pub use memory_store::MemoryStorage;

/// Persistence interface for sessions and runs
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create an empty session.
    ///
    /// Uses `context.session_id` when it is non-empty, otherwise generates an id.
    async fn create_session(&self, context: &AgentSessionContext) -> Result<Session>;

    /// Load a session, failing with `SessionNotFound`
    async fn load_session(&self, session_id: &str) -> Result<Session>;

    /// Delete a session and its runs
    async fn delete_session(&self, session_id: &str) -> Result<bool>;

    /// Append messages to the session's conversation memory
    async fn append_messages(&self, session_id: &str, messages: &[Message]) -> Result<()>;

    /// Append a run summary to the session
    async fn append_run(&self, session_id: &str, run: RunSummary) -> Result<()>;

    /// Replace the session's rolling summary
    async fn update_summary(&self, session_id: &str, summary: Option<String>) -> Result<()>;

    /// Merge entries into the session's data map
    async fn merge_session_data(
        &self,
        session_id: &str,
        updates: HashMap<String, OpaqueValue>,
    ) -> Result<()>;

    /// Save a run record
    async fn save_run(&self, run: &Run) -> Result<()>;

    /// Load a run, failing with `RunNotFound`
    async fn load_run(&self, run_id: Uuid) -> Result<Run>;

    /// All runs saved for a session, oldest first
    async fn list_runs(&self, session_id: &str) -> Result<Vec<Run>>;

    /// Aggregate counters over every stored session
    async fn get_stats(&self) -> Result<SessionStats>;
}

/// In-memory tables shared by the storage implementations
#[derive(Debug, Default)]
struct StoreState {
    sessions: HashMap<String, Session>,
    runs: HashMap<Uuid, Run>,
}

impl StoreState {
    fn insert_new_session(&mut self, context: &AgentSessionContext) -> Result<Session> {
        let session = if context.session_id.is_empty() {
            Session::new(&context.agent_id, &context.user_id)
        } else {
            validate_id(&context.session_id)?;
            Session::with_id(&context.session_id, &context.agent_id, &context.user_id)
        };

        if self.sessions.contains_key(&session.id) {
            return Err(Error::InvalidInput(format!(
                "Session with ID {} already exists",
                session.id
            )));
        }
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    fn session(&self, session_id: &str) -> Result<&Session> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    fn session_mut(&mut self, session_id: &str) -> Result<&mut Session> {
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    fn remove_session(&mut self, session_id: &str) -> Option<Session> {
        let removed = self.sessions.remove(session_id);
        if removed.is_some() {
            self.runs.retain(|_, run| run.session_id != session_id);
        }
        removed
    }

    fn runs_for(&self, session_id: &str) -> Vec<Run> {
        let mut runs: Vec<Run> = self
            .runs
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        runs
    }

    fn run(&self, run_id: Uuid) -> Result<Run> {
        self.runs
            .get(&run_id)
            .cloned()
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))
    }
}

/// Session ids double as file names in the file store
fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\'])
        && !id.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("Invalid session id: {:?}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("session-1").is_ok());
        assert!(validate_id("../etc").is_err());
        assert!(validate_id("..").is_err());
        assert!(validate_id("").is_err());
    }

    #[test]
    fn test_create_session_rejects_duplicate() {
        let mut state = StoreState::default();
        let ctx = AgentSessionContext::new("agent", "user", "fixed");
        state.insert_new_session(&ctx).unwrap();
        assert!(matches!(
            state.insert_new_session(&ctx),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_create_session_generates_id() {
        let mut state = StoreState::default();
        let ctx = AgentSessionContext::new("agent", "user", "");
        let session = state.insert_new_session(&ctx).unwrap();
        assert!(Uuid::parse_str(&session.id).is_ok());
    }
}
