//! In-memory storage, for tests and embedded use

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{StoreState, Storage};
use crate::agent::AgentSessionContext;
use crate::message::Message;
use crate::run::{Run, RunSummary};
use crate::session::{Session, SessionStats};
use crate::value::OpaqueValue;
use crate::{Error, Result};

/// Storage that keeps everything in process memory
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: RwLock<StoreState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_session(&self, context: &AgentSessionContext) -> Result<Session> {
        self.state.write().await.insert_new_session(context)
    }

    async fn load_session(&self, session_id: &str) -> Result<Session> {
        self.state.read().await.session(session_id).cloned()
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool> {
        Ok(self.state.write().await.remove_session(session_id).is_some())
    }

    async fn append_messages(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .session_mut(session_id)?
            .append_messages(messages.iter().cloned());
        Ok(())
    }

    async fn append_run(&self, session_id: &str, run: RunSummary) -> Result<()> {
        let mut state = self.state.write().await;
        state.session_mut(session_id)?.append_run(run);
        Ok(())
    }

    async fn update_summary(&self, session_id: &str, summary: Option<String>) -> Result<()> {
        let mut state = self.state.write().await;
        state.session_mut(session_id)?.set_summary(summary);
        Ok(())
    }

    async fn merge_session_data(
        &self,
        session_id: &str,
        updates: HashMap<String, OpaqueValue>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.session_mut(session_id)?.merge_data(updates);
        Ok(())
    }

    async fn save_run(&self, run: &Run) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.sessions.contains_key(&run.session_id) {
            return Err(Error::SessionNotFound(run.session_id.clone()));
        }
        state.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Run> {
        self.state.read().await.run(run_id)
    }

    async fn list_runs(&self, session_id: &str) -> Result<Vec<Run>> {
        let state = self.state.read().await;
        state.session(session_id)?;
        Ok(state.runs_for(session_id))
    }

    async fn get_stats(&self) -> Result<SessionStats> {
        let state = self.state.read().await;
        Ok(SessionStats::collect(state.sessions.values()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn store_with_session() -> (MemoryStorage, Session) {
        let store = MemoryStorage::new();
        let session = store
            .create_session(&AgentSessionContext::new("agent", "user", ""))
            .await
            .unwrap();
        (store, session)
    }

    #[tokio::test]
    async fn test_load_missing_session() {
        let store = MemoryStorage::new();
        let err = store.load_session("nope").await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_append_messages_and_runs() {
        let (store, session) = store_with_session().await;

        store
            .append_messages(&session.id, &[Message::user("a"), Message::assistant("b")])
            .await
            .unwrap();

        let mut run = Run::new("agent", &session.id, "user", "model");
        run.mark_completed(None).unwrap();
        store.save_run(&run).await.unwrap();
        store.append_run(&session.id, RunSummary::from(&run)).await.unwrap();

        let loaded = store.load_session(&session.id).await.unwrap();
        assert_eq!(loaded.message_count(), 2);
        assert_eq!(loaded.run_count(), 1);
        assert_eq!(store.load_run(run.id).await.unwrap(), run);
        assert_eq!(store.list_runs(&session.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_run_requires_session() {
        let store = MemoryStorage::new();
        let run = Run::new("agent", "ghost", "user", "model");
        assert!(matches!(
            store.save_run(&run).await,
            Err(Error::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let (store, session) = store_with_session().await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            let id = session.id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_messages(&id, &[Message::user(format!("m{}", i))])
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.load_session(&session.id).await.unwrap().message_count(), 20);
    }

    #[tokio::test]
    async fn test_delete_session_removes_runs() {
        let (store, session) = store_with_session().await;
        let run = Run::new("agent", &session.id, "user", "model");
        store.save_run(&run).await.unwrap();

        assert!(store.delete_session(&session.id).await.unwrap());
        assert!(!store.delete_session(&session.id).await.unwrap());
        assert!(matches!(store.load_run(run.id).await, Err(Error::RunNotFound(_))));
    }

    #[tokio::test]
    async fn test_stats() {
        let (store, session) = store_with_session().await;
        store
            .append_messages(&session.id, &[Message::user("a")])
            .await
            .unwrap();
        store
            .append_run(&session.id, RunSummary::from(&Run::new("agent", &session.id, "user", "m")))
            .await
            .unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.total_runs, 1);
        assert_eq!(stats.total_messages, 1);
        assert!(stats.earliest.is_some());
    }
}
