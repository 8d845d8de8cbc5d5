//! File-based storage
//!
//! Directory structure:
//! ```text
//! {data_dir}/
//!   sessions/
//!     {session_id}.json          # Session, including messages and run summaries
//!   runs/
//!     {session_id}/
//!       {run_id}.json            # Full run record
//! ```
//!
//! Everything is cached in memory; each mutation rewrites the touched file
//! while the write lock is held so files never regress to an older snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{StoreState, Storage};
use crate::agent::AgentSessionContext;
use crate::message::Message;
use crate::run::{Run, RunSummary};
use crate::session::{Session, SessionStats};
use crate::value::OpaqueValue;
use crate::Result;

/// Storage persisted as JSON files under a data directory
#[derive(Debug)]
pub struct FileStorage {
    base_dir: PathBuf,
    state: RwLock<StoreState>,
}

impl FileStorage {
    /// Open (or lazily create) a store rooted at `data_dir`.
    ///
    /// Existing sessions and runs are loaded eagerly; unreadable files are
    /// skipped with a warning.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = data_dir.as_ref().to_path_buf();
        let mut state = StoreState::default();

        for session in read_json_dir::<Session>(&base_dir.join("sessions")).await? {
            state.sessions.insert(session.id.clone(), session);
        }

        let runs_dir = base_dir.join("runs");
        if tokio::fs::try_exists(&runs_dir).await? {
            let mut entries = tokio::fs::read_dir(&runs_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                for run in read_json_dir::<Run>(&entry.path()).await? {
                    state.runs.insert(run.id, run);
                }
            }
        }

        info!(
            "Opened file storage at {} ({} sessions, {} runs)",
            base_dir.display(),
            state.sessions.len(),
            state.runs.len()
        );

        Ok(Self {
            base_dir,
            state: RwLock::new(state),
        })
    }

    /// Get the directory the store writes into
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.base_dir
            .join("sessions")
            .join(format!("{}.json", session_id))
    }

    fn run_dir(&self, session_id: &str) -> PathBuf {
        self.base_dir.join("runs").join(session_id)
    }

    fn run_path(&self, session_id: &str, run_id: Uuid) -> PathBuf {
        self.run_dir(session_id).join(format!("{}.json", run_id))
    }

    async fn persist_session(&self, session: &Session) -> Result<()> {
        write_json(&self.session_path(&session.id), session).await
    }

    /// Apply `update` to a session and rewrite its file under the write lock
    async fn update_session<F>(&self, session_id: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut Session) + Send,
    {
        let mut state = self.state.write().await;
        let mut updated = state.session_mut(session_id)?.clone();
        update(&mut updated);
        // The cache only changes once the file is written.
        self.persist_session(&updated).await?;
        *state.session_mut(session_id)? = updated;
        Ok(())
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn create_session(&self, context: &AgentSessionContext) -> Result<Session> {
        let mut state = self.state.write().await;
        let session = state.insert_new_session(context)?;
        if let Err(e) = self.persist_session(&session).await {
            state.remove_session(&session.id);
            return Err(e);
        }
        Ok(session)
    }

    async fn load_session(&self, session_id: &str) -> Result<Session> {
        self.state.read().await.session(session_id).cloned()
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.remove_session(session_id).is_none() {
            return Ok(false);
        }

        let path = self.session_path(session_id);
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(&path).await?;
        }
        let runs = self.run_dir(session_id);
        if tokio::fs::try_exists(&runs).await? {
            tokio::fs::remove_dir_all(&runs).await?;
        }
        info!("Deleted session: {}", session_id);
        Ok(true)
    }

    async fn append_messages(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        self.update_session(session_id, |s| s.append_messages(messages.iter().cloned()))
            .await
    }

    async fn append_run(&self, session_id: &str, run: RunSummary) -> Result<()> {
        self.update_session(session_id, |s| s.append_run(run)).await
    }

    async fn update_summary(&self, session_id: &str, summary: Option<String>) -> Result<()> {
        self.update_session(session_id, |s| s.set_summary(summary))
            .await
    }

    async fn merge_session_data(
        &self,
        session_id: &str,
        updates: HashMap<String, OpaqueValue>,
    ) -> Result<()> {
        self.update_session(session_id, |s| s.merge_data(updates))
            .await
    }

    async fn save_run(&self, run: &Run) -> Result<()> {
        let mut state = self.state.write().await;
        state.session(&run.session_id)?;
        write_json(&self.run_path(&run.session_id, run.id), run).await?;
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

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, content).await?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Read every `*.json` file in `dir`; a missing directory yields nothing
async fn read_json_dir<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    if !tokio::fs::try_exists(dir).await? {
        return Ok(items);
    }

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let content = match tokio::fs::read(&path).await {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                continue;
            }
        };

        match serde_json::from_slice::<T>(&content) {
            Ok(item) => items.push(item),
            Err(e) => warn!("Failed to parse {}: {}", path.display(), e),
        }
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use tempfile::TempDir;

    async fn create_test_store() -> (FileStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStorage::open(temp_dir.path()).await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_failed_write_leaves_cache_unchanged() {
        let (store, temp_dir) = create_test_store().await;
        let session = store
            .create_session(&AgentSessionContext::new("agent", "user", "s-1"))
            .await
            .unwrap();

        // A directory in place of the session file makes the rewrite fail.
        let path = temp_dir.path().join("sessions").join("s-1.json");
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let result = store
            .append_messages(&session.id, &[Message::user("lost")])
            .await;
        assert!(result.is_err());

        let cached = store.load_session("s-1").await.unwrap();
        assert!(cached.messages.is_empty());
    }

    #[tokio::test]
    async fn test_create_and_reload_session() {
        let (store, temp_dir) = create_test_store().await;
        let session = store
            .create_session(&AgentSessionContext::new("agent", "user", "s-1"))
            .await
            .unwrap();
        store
            .append_messages(&session.id, &[Message::user("hello")])
            .await
            .unwrap();
        store
            .update_summary(&session.id, Some("greeting".to_string()))
            .await
            .unwrap();

        assert!(temp_dir.path().join("sessions").join("s-1.json").exists());

        let reopened = FileStorage::open(temp_dir.path()).await.unwrap();
        let loaded = reopened.load_session("s-1").await.unwrap();
        assert_eq!(loaded.message_count(), 1);
        assert_eq!(loaded.messages[0].content, "hello");
        assert_eq!(loaded.summary.as_deref(), Some("greeting"));
    }

    #[tokio::test]
    async fn test_save_and_load_run() {
        let (store, temp_dir) = create_test_store().await;
        let session = store
            .create_session(&AgentSessionContext::new("agent", "user", ""))
            .await
            .unwrap();

        let mut run = Run::new("agent", &session.id, "user", "model");
        run.messages.push(Message::user("hi"));
        run.mark_completed(Some(vec![0xFF, 0x00])).unwrap();
        store.save_run(&run).await.unwrap();

        let reopened = FileStorage::open(temp_dir.path()).await.unwrap();
        let loaded = reopened.load_run(run.id).await.unwrap();
        assert_eq!(loaded, run);
        assert_eq!(reopened.list_runs(&session.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_files_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let sessions = temp_dir.path().join("sessions");
        std::fs::create_dir_all(&sessions).unwrap();
        std::fs::write(sessions.join("broken.json"), "{not json").unwrap();
        std::fs::write(sessions.join("notes.txt"), "ignored").unwrap();

        let store = FileStorage::open(temp_dir.path()).await.unwrap();
        assert_eq!(store.get_stats().await.unwrap().total_sessions, 0);
    }

    #[tokio::test]
    async fn test_rejects_path_like_session_ids() {
        let (store, _temp_dir) = create_test_store().await;
        let err = store
            .create_session(&AgentSessionContext::new("agent", "user", "../escape"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_delete_session_removes_files() {
        let (store, temp_dir) = create_test_store().await;
        let session = store
            .create_session(&AgentSessionContext::new("agent", "user", "gone"))
            .await
            .unwrap();
        store
            .save_run(&Run::new("agent", &session.id, "user", "model"))
            .await
            .unwrap();

        assert!(store.delete_session("gone").await.unwrap());
        assert!(!temp_dir.path().join("sessions").join("gone.json").exists());
        assert!(!temp_dir.path().join("runs").join("gone").exists());
        assert!(matches!(
            store.load_session("gone").await,
            Err(Error::SessionNotFound(_))
        ));
    }
}
