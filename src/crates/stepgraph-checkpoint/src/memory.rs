//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointStore`] keeps every snapshot in a shared
//! `Arc<RwLock<HashMap>>`. Clones share the same storage, which makes it easy
//! to hand one instance to a state machine and inspect it from a test.
//! Nothing survives a process restart.

use crate::error::{CheckpointError, Result};
use crate::state::AgentState;
use crate::store::{resolve_checkpoint_id, CheckpointInfo, CheckpointStore};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Storage entry for in-memory checkpoints
#[derive(Debug, Clone)]
struct CheckpointEntry {
    state: AgentState,
    created_at: i64,
    size_bytes: u64,
    // Insertion sequence; orders checkpoints written within the same millisecond
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, CheckpointEntry>,
    next_seq: u64,
}

/// Thread-safe in-memory checkpoint store
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored checkpoints
    pub async fn checkpoint_count(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Clear all checkpoints (useful for testing)
    pub async fn clear(&self) {
        self.inner.write().await.entries.clear();
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, state: &AgentState, name: Option<&str>) -> Result<String> {
        let id = resolve_checkpoint_id(name)?;

        let mut snapshot = state.clone();
        snapshot.checkpoint_name = name.map(str::to_string);
        let size_bytes = serde_json::to_vec(&snapshot)?.len() as u64;

        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            id.clone(),
            CheckpointEntry {
                state: snapshot,
                created_at: Utc::now().timestamp_millis(),
                size_bytes,
                seq,
            },
        );

        tracing::debug!(checkpoint_id = %id, session_id = %state.session_id, "Stored checkpoint in memory");
        Ok(id)
    }

    async fn load(&self, id: &str) -> Result<AgentState> {
        self.inner
            .read()
            .await
            .entries
            .get(id)
            .map(|entry| entry.state.clone())
            .ok_or_else(|| CheckpointError::NotFound(id.to_string()))
    }

    async fn list(&self, session_id: Option<&str>) -> Result<Vec<CheckpointInfo>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<_> = inner
            .entries
            .iter()
            .filter(|(_, entry)| session_id.map_or(true, |s| entry.state.session_id == s))
            .collect();
        entries.sort_by(|(_, a), (_, b)| b.created_at.cmp(&a.created_at).then(b.seq.cmp(&a.seq)));

        Ok(entries
            .into_iter()
            .map(|(id, entry)| CheckpointInfo::from_state(id.clone(), &entry.state, entry.created_at, entry.size_bytes))
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        match self.inner.write().await.entries.remove(id) {
            Some(_) => Ok(()),
            None => Err(CheckpointError::NotFound(id.to_string())),
        }
    }

    async fn delete_all(&self, session_id: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .entries
            .retain(|_, entry| entry.state.session_id != session_id);
        Ok(())
    }
}
