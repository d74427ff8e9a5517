//! Pluggable checkpoint persistence
//!
//! [`CheckpointStore`] is the seam between the agent state machine and
//! durable storage. Two backends ship with this crate:
//!
//! - [`FileCheckpointStore`](crate::FileCheckpointStore) writes one
//!   `<checkpoint-id>.json` file per checkpoint
//! - [`InMemoryCheckpointStore`](crate::InMemoryCheckpointStore) keeps
//!   snapshots in a process-local map
//!
//! # Checkpoint ids
//!
//! When the caller names a checkpoint, the name *is* the id, so
//! `save(state, Some("before-deploy"))` can later be restored with
//! `load("before-deploy")`. Unnamed checkpoints get a generated id of the form
//! `checkpoint-<epoch-millis>-<8 hex chars>`.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use stepgraph_checkpoint::{AgentState, CheckpointInfo, CheckpointStore, Result};
//!
//! struct RedisCheckpointStore { /* ... */ }
//!
//! #[async_trait]
//! impl CheckpointStore for RedisCheckpointStore {
//!     async fn save(&self, state: &AgentState, name: Option<&str>) -> Result<String> {
//!         let id = stepgraph_checkpoint::resolve_checkpoint_id(name)?;
//!         // SET checkpoint:<id> <json>
//!         Ok(id)
//!     }
//!     // load, list, delete, delete_all ...
//! }
//! ```

use crate::error::{CheckpointError, Result};
use crate::state::{AgentState, AgentStatus};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog entry describing a persisted checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointInfo {
    pub id: String,
    pub name: Option<String>,
    pub session_id: String,
    pub task_id: Option<String>,
    pub status: AgentStatus,
    pub step_index: u64,
    /// Epoch milliseconds at which the checkpoint was written
    pub created_at: i64,
    pub size_bytes: u64,
}

impl CheckpointInfo {
    /// Build a catalog entry from a stored snapshot
    pub fn from_state(id: impl Into<String>, state: &AgentState, created_at: i64, size_bytes: u64) -> Self {
        Self {
            id: id.into(),
            name: state.checkpoint_name.clone(),
            session_id: state.session_id.clone(),
            task_id: state.task_id.clone(),
            status: state.status,
            step_index: state.step_index,
            created_at,
            size_bytes,
        }
    }
}

/// Storage backend for agent state checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist `state`, returning the checkpoint id
    ///
    /// The stored snapshot carries `name` in its `checkpoint_name` field.
    async fn save(&self, state: &AgentState, name: Option<&str>) -> Result<String>;

    /// Load a snapshot by id
    async fn load(&self, id: &str) -> Result<AgentState>;

    /// List checkpoints, newest first, optionally scoped to a session
    async fn list(&self, session_id: Option<&str>) -> Result<Vec<CheckpointInfo>>;

    /// Delete a single checkpoint
    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete every checkpoint belonging to `session_id`
    async fn delete_all(&self, session_id: &str) -> Result<()> {
        for info in self.list(Some(session_id)).await? {
            self.delete(&info.id).await?;
        }
        Ok(())
    }
}

/// Resolve the id a checkpoint will be stored under
///
/// Names are used verbatim after validation; `None` generates a fresh id.
pub fn resolve_checkpoint_id(name: Option<&str>) -> Result<String> {
    match name {
        Some(name) => {
            validate_checkpoint_id(name)?;
            Ok(name.to_string())
        }
        None => Ok(generate_checkpoint_id()),
    }
}

/// Generate an id for an unnamed checkpoint
pub fn generate_checkpoint_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("checkpoint-{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
}

/// Reject ids that cannot be used as a single file name
pub fn validate_checkpoint_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(CheckpointError::Invalid("checkpoint id must not be empty".to_string()));
    }
    if id.contains('/') || id.contains('\\') || id.contains("..") || id.contains('\0') {
        return Err(CheckpointError::Invalid(format!(
            "checkpoint id '{}' contains path characters",
            id
        )));
    }
    Ok(())
}

/// Sort catalog entries newest first, breaking ties by id for stable output
pub(crate) fn sort_newest_first(infos: &mut [CheckpointInfo]) {
    infos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_checkpoint_uses_name() {
        assert_eq!(resolve_checkpoint_id(Some("cp1")).unwrap(), "cp1");
    }

    #[test]
    fn test_generated_checkpoint_id_shape() {
        let id = resolve_checkpoint_id(None).unwrap();
        assert!(id.starts_with("checkpoint-"));
        assert_ne!(id, generate_checkpoint_id());
        assert!(validate_checkpoint_id(&id).is_ok());
    }

    #[test]
    fn test_rejects_path_like_names() {
        assert!(matches!(
            resolve_checkpoint_id(Some("../etc/passwd")),
            Err(CheckpointError::Invalid(_))
        ));
        assert!(resolve_checkpoint_id(Some("a/b")).is_err());
        assert!(resolve_checkpoint_id(Some("  ")).is_err());
    }

    #[test]
    fn test_sort_newest_first() {
        let state = AgentState::new("s");
        let mut infos = vec![
            CheckpointInfo::from_state("old", &state, 10, 0),
            CheckpointInfo::from_state("new", &state, 30, 0),
            CheckpointInfo::from_state("mid", &state, 20, 0),
        ];
        sort_newest_first(&mut infos);
        let ids: Vec<_> = infos.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }
}
