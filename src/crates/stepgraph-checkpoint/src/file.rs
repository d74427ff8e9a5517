//! File-backed checkpoint storage
//!
//! Each checkpoint lives in its own file, `<dir>/<checkpoint-id>.json`,
//! holding the pretty-printed [`AgentState`] JSON with `checkpointName` filled
//! in. Files are written to a temporary sibling first and renamed into place
//! so a crashed write never leaves a truncated checkpoint behind.
//!
//! Catalog metadata comes from the filesystem: `created_at` is the file
//! modification time and `size_bytes` its length.

use crate::error::{CheckpointError, Result};
use crate::state::AgentState;
use crate::store::{resolve_checkpoint_id, sort_newest_first, validate_checkpoint_id, CheckpointInfo, CheckpointStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

const EXTENSION: &str = "json";

/// Checkpoint store writing one JSON file per checkpoint
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at `dir`; the directory is created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing checkpoint `id`
    pub fn checkpoint_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, EXTENSION))
    }

    async fn read_info(&self, path: &Path) -> Option<CheckpointInfo> {
        let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
            return None;
        };

        // The file may vanish or become unreadable between read_dir and here
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint file");
                return None;
            }
        };
        let state: AgentState = match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint file");
                return None;
            }
        };

        let metadata = match fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping checkpoint file without metadata");
                return None;
            }
        };
        let created_at = metadata
            .modified()
            .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
            .unwrap_or(state.updated_at);

        Some(CheckpointInfo::from_state(id, &state, created_at, metadata.len()))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, state: &AgentState, name: Option<&str>) -> Result<String> {
        let id = resolve_checkpoint_id(name)?;

        let mut snapshot = state.clone();
        snapshot.checkpoint_name = name.map(str::to_string);
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        fs::create_dir_all(&self.dir).await?;
        let path = self.checkpoint_path(&id);
        let tmp = path.with_extension(format!("{}.tmp", EXTENSION));
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;

        debug!(checkpoint_id = %id, path = %path.display(), bytes = bytes.len(), "Wrote checkpoint file");
        Ok(id)
    }

    async fn load(&self, id: &str) -> Result<AgentState> {
        validate_checkpoint_id(id)?;
        let path = self.checkpoint_path(id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn list(&self, session_id: Option<&str>) -> Result<Vec<CheckpointInfo>> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut infos = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(info) = self.read_info(&path).await {
                if session_id.map_or(true, |s| info.session_id == s) {
                    infos.push(info);
                }
            }
        }

        sort_newest_first(&mut infos);
        Ok(infos)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        validate_checkpoint_id(id)?;
        match fs::remove_file(self.checkpoint_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(CheckpointError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
