//! Runtime configuration
//!
//! ```toml
//! [plan]
//! max_parallel = 5
//!
//! [state]
//! max_working_memory_size = 100
//! checkpoint_interval = 5
//! auto_checkpoint = false
//! include_conversation_history = false
//! checkpoint_dir = ".stepgraph/checkpoints"
//! ```
//!
//! Every field is optional; missing sections and keys fall back to the
//! defaults shown above (`checkpoint_dir` defaults to none).

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub plan: PlanConfig,

    #[serde(default)]
    pub state: StateSettings,
}

/// Plan engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Upper bound for `next_parallel_batch`
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
        }
    }
}

/// Agent state machine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSettings {
    /// Working memory capacity; 0 disables eviction
    #[serde(default = "default_max_working_memory_size")]
    pub max_working_memory_size: usize,

    /// Auto-checkpoint every N steps
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,

    #[serde(default)]
    pub auto_checkpoint: bool,

    #[serde(default)]
    pub include_conversation_history: bool,

    /// Directory for file-backed checkpoints
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            max_working_memory_size: default_max_working_memory_size(),
            checkpoint_interval: default_checkpoint_interval(),
            auto_checkpoint: false,
            include_conversation_history: false,
            checkpoint_dir: None,
        }
    }
}

fn default_max_parallel() -> usize {
    5
}

fn default_max_working_memory_size() -> usize {
    100
}

fn default_checkpoint_interval() -> u64 {
    5
}

impl RuntimeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| GraphError::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from a TOML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            GraphError::Configuration(format!(
                "Failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;

        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent
    ///
    /// A file that exists but does not parse is still an error.
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !fs::try_exists(path).await.unwrap_or(false) {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.plan.max_parallel, 5);
        assert_eq!(config.state.max_working_memory_size, 100);
        assert_eq!(config.state.checkpoint_interval, 5);
        assert!(!config.state.auto_checkpoint);
        assert!(config.state.checkpoint_dir.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [state]
            auto_checkpoint = true
            checkpoint_dir = "/tmp/cp"
            "#,
        )
        .unwrap();
        assert!(config.state.auto_checkpoint);
        assert_eq!(config.state.checkpoint_dir, Some(PathBuf::from("/tmp/cp")));
        assert_eq!(config.state.checkpoint_interval, 5);
        assert_eq!(config.plan.max_parallel, 5);
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let err = RuntimeConfig::from_toml_str("[plan]\nmax_parallel = \"many\"").unwrap_err();
        assert!(matches!(err, GraphError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stepgraph.toml");
        tokio::fs::write(&path, "[plan]\nmax_parallel = 2\n").await.unwrap();

        let config = RuntimeConfig::load(&path).await.unwrap();
        assert_eq!(config.plan.max_parallel, 2);
    }

    #[tokio::test]
    async fn test_load_or_default_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = RuntimeConfig::load_or_default(dir.path().join("absent.toml"))
            .await
            .unwrap();
        assert_eq!(config, RuntimeConfig::default());

        assert!(RuntimeConfig::load(dir.path().join("absent.toml")).await.is_err());
    }
}
