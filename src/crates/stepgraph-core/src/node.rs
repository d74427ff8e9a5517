//! Plan node definitions
//!
//! A [`PlanNode`] is one unit of work handed to the external executor. The
//! planner fills in the declared fields (`id`, `description`, `tool`, `args`,
//! `depends_on`, `priority`, `parallel`, `estimated_duration_ms`); the engine
//! owns everything else.
//!
//! `dependents` and `blocked_by` are derived. They are recomputed from
//! `depends_on` after every graph mutation, so edits made to them directly are
//! overwritten.
//!
//! ```rust
//! use stepgraph_core::{NodeStatus, PlanNode};
//! use serde_json::json;
//!
//! let node = PlanNode::new("fetch", "Download the dataset")
//!     .with_tool("http_get", json!({"url": "https://example.com/data.csv"}))
//!     .with_dependencies(["auth"])
//!     .with_priority(-1)
//!     .with_estimated_duration(1_500);
//!
//! assert_eq!(node.status, NodeStatus::Pending);
//! assert_eq!(node.depends_on, vec!["auth".to_string()]);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Default retry budget for a node
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Node execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Waiting on dependencies
    #[default]
    Pending,
    /// Dependencies satisfied, can be dispatched
    Ready,
    /// Dispatched to the executor
    Executing,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Deliberately not run
    Skipped,
    /// Withdrawn by plan cancellation
    Cancelled,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, failed, skipped or cancelled
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Terminal states that unblock dependents
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_parallel() -> bool {
    true
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// A single step in a plan graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanNode {
    /// Unique node identifier
    pub id: String,

    pub description: String,

    /// Tool the executor should invoke
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// Opaque arguments forwarded to the executor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,

    /// Declared dependencies, in declaration order
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Nodes that list this node in `depends_on` (derived)
    #[serde(default)]
    pub dependents: Vec<String>,

    /// Dependencies not yet completed or skipped (derived)
    #[serde(default)]
    pub blocked_by: Vec<String>,

    #[serde(default)]
    pub status: NodeStatus,

    /// Scheduling priority, lower runs first
    #[serde(default)]
    pub priority: i64,

    /// Whether this node may be batched with others
    #[serde(default = "default_parallel")]
    pub parallel: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_duration_ms: Option<u64>,

    /// Epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,

    /// Epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl PlanNode {
    /// Create a pending node with no dependencies
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            tool: None,
            args: None,
            depends_on: Vec::new(),
            dependents: Vec::new(),
            blocked_by: Vec::new(),
            status: NodeStatus::Pending,
            priority: 0,
            parallel: true,
            estimated_duration_ms: None,
            actual_duration_ms: None,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Attach a tool invocation
    ///
    /// Non-object `args` are wrapped as `{"input": args}`.
    pub fn with_tool(mut self, tool: impl Into<String>, args: Value) -> Self {
        self.tool = Some(tool.into());
        self.args = match args {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                Some(map)
            }
        };
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Exclude this node from parallel batches
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub fn with_estimated_duration(mut self, ms: u64) -> Self {
        self.estimated_duration_ms = Some(ms);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Clear execution bookkeeping, keeping the declared fields
    pub(crate) fn clear_run_state(&mut self) {
        self.started_at = None;
        self.completed_at = None;
        self.actual_duration_ms = None;
        self.result = None;
        self.error = None;
    }
}
