//! Error types for plan graphs and the agent state machine
//!
//! ```text
//! GraphError
//! ├── NodeNotFound        - Operation referenced an unknown node
//! ├── DuplicateNode       - add_node with an id already in the plan
//! ├── MissingDependency   - add_edge target does not exist
//! ├── InvalidTransition   - Event not allowed in the current agent status
//! ├── NoCheckpointStore   - Checkpoint operation without a configured store
//! ├── Checkpoint          - Store failures
//! ├── Serialization       - JSON import/export
//! └── Configuration       - Config file loading/parsing
//! ```
//!
//! Structural problems such as cycles or dangling dependencies are *not*
//! errors here: mutations accept them and callers surface them explicitly
//! through [`PlanDag::validate`](crate::PlanDag::validate).

use stepgraph_checkpoint::{AgentStatus, CheckpointError};
use thiserror::Error;

use crate::state_machine::TransitionKind;

/// Result type for stepgraph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised by the plan engine and agent state machine
#[derive(Error, Debug)]
pub enum GraphError {
    /// Node does not exist in the plan
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// A node with this id is already in the plan
    #[error("Node already exists: {0}")]
    DuplicateNode(String),

    /// Edge target is missing from the plan
    #[error("Cannot add edge {from} -> {to}: node '{to}' does not exist")]
    MissingDependency { from: String, to: String },

    /// Event is not permitted from the current agent status
    #[error("Invalid transition: {event} is not allowed in status '{status}'")]
    InvalidTransition {
        event: TransitionKind,
        status: AgentStatus,
    },

    /// Checkpoint operation attempted without a store
    #[error("No checkpoint store configured")]
    NoCheckpointStore,

    /// Checkpoint store failure
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GraphError {
    /// Whether this is a rejected state-machine transition
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, GraphError::InvalidTransition { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message_names_event_and_status() {
        let err = GraphError::InvalidTransition {
            event: TransitionKind::PlanCreated,
            status: AgentStatus::Completed,
        };
        let msg = err.to_string();
        assert!(msg.contains("PLAN_CREATED"));
        assert!(msg.contains("completed"));
        assert!(err.is_invalid_transition());
    }

    #[test]
    fn test_checkpoint_error_converts() {
        let err: GraphError = CheckpointError::NotFound("cp1".to_string()).into();
        assert!(matches!(err, GraphError::Checkpoint(_)));
        assert!(err.to_string().contains("cp1"));
    }
}
