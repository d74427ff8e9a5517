//! # stepgraph-checkpoint - Durable Agent State
//!
//! **Agent state model and checkpoint store abstractions** used by the
//! stepgraph agent state machine to pause, persist and resume work.
//!
//! ## Core Concepts
//!
//! ### 1. AgentState
//!
//! [`AgentState`] is the whole lifecycle snapshot of one agent session: its
//! [`AgentStatus`], step counter, a [`PlanRef`] projection of the active plan
//! and a bounded [`WorkingMemory`]. It serializes to a flat camelCase JSON
//! object.
//!
//! ### 2. CheckpointStore Trait
//!
//! [`CheckpointStore`] is the persistence seam:
//!
//! - **`save()`** - Persist a snapshot, optionally under a caller-chosen name
//! - **`load()`** - Fetch a snapshot by checkpoint id
//! - **`list()`** - Catalog entries ([`CheckpointInfo`]), newest first
//! - **`delete()`** / **`delete_all()`** - Remove one checkpoint or a whole session
//!
//! ### 3. Backends
//!
//! - [`FileCheckpointStore`] - One `<id>.json` file per checkpoint
//! - [`InMemoryCheckpointStore`] - Process-local map for tests and embedding
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stepgraph_checkpoint::{AgentState, CheckpointStore, FileCheckpointStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = FileCheckpointStore::new(".stepgraph/checkpoints");
//!     let state = AgentState::new("session-1");
//!
//!     let id = store.save(&state, Some("before-deploy")).await?;
//!     let restored = store.load(&id).await?;
//!     assert_eq!(restored.session_id, "session-1");
//!
//!     for info in store.list(Some("session-1")).await? {
//!         println!("{} at step {}", info.id, info.step_index);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod file;
pub mod memory;
pub mod state;
pub mod store;

pub use error::{CheckpointError, Result};
pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;
pub use state::{AgentState, AgentStatus, PlanRef, WorkingMemory, AGENT_STATE_VERSION};
pub use store::{
    generate_checkpoint_id, resolve_checkpoint_id, validate_checkpoint_id, CheckpointInfo,
    CheckpointStore,
};
