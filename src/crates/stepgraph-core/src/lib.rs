//! # stepgraph-core - Plan Graphs and Agent Lifecycle
//!
//! **Execution-planning core for autonomous agents**: a dependency graph of
//! plan steps with deterministic scheduling, and a strict state machine for
//! the agent working through it.
//!
//! ## Core Concepts
//!
//! ### 1. PlanDag
//!
//! [`PlanDag`] holds the [`PlanNode`]s a planner produced. It derives
//! blockers, the ready set and a priority-aware topological order, tracks node
//! outcomes reported by the executor, and derives the plan status from them.
//!
//! - **Scheduling** - [`PlanDag::get_ready_nodes`], [`PlanDag::get_parallel_batch`]
//! - **Outcomes** - `mark_executing` / `mark_completed` / `mark_failed` / `mark_skipped`
//! - **Recovery** - [`PlanDag::retry_node`] within each node's retry budget
//! - **Analysis** - [`PlanDag::validate`], [`PlanDag::get_critical_path`], [`PlanDag::get_progress`]
//!
//! ### 2. AgentStateMachine
//!
//! [`AgentStateMachine`] owns an [`AgentState`](stepgraph_checkpoint::AgentState)
//! and only accepts the [`StateTransition`]s its current status allows.
//! Rejected events leave the state untouched.
//!
//! ### 3. Events
//!
//! Both components publish changes over channel subscriptions
//! ([`Subscription`]); a dropped receiver simply stops receiving.
//!
//! ### 4. Checkpoints
//!
//! With a [`CheckpointStore`](stepgraph_checkpoint::CheckpointStore) attached,
//! the state machine saves and restores snapshots, optionally on its own every
//! few steps.
//!
//! ## Quick Start
//!
//! ```rust
//! use stepgraph_core::{AgentStateMachine, PlanDag, PlanNode, StateMachineConfig, StateTransition};
//! use serde_json::json;
//!
//! let mut plan = PlanDag::new("Answer the question");
//! plan.add_node(PlanNode::new("search", "Search the web").with_tool("search", json!("rust dag"))).unwrap();
//! plan.add_node(PlanNode::new("answer", "Write answer").with_dependencies(["search"])).unwrap();
//!
//! let mut agent = AgentStateMachine::new(StateMachineConfig::new("session-1"));
//! agent.transition(StateTransition::start("What is a DAG?")).unwrap();
//! agent.transition(StateTransition::PlanCreated { plan: plan.plan_ref() }).unwrap();
//!
//! while !plan.is_complete() {
//!     let batch: Vec<String> = plan.get_parallel_batch(5).iter().map(|n| n.id.clone()).collect();
//!     for id in batch {
//!         plan.mark_executing(&id).unwrap();
//!         agent.transition(StateTransition::StepStart { step_id: id.clone() }).unwrap();
//!         plan.mark_completed(&id, json!("ok")).unwrap();
//!         agent.transition(StateTransition::StepComplete { step_id: id, result: json!("ok") }).unwrap();
//!     }
//! }
//!
//! agent.transition(StateTransition::Complete { result: Some(json!("A directed acyclic graph")) }).unwrap();
//! assert_eq!(agent.get_state().step_index, 2);
//! ```

pub mod algo;
pub mod config;
pub mod dag;
pub mod error;
pub mod event;
pub mod graph;
pub mod node;
pub mod state_machine;
pub mod visualization;

pub use algo::CriticalPath;
pub use config::{PlanConfig, RuntimeConfig, StateSettings};
pub use dag::{PlanDag, PlanProgress, PlanStatus, ValidationReport};
pub use error::{GraphError, Result};
pub use event::{EventBus, PlanEvent, PlanEventType, Subscription, SubscriptionId};
pub use graph::GraphStore;
pub use node::{NodeStatus, PlanNode, DEFAULT_MAX_RETRIES};
pub use state_machine::{
    allowed_events, AgentStateMachine, CheckpointErrorHandler, ErrorHandler, StateChange,
    StateMachineConfig, StateTransition, TransitionKind,
};
pub use visualization::{visualize, VisualizationFormat, VisualizationOptions};
