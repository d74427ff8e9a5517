//! Plan DAG engine
//!
//! [`PlanDag`] owns a plan's nodes and drives them through their lifecycle.
//! The planner adds nodes and edges; the executor pulls ready nodes, reports
//! outcomes through the `mark_*` methods, and the engine keeps derived state
//! (blockers, ready set, execution order, plan status) consistent after every
//! call.
//!
//! # Plan status
//!
//! After any node-status change the plan status is re-derived, first match
//! wins:
//!
//! 1. some node is `executing` → `executing`
//! 2. some node `failed` and none `pending`/`ready` → `failed`
//! 3. every node terminal → `completed`
//! 4. otherwise unchanged
//!
//! A `cancelled` plan never re-derives. Pausing only changes the plan-level
//! status, so the next node outcome re-derives it like any other.
//!
//! # Example
//!
//! ```rust
//! use stepgraph_core::{PlanDag, PlanNode, PlanStatus};
//! use serde_json::json;
//!
//! let mut plan = PlanDag::new("Publish report");
//! plan.add_node(PlanNode::new("fetch", "Fetch data")).unwrap();
//! plan.add_node(PlanNode::new("render", "Render").with_dependencies(["fetch"])).unwrap();
//!
//! let batch: Vec<String> = plan.get_parallel_batch(5).iter().map(|n| n.id.clone()).collect();
//! assert_eq!(batch, vec!["fetch"]);
//!
//! plan.mark_executing("fetch").unwrap();
//! plan.mark_completed("fetch", json!({"rows": 42})).unwrap();
//! plan.mark_executing("render").unwrap();
//! plan.mark_completed("render", json!("ok")).unwrap();
//!
//! assert_eq!(plan.status(), PlanStatus::Completed);
//! ```

use crate::algo::{self, CriticalPath};
use crate::config::PlanConfig;
use crate::error::{GraphError, Result};
use crate::event::{EventBus, PlanEvent, PlanEventType, Subscription, SubscriptionId};
use crate::graph::GraphStore;
use crate::node::{NodeStatus, PlanNode};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt;
use stepgraph_checkpoint::PlanRef;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Plan-level status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    /// Created, no nodes yet
    #[default]
    Draft,
    Pending,
    Executing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, failed or cancelled
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregate progress of a plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanProgress {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub executing: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    /// `(completed + skipped) / total`, rounded, 0 for an empty plan
    pub percentage: u32,
    /// Sum of estimates over non-terminal nodes
    pub estimated_remaining_ms: u64,
}

/// Outcome of [`PlanDag::validate`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Wire form of a plan: nodes as ordered `[id, node]` pairs
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanDagData {
    id: String,
    goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reasoning: Option<String>,
    nodes: Vec<(String, PlanNode)>,
    #[serde(default)]
    execution_order: Vec<String>,
    #[serde(default)]
    status: PlanStatus,
    #[serde(default)]
    version: u64,
    created_at: i64,
    updated_at: i64,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A plan graph and its execution state
#[derive(Debug)]
pub struct PlanDag {
    id: String,
    goal: String,
    reasoning: Option<String>,
    graph: GraphStore,
    execution_order: Vec<String>,
    status: PlanStatus,
    version: u64,
    created_at: i64,
    updated_at: i64,
    config: PlanConfig,
    events: EventBus<PlanEvent>,
}

impl PlanDag {
    /// Create an empty plan with a random id
    pub fn new(goal: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), goal)
    }

    pub fn with_id(id: impl Into<String>, goal: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            goal: goal.into(),
            reasoning: None,
            graph: GraphStore::new(),
            execution_order: Vec::new(),
            status: PlanStatus::Draft,
            version: 0,
            created_at: now,
            updated_at: now,
            config: PlanConfig::default(),
            events: EventBus::new(),
        }
    }

    pub fn with_config(mut self, config: PlanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.reasoning.as_deref()
    }

    pub fn status(&self) -> PlanStatus {
        self.status
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    pub fn config(&self) -> &PlanConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn get_node(&self, id: &str) -> Option<&PlanNode> {
        self.graph.get(id)
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &PlanNode> {
        self.graph.iter()
    }

    pub fn get_nodes_by_status(&self, status: NodeStatus) -> Vec<&PlanNode> {
        self.graph.iter().filter(|n| n.status == status).collect()
    }

    /// Cached topological order
    pub fn get_execution_order(&self) -> &[String] {
        &self.execution_order
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_finished()
    }

    /// Projection handed to the agent state machine on `PLAN_CREATED`
    ///
    /// Skipped nodes count as completed steps.
    pub fn plan_ref(&self) -> PlanRef {
        let mut plan = PlanRef::new(self.id.clone(), self.goal.clone(), self.graph.len());
        plan.completed_steps = self
            .graph
            .iter()
            .filter(|n| n.status.satisfies_dependents())
            .count();
        plan.current_step_id = self
            .graph
            .iter()
            .find(|n| n.status == NodeStatus::Executing)
            .map(|n| n.id.clone());
        plan
    }

    // ---------------------------------------------------------------------
    // Structure
    // ---------------------------------------------------------------------

    /// Add a node; ids must be unique
    pub fn add_node(&mut self, node: PlanNode) -> Result<()> {
        let node_id = node.id.clone();
        self.graph.insert(node)?;
        self.on_structure_changed();
        if self.status == PlanStatus::Draft {
            self.status = PlanStatus::Pending;
        }
        self.update_ready_nodes();
        self.touch();
        debug!(plan_id = %self.id, node_id = %node_id, "Node added");
        Ok(())
    }

    /// Add several nodes, stopping at the first failure
    pub fn add_nodes(&mut self, nodes: impl IntoIterator<Item = PlanNode>) -> Result<()> {
        for node in nodes {
            self.add_node(node)?;
        }
        Ok(())
    }

    /// Make `to` depend on `from`
    ///
    /// Fails if `to` does not exist. Adding an existing edge is a no-op.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<()> {
        if !self.graph.add_dependency(from, to)? {
            return Ok(());
        }
        self.on_structure_changed();
        self.update_ready_nodes();
        self.touch();
        debug!(plan_id = %self.id, from = %from, to = %to, "Edge added");
        Ok(())
    }

    /// Remove a node and every reference to it
    pub fn remove_node(&mut self, id: &str) -> Result<PlanNode> {
        let removed = self
            .graph
            .remove(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        self.on_structure_changed();
        self.update_ready_nodes();
        self.touch();
        debug!(plan_id = %self.id, node_id = %id, "Node removed");
        Ok(removed)
    }

    // ---------------------------------------------------------------------
    // Node lifecycle
    // ---------------------------------------------------------------------

    pub fn mark_executing(&mut self, id: &str) -> Result<()> {
        let now = now_millis();
        let node = self.node_mut(id)?;
        node.status = NodeStatus::Executing;
        node.started_at = Some(now);
        node.completed_at = None;
        node.actual_duration_ms = None;

        debug!(plan_id = %self.id, node_id = %id, "Node executing");
        self.emit(PlanEventType::NodeStarted, Some(id), None);
        self.after_status_change();
        Ok(())
    }

    pub fn mark_completed(&mut self, id: &str, result: Value) -> Result<()> {
        let now = now_millis();
        let node = self.node_mut(id)?;
        node.status = NodeStatus::Completed;
        node.completed_at = Some(now);
        node.actual_duration_ms = node.started_at.map(|start| (now - start).max(0) as u64);
        node.result = Some(result.clone());
        node.error = None;
        let duration = node.actual_duration_ms;

        debug!(plan_id = %self.id, node_id = %id, duration_ms = ?duration, "Node completed");
        self.emit(
            PlanEventType::NodeCompleted,
            Some(id),
            Some(json!({ "result": result, "durationMs": duration })),
        );
        self.after_status_change();
        Ok(())
    }

    pub fn mark_failed(&mut self, id: &str, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        let now = now_millis();
        let node = self.node_mut(id)?;
        node.status = NodeStatus::Failed;
        node.completed_at = Some(now);
        node.actual_duration_ms = node.started_at.map(|start| (now - start).max(0) as u64);
        node.result = None;
        node.error = Some(error.clone());
        let (retry_count, max_retries) = (node.retry_count, node.max_retries);

        warn!(plan_id = %self.id, node_id = %id, error = %error, "Node failed");
        self.emit(
            PlanEventType::NodeFailed,
            Some(id),
            Some(json!({
                "error": error,
                "retryCount": retry_count,
                "maxRetries": max_retries,
            })),
        );
        self.after_status_change();
        Ok(())
    }

    /// Skip a node and, transitively, everything depending on it
    ///
    /// Dependents are skipped with the reason `"Dependency <id> was skipped"`,
    /// naming the node whose skip reached them. Nodes that are already
    /// terminal are skipped again.
    pub fn mark_skipped(&mut self, id: &str, reason: impl Into<String>) -> Result<()> {
        let origin = self
            .graph
            .index_of(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;

        let now = now_millis();
        let mut visited: HashSet<usize> = HashSet::new();
        let mut stack: Vec<(usize, String)> = vec![(origin, reason.into())];

        while let Some((i, reason)) = stack.pop() {
            if !visited.insert(i) {
                continue;
            }

            let node = self.graph.node_at_mut(i);
            node.status = NodeStatus::Skipped;
            node.completed_at = Some(now);
            node.error = None;
            node.result = Some(json!({ "skipped": true, "reason": reason }));
            let node_id = node.id.clone();

            debug!(plan_id = %self.id, node_id = %node_id, reason = %reason, "Node skipped");
            self.emit(
                PlanEventType::NodeSkipped,
                Some(&node_id),
                Some(json!({ "reason": reason })),
            );

            // Reverse so the first dependent is handled first
            for &dependent in self.graph.dependents_of(i).iter().rev() {
                stack.push((dependent, format!("Dependency {} was skipped", node_id)));
            }
        }

        self.after_status_change();
        Ok(())
    }

    /// Put a failed node back in the ready set
    ///
    /// Returns `Ok(false)` when the node is not failed or its retry budget is
    /// spent; the node is left untouched in both cases.
    pub fn retry_node(&mut self, id: &str) -> Result<bool> {
        let node = self.node_mut(id)?;
        if node.status != NodeStatus::Failed {
            return Ok(false);
        }
        if node.retry_count >= node.max_retries {
            let (retry_count, max_retries) = (node.retry_count, node.max_retries);
            debug!(
                plan_id = %self.id,
                node_id = %id,
                retry_count,
                max_retries,
                "Retry budget exhausted"
            );
            return Ok(false);
        }

        node.retry_count += 1;
        node.clear_run_state();
        node.status = NodeStatus::Ready;
        let (retry_count, max_retries) = (node.retry_count, node.max_retries);

        info!(plan_id = %self.id, node_id = %id, retry_count, max_retries, "Retrying node");
        self.emit(
            PlanEventType::NodeRetrying,
            Some(id),
            Some(json!({ "retryCount": retry_count, "maxRetries": max_retries })),
        );

        self.graph.refresh_blocked_by();
        if self.status == PlanStatus::Failed {
            self.status = PlanStatus::Executing;
        }
        self.touch();
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Scheduling
    // ---------------------------------------------------------------------

    /// Dispatchable nodes, ascending priority
    ///
    /// Empty while the plan is paused or cancelled.
    pub fn get_ready_nodes(&self) -> Vec<&PlanNode> {
        if matches!(self.status, PlanStatus::Paused | PlanStatus::Cancelled) {
            return Vec::new();
        }
        algo::ready_indices(&self.graph)
            .into_iter()
            .map(|i| self.graph.node_at(i))
            .collect()
    }

    /// Up to `max` ready nodes that allow parallel execution
    ///
    /// Statuses are not changed; call [`mark_executing`](Self::mark_executing)
    /// for each node actually dispatched. Sequential nodes are only returned
    /// by [`get_ready_nodes`](Self::get_ready_nodes).
    pub fn get_parallel_batch(&self, max: usize) -> Vec<&PlanNode> {
        self.get_ready_nodes()
            .into_iter()
            .filter(|n| n.parallel)
            .take(max)
            .collect()
    }

    /// Parallel batch sized by the configured `max_parallel`
    pub fn next_parallel_batch(&self) -> Vec<&PlanNode> {
        self.get_parallel_batch(self.config.max_parallel)
    }

    pub fn get_critical_path(&self) -> CriticalPath {
        algo::critical_path(&self.graph)
    }

    pub fn get_progress(&self) -> PlanProgress {
        let mut progress = PlanProgress {
            total: self.graph.len(),
            ..Default::default()
        };

        for node in self.graph.iter() {
            match node.status {
                NodeStatus::Pending => progress.pending += 1,
                NodeStatus::Ready => progress.ready += 1,
                NodeStatus::Executing => progress.executing += 1,
                NodeStatus::Completed => progress.completed += 1,
                NodeStatus::Failed => progress.failed += 1,
                NodeStatus::Skipped => progress.skipped += 1,
                NodeStatus::Cancelled => progress.cancelled += 1,
            }
            if !node.is_terminal() {
                progress.estimated_remaining_ms = progress
                    .estimated_remaining_ms
                    .saturating_add(node.estimated_duration_ms.unwrap_or(0));
            }
        }

        if progress.total > 0 {
            let done = (progress.completed + progress.skipped) as f64;
            progress.percentage = (done / progress.total as f64 * 100.0).round() as u32;
        }
        progress
    }

    // ---------------------------------------------------------------------
    // Validation
    // ---------------------------------------------------------------------

    pub fn has_cycle(&self) -> bool {
        algo::has_cycle(&self.graph)
    }

    /// Check for cycles, dangling dependencies and an incomplete order
    pub fn validate(&self) -> ValidationReport {
        let mut errors = Vec::new();

        if let Some(cycle) = algo::find_cycle(&self.graph) {
            errors.push(format!("Cycle detected: {}", cycle.join(" -> ")));
        }

        for i in 0..self.graph.len() {
            let node = self.graph.node_at(i);
            for missing in self.graph.dangling_dependencies_of(i) {
                errors.push(format!(
                    "Node '{}' depends on missing node '{}'",
                    node.id, missing
                ));
            }
        }

        if self.execution_order.len() != self.graph.len() {
            errors.push(format!(
                "Execution order covers {} of {} nodes",
                self.execution_order.len(),
                self.graph.len()
            ));
        }

        ValidationReport {
            valid: errors.is_empty(),
            errors,
        }
    }

    // ---------------------------------------------------------------------
    // Plan lifecycle
    // ---------------------------------------------------------------------

    /// Return every node to `pending` and the plan to `pending`
    ///
    /// Retry counters and execution results are cleared.
    pub fn reset(&mut self) {
        for node in self.graph.iter_mut() {
            node.status = NodeStatus::Pending;
            node.retry_count = 0;
            node.clear_run_state();
        }
        self.graph.refresh_blocked_by();
        self.status = PlanStatus::Pending;
        self.touch();
        info!(plan_id = %self.id, "Plan reset");
    }

    /// Pause dispatching; finished plans are left alone
    pub fn pause(&mut self) {
        if self.status.is_finished() || self.status == PlanStatus::Paused {
            debug!(plan_id = %self.id, status = %self.status, "Pause ignored");
            return;
        }
        self.status = PlanStatus::Paused;
        self.touch();
        info!(plan_id = %self.id, "Plan paused");
        self.emit(PlanEventType::PlanPaused, None, None);
    }

    pub fn resume(&mut self) {
        if self.status != PlanStatus::Paused {
            debug!(plan_id = %self.id, status = %self.status, "Resume ignored");
            return;
        }
        self.status = PlanStatus::Executing;
        self.derive_status();
        self.touch();
        info!(plan_id = %self.id, "Plan resumed");
    }

    /// Cancel the plan
    ///
    /// Pending and ready nodes become `cancelled`; executing nodes are left to
    /// finish. A cancelled plan keeps its status whatever happens afterwards.
    pub fn cancel(&mut self) {
        if self.status.is_finished() {
            debug!(plan_id = %self.id, status = %self.status, "Cancel ignored");
            return;
        }

        let now = now_millis();
        let mut cancelled = Vec::new();
        for node in self.graph.iter_mut() {
            if matches!(node.status, NodeStatus::Pending | NodeStatus::Ready) {
                node.status = NodeStatus::Cancelled;
                node.completed_at = Some(now);
                cancelled.push(node.id.clone());
            }
        }
        self.graph.refresh_blocked_by();
        self.status = PlanStatus::Cancelled;
        self.touch();

        info!(plan_id = %self.id, cancelled = cancelled.len(), "Plan cancelled");
        self.emit(
            PlanEventType::PlanCancelled,
            None,
            Some(json!({ "cancelledNodes": cancelled })),
        );
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    pub fn subscribe(&mut self) -> Subscription<PlanEvent> {
        self.events.subscribe()
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    // ---------------------------------------------------------------------
    // JSON
    // ---------------------------------------------------------------------

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.to_data())?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_data())?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_data())?)
    }

    /// Build a plan from its JSON form
    pub fn from_json(text: &str) -> Result<Self> {
        let mut plan = Self::with_id("", "");
        plan.load_json(text)?;
        Ok(plan)
    }

    /// Replace this plan's state with the JSON form, version included
    ///
    /// Subscribers and config are kept. Derived node fields and the execution
    /// order are recomputed from the declared dependencies.
    pub fn load_json(&mut self, text: &str) -> Result<()> {
        let data: PlanDagData = serde_json::from_str(text)?;

        let nodes = data.nodes.into_iter().map(|(key, node)| {
            if key != node.id {
                warn!(key = %key, node_id = %node.id, "Node key does not match node id");
            }
            node
        });
        let graph = GraphStore::from_nodes(nodes)?;

        self.id = data.id;
        self.goal = data.goal;
        self.reasoning = data.reasoning;
        self.graph = graph;
        self.status = data.status;
        self.version = data.version;
        self.created_at = data.created_at;
        self.updated_at = data.updated_at;
        self.on_structure_changed();

        debug!(plan_id = %self.id, nodes = self.graph.len(), "Plan loaded from JSON");
        Ok(())
    }

    fn to_data(&self) -> PlanDagData {
        PlanDagData {
            id: self.id.clone(),
            goal: self.goal.clone(),
            reasoning: self.reasoning.clone(),
            nodes: self
                .graph
                .iter()
                .map(|node| (node.id.clone(), node.clone()))
                .collect(),
            execution_order: self.execution_order.clone(),
            status: self.status,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn node_mut(&mut self, id: &str) -> Result<&mut PlanNode> {
        self.graph
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = now_millis();
    }

    fn emit(&mut self, event_type: PlanEventType, node_id: Option<&str>, data: Option<Value>) {
        let mut event = PlanEvent::new(event_type, self.id.as_str());
        event.node_id = node_id.map(str::to_string);
        event.data = data;
        self.events.emit(event);
    }

    fn on_structure_changed(&mut self) {
        self.execution_order = algo::topological_order(&self.graph);
    }

    fn after_status_change(&mut self) {
        self.graph.refresh_blocked_by();
        self.update_ready_nodes();
        self.derive_status();
        self.touch();
    }

    /// Promote unblocked pending nodes, demote ready nodes that gained blockers
    fn update_ready_nodes(&mut self) {
        for i in 0..self.graph.len() {
            let node = self.graph.node_at_mut(i);
            match node.status {
                NodeStatus::Pending if node.blocked_by.is_empty() => {
                    node.status = NodeStatus::Ready;
                    let node_id = node.id.clone();
                    debug!(plan_id = %self.id, node_id = %node_id, "Node ready");
                    self.emit(PlanEventType::NodeReady, Some(&node_id), None);
                }
                NodeStatus::Ready if !node.blocked_by.is_empty() => {
                    node.status = NodeStatus::Pending;
                    debug!(plan_id = %self.id, node_id = %node.id, "Node blocked again");
                }
                _ => {}
            }
        }
    }

    fn derive_status(&mut self) {
        if self.status == PlanStatus::Cancelled || self.graph.is_empty() {
            return;
        }

        let mut any_executing = false;
        let mut any_failed = false;
        let mut any_open = false;
        let mut all_terminal = true;
        for node in self.graph.iter() {
            match node.status {
                NodeStatus::Executing => any_executing = true,
                NodeStatus::Failed => any_failed = true,
                NodeStatus::Pending | NodeStatus::Ready => any_open = true,
                _ => {}
            }
            all_terminal &= node.is_terminal();
        }

        let next = if any_executing {
            PlanStatus::Executing
        } else if any_failed && !any_open {
            PlanStatus::Failed
        } else if all_terminal {
            PlanStatus::Completed
        } else {
            return;
        };

        if next == self.status {
            return;
        }
        let previous = self.status;
        self.status = next;

        match next {
            PlanStatus::Completed => {
                info!(plan_id = %self.id, "Plan completed");
                let progress = serde_json::to_value(self.get_progress()).unwrap_or(Value::Null);
                self.emit(PlanEventType::PlanCompleted, None, Some(progress));
            }
            PlanStatus::Failed => {
                let failed: Vec<String> = self
                    .get_nodes_by_status(NodeStatus::Failed)
                    .into_iter()
                    .map(|n| n.id.clone())
                    .collect();
                warn!(plan_id = %self.id, failed = ?failed, "Plan failed");
                self.emit(PlanEventType::PlanFailed, None, Some(json!({ "failedNodes": failed })));
            }
            _ => {
                debug!(plan_id = %self.id, from = %previous, to = %next, "Plan status changed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> PlanDag {
        let mut plan = PlanDag::with_id("plan-1", "test");
        plan.add_node(PlanNode::new("a", "first")).unwrap();
        plan.add_node(PlanNode::new("b", "second").with_dependencies(["a"]))
            .unwrap();
        plan
    }

    #[test]
    fn test_new_plan_is_draft() {
        let plan = PlanDag::new("goal");
        assert_eq!(plan.status(), PlanStatus::Draft);
        assert_eq!(plan.version(), 0);
        assert!(plan.is_empty());
        assert!(Uuid::parse_str(plan.id()).is_ok());
    }

    #[test]
    fn test_add_node_promotes_roots() {
        let plan = linear();
        assert_eq!(plan.status(), PlanStatus::Pending);
        assert_eq!(plan.get_node("a").unwrap().status, NodeStatus::Ready);
        assert_eq!(plan.get_node("b").unwrap().status, NodeStatus::Pending);
        assert_eq!(plan.get_execution_order(), &["a", "b"]);
        assert_eq!(plan.version(), 2);
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut plan = linear();
        let err = plan.add_node(PlanNode::new("a", "dup")).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode(_)));
    }

    #[test]
    fn test_add_edge_demotes_ready_node() {
        let mut plan = linear();
        plan.add_node(PlanNode::new("c", "third")).unwrap();
        assert_eq!(plan.get_node("c").unwrap().status, NodeStatus::Ready);

        plan.add_edge("b", "c").unwrap();
        let c = plan.get_node("c").unwrap();
        assert_eq!(c.status, NodeStatus::Pending);
        assert_eq!(c.blocked_by, vec!["b"]);

        let version = plan.version();
        plan.add_edge("b", "c").unwrap();
        assert_eq!(plan.version(), version);

        assert!(plan.add_edge("a", "missing").is_err());
    }

    #[test]
    fn test_remove_node_unblocks_dependents() {
        let mut plan = linear();
        plan.remove_node("a").unwrap();
        let b = plan.get_node("b").unwrap();
        assert!(b.depends_on.is_empty());
        assert_eq!(b.status, NodeStatus::Ready);
        assert!(matches!(
            plan.remove_node("a"),
            Err(GraphError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_completion_records_duration_and_result() {
        let mut plan = linear();
        plan.mark_executing("a").unwrap();
        assert_eq!(plan.status(), PlanStatus::Executing);
        plan.mark_completed("a", json!({"ok": true})).unwrap();

        let a = plan.get_node("a").unwrap();
        assert!(a.actual_duration_ms.is_some());
        assert_eq!(a.result, Some(json!({"ok": true})));
        assert_eq!(plan.get_node("b").unwrap().status, NodeStatus::Ready);
    }

    #[test]
    fn test_failed_with_pending_stays_executing() {
        let mut plan = PlanDag::with_id("p", "g");
        plan.add_node(PlanNode::new("x", "")).unwrap();
        plan.add_node(PlanNode::new("y", "").with_dependencies(["z"])).unwrap();
        plan.add_node(PlanNode::new("z", "")).unwrap();

        plan.mark_executing("x").unwrap();
        plan.mark_failed("x", "boom").unwrap();
        // z is still ready and y pending
        assert_eq!(plan.status(), PlanStatus::Executing);
    }

    #[test]
    fn test_all_terminal_with_failure_is_failed() {
        let mut plan = linear();
        plan.mark_executing("a").unwrap();
        plan.mark_failed("a", "boom").unwrap();
        assert_eq!(plan.status(), PlanStatus::Executing);

        plan.mark_skipped("b", "upstream failed").unwrap();
        assert_eq!(plan.status(), PlanStatus::Failed);
    }

    #[test]
    fn test_retry_reopens_failed_plan() {
        let mut plan = PlanDag::with_id("p", "g");
        plan.add_node(PlanNode::new("only", "")).unwrap();
        plan.mark_executing("only").unwrap();
        plan.mark_failed("only", "boom").unwrap();
        assert_eq!(plan.status(), PlanStatus::Failed);

        assert!(plan.retry_node("only").unwrap());
        assert_eq!(plan.status(), PlanStatus::Executing);
        let node = plan.get_node("only").unwrap();
        assert_eq!(node.status, NodeStatus::Ready);
        assert!(node.error.is_none());
        assert!(node.started_at.is_none());
    }

    #[test]
    fn test_retry_requires_failed_status() {
        let mut plan = linear();
        assert!(!plan.retry_node("a").unwrap());
        assert!(plan.retry_node("ghost").is_err());
    }

    #[test]
    fn test_paused_plan_hides_ready_nodes() {
        let mut plan = linear();
        plan.pause();
        assert_eq!(plan.status(), PlanStatus::Paused);
        assert!(plan.get_ready_nodes().is_empty());
        assert!(plan.get_parallel_batch(5).is_empty());

        plan.resume();
        assert_eq!(plan.status(), PlanStatus::Executing);
        assert_eq!(plan.get_ready_nodes().len(), 1);
    }

    #[test]
    fn test_node_outcome_while_paused_rederives_status() {
        let mut plan = PlanDag::with_id("p", "g");
        plan.add_node(PlanNode::new("a", "")).unwrap();
        plan.add_node(PlanNode::new("b", "")).unwrap();
        plan.mark_executing("a").unwrap();
        plan.mark_executing("b").unwrap();

        plan.pause();
        assert_eq!(plan.status(), PlanStatus::Paused);

        plan.mark_completed("a", json!(null)).unwrap();
        assert_eq!(plan.status(), PlanStatus::Executing);

        plan.mark_completed("b", json!(null)).unwrap();
        assert_eq!(plan.status(), PlanStatus::Completed);
    }

    #[test]
    fn test_cancel_is_sticky() {
        let mut plan = linear();
        plan.mark_executing("a").unwrap();
        plan.cancel();
        assert_eq!(plan.status(), PlanStatus::Cancelled);
        assert_eq!(plan.get_node("b").unwrap().status, NodeStatus::Cancelled);
        assert_eq!(plan.get_node("a").unwrap().status, NodeStatus::Executing);

        plan.mark_completed("a", json!(null)).unwrap();
        assert_eq!(plan.status(), PlanStatus::Cancelled);
    }

    #[test]
    fn test_parallel_batch_excludes_sequential_nodes() {
        let mut plan = PlanDag::with_id("p", "g");
        plan.add_node(PlanNode::new("s", "").sequential().with_priority(-1))
            .unwrap();
        plan.add_node(PlanNode::new("p1", "").with_priority(2)).unwrap();
        plan.add_node(PlanNode::new("p2", "").with_priority(1)).unwrap();

        let batch: Vec<_> = plan.get_parallel_batch(5).iter().map(|n| n.id.as_str()).collect();
        assert_eq!(batch, vec!["p2", "p1"]);
        assert_eq!(plan.get_parallel_batch(1).len(), 1);
        assert_eq!(plan.get_ready_nodes()[0].id, "s");
        // batching does not change statuses
        assert_eq!(plan.get_node("p1").unwrap().status, NodeStatus::Ready);
    }

    #[test]
    fn test_next_parallel_batch_uses_config() {
        let mut plan = PlanDag::with_id("p", "g").with_config(PlanConfig { max_parallel: 2 });
        for i in 0..4 {
            plan.add_node(PlanNode::new(format!("n{}", i), "")).unwrap();
        }
        assert_eq!(plan.next_parallel_batch().len(), 2);
    }

    #[test]
    fn test_progress() {
        let mut plan = PlanDag::with_id("p", "g");
        plan.add_node(PlanNode::new("a", "").with_estimated_duration(100)).unwrap();
        plan.add_node(PlanNode::new("b", "").with_estimated_duration(50)).unwrap();
        plan.add_node(PlanNode::new("c", "").with_estimated_duration(25)).unwrap();
        plan.mark_executing("a").unwrap();
        plan.mark_completed("a", json!(1)).unwrap();
        plan.mark_skipped("b", "not needed").unwrap();

        let progress = plan.get_progress();
        assert_eq!(progress.total, 3);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.skipped, 1);
        assert_eq!(progress.ready, 1);
        assert_eq!(progress.percentage, 67);
        assert_eq!(progress.estimated_remaining_ms, 25);
    }

    #[test]
    fn test_progress_estimate_saturates() {
        let mut plan = PlanDag::with_id("p", "g");
        plan.add_node(PlanNode::new("a", "").with_estimated_duration(u64::MAX)).unwrap();
        plan.add_node(PlanNode::new("b", "").with_estimated_duration(1)).unwrap();
        assert_eq!(plan.get_progress().estimated_remaining_ms, u64::MAX);
    }

    #[test]
    fn test_reset_clears_run_state() {
        let mut plan = linear();
        plan.mark_executing("a").unwrap();
        plan.mark_failed("a", "x").unwrap();
        plan.retry_node("a").unwrap();
        plan.reset();

        assert_eq!(plan.status(), PlanStatus::Pending);
        for node in plan.nodes() {
            assert_eq!(node.status, NodeStatus::Pending);
            assert_eq!(node.retry_count, 0);
            assert!(node.error.is_none());
        }
        assert_eq!(plan.get_ready_nodes()[0].id, "a");
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut plan = PlanDag::with_id("p", "g");
        plan.add_node(PlanNode::new("a", "").with_dependencies(["b"])).unwrap();
        plan.add_node(PlanNode::new("b", "").with_dependencies(["a"])).unwrap();
        plan.add_node(PlanNode::new("c", "").with_dependencies(["ghost"])).unwrap();

        let report = plan.validate();
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.starts_with("Cycle detected")));
        assert!(report.errors.iter().any(|e| e.contains("'ghost'")));
        assert!(report.errors.iter().any(|e| e.contains("0 of 3")));

        assert!(linear().validate().valid);
    }

    #[test]
    fn test_plan_ref_projection() {
        let mut plan = linear();
        plan.mark_executing("a").unwrap();
        let projection = plan.plan_ref();
        assert_eq!(projection.id, "plan-1");
        assert_eq!(projection.total_steps, 2);
        assert_eq!(projection.completed_steps, 0);
        assert_eq!(projection.current_step_id.as_deref(), Some("a"));

        plan.mark_completed("a", json!(1)).unwrap();
        assert_eq!(plan.plan_ref().completed_steps, 1);
    }

    #[test]
    fn test_events_follow_mutations() {
        let mut plan = linear();
        let mut sub = plan.subscribe();

        plan.mark_executing("a").unwrap();
        plan.mark_completed("a", json!("done")).unwrap();

        let types: Vec<_> = sub.drain().into_iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                PlanEventType::NodeStarted,
                PlanEventType::NodeCompleted,
                PlanEventType::NodeReady,
            ]
        );

        assert!(plan.unsubscribe(sub.id()));
    }
}
