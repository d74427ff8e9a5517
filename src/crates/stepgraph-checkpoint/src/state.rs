//! Agent state snapshot persisted by checkpoint stores
//!
//! [`AgentState`] is the single value the agent state machine owns and the
//! unit every [`CheckpointStore`](crate::CheckpointStore) saves and loads. Its
//! JSON form is a flat camelCase object mirroring the struct fields.
//!
//! # Working memory
//!
//! [`WorkingMemory`] is a bounded key/value map that remembers insertion order.
//! When a new key arrives at capacity the *oldest inserted* key is evicted.
//! Overwriting an existing key keeps its original position, so eviction is
//! FIFO by first insertion rather than LRU.
//!
//! ```rust
//! use stepgraph_checkpoint::WorkingMemory;
//! use serde_json::json;
//!
//! let mut memory = WorkingMemory::new();
//! memory.insert("a", json!(1), 2);
//! memory.insert("b", json!(2), 2);
//! let evicted = memory.insert("c", json!(3), 2);
//!
//! assert_eq!(evicted.as_deref(), Some("a"));
//! assert_eq!(memory.keys().collect::<Vec<_>>(), vec!["b", "c"]);
//! ```

use chrono::Utc;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Schema version stamped on every freshly created [`AgentState`]
pub const AGENT_STATE_VERSION: &str = "1.0.0";

/// Lifecycle status of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Waiting for a task
    Idle,
    /// Producing a plan for the current task
    Planning,
    /// Running plan steps
    Executing,
    /// Blocked on external input
    Waiting,
    /// Suspended by the caller
    Paused,
    /// Stopped on an error, may be retried
    Error,
    /// Task finished
    Completed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Waiting => "waiting",
            Self::Paused => "paused",
            Self::Error => "error",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only projection of the plan an agent is executing
///
/// This is a copy taken when the plan is announced, not a handle to the live
/// plan graph; the state machine advances `completed_steps` on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRef {
    pub id: String,
    pub goal: String,
    pub total_steps: usize,
    pub completed_steps: usize,
    #[serde(default)]
    pub current_step_id: Option<String>,
}

impl PlanRef {
    pub fn new(id: impl Into<String>, goal: impl Into<String>, total_steps: usize) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            total_steps,
            completed_steps: 0,
            current_step_id: None,
        }
    }
}

/// Bounded, insertion-ordered key/value scratch space
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkingMemory {
    entries: Vec<(String, Value)>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Insert or overwrite `key`
    ///
    /// A `capacity` of zero means unbounded. Returns the key evicted to make
    /// room, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: Value, capacity: usize) -> Option<String> {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
            return None;
        }

        let evicted = if capacity > 0 && self.entries.len() >= capacity {
            Some(self.entries.remove(0).0)
        } else {
            None
        };
        self.entries.push((key, value));
        evicted
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Serialize for WorkingMemory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for WorkingMemory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MemoryVisitor;

        impl<'de> Visitor<'de> for MemoryVisitor {
            type Value = WorkingMemory;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a working memory object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut memory = WorkingMemory::new();
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    memory.insert(key, value, 0);
                }
                Ok(memory)
            }
        }

        deserializer.deserialize_map(MemoryVisitor)
    }
}

/// Complete agent execution state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    /// Schema version of this snapshot
    pub version: String,
    pub session_id: String,
    pub task_id: Option<String>,
    pub step_index: u64,
    pub plan: Option<PlanRef>,
    #[serde(default)]
    pub working_memory: WorkingMemory,
    pub status: AgentStatus,
    /// Set only while `status` is [`AgentStatus::Error`]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_history: Option<Vec<Value>>,
    #[serde(default)]
    pub retry_count: u32,
    /// Name of the checkpoint this state was restored from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_name: Option<String>,
    /// Epoch milliseconds
    pub created_at: i64,
    /// Epoch milliseconds
    pub updated_at: i64,
}

impl AgentState {
    /// Fresh `idle` state for a session
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            version: AGENT_STATE_VERSION.to_string(),
            session_id: session_id.into(),
            task_id: None,
            step_index: 0,
            plan: None,
            working_memory: WorkingMemory::new(),
            status: AgentStatus::Idle,
            error: None,
            conversation_history: None,
            retry_count: 0,
            checkpoint_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Enable conversation history tracking on this state
    pub fn with_conversation_history(mut self) -> Self {
        self.conversation_history = Some(Vec::new());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_state_is_idle() {
        let state = AgentState::new("session-1");
        assert_eq!(state.status, AgentStatus::Idle);
        assert_eq!(state.version, AGENT_STATE_VERSION);
        assert_eq!(state.step_index, 0);
        assert!(state.plan.is_none());
        assert!(state.working_memory.is_empty());
        assert!(state.conversation_history.is_none());
    }

    #[test]
    fn test_working_memory_evicts_first_inserted() {
        let mut memory = WorkingMemory::new();
        memory.insert("a", json!(1), 3);
        memory.insert("b", json!(2), 3);
        memory.insert("c", json!(3), 3);

        // Overwriting does not move "a" to the back
        assert!(memory.insert("a", json!(10), 3).is_none());

        let evicted = memory.insert("d", json!(4), 3);
        assert_eq!(evicted.as_deref(), Some("a"));
        assert_eq!(memory.keys().collect::<Vec<_>>(), vec!["b", "c", "d"]);
        assert_eq!(memory.len(), 3);
    }

    #[test]
    fn test_working_memory_zero_capacity_is_unbounded() {
        let mut memory = WorkingMemory::new();
        for i in 0..10 {
            assert!(memory.insert(format!("k{i}"), json!(i), 0).is_none());
        }
        assert_eq!(memory.len(), 10);
    }

    #[test]
    fn test_working_memory_json_keeps_order() {
        let mut memory = WorkingMemory::new();
        memory.insert("zeta", json!(1), 0);
        memory.insert("alpha", json!(2), 0);

        let text = serde_json::to_string(&memory).unwrap();
        assert_eq!(text, r#"{"zeta":1,"alpha":2}"#);

        let parsed: WorkingMemory = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.keys().collect::<Vec<_>>(), vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_state_json_is_flat_camel_case() {
        let mut state = AgentState::new("session-1");
        state.plan = Some(PlanRef::new("plan-1", "ship it", 4));
        let value = serde_json::to_value(&state).unwrap();

        assert_eq!(value["sessionId"], "session-1");
        assert_eq!(value["stepIndex"], 0);
        assert_eq!(value["status"], "idle");
        assert_eq!(value["plan"]["totalSteps"], 4);
        assert!(value.get("checkpointName").is_none());
        assert!(value.get("conversationHistory").is_none());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(AgentStatus::Waiting.to_string(), "waiting");
        assert_eq!(AgentStatus::Error.as_str(), "error");
    }
}
