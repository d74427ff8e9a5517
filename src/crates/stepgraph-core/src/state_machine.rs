//! Agent lifecycle state machine
//!
//! [`AgentStateMachine`] owns one session's [`AgentState`] and only changes it
//! through [`StateTransition`] events. Each status accepts a fixed set of
//! events:
//!
//! | status    | allowed events |
//! |-----------|----------------|
//! | idle      | START |
//! | planning  | PLAN_CREATED, ERROR, PAUSE, RESET |
//! | executing | STEP_START, STEP_COMPLETE, STEP_ERROR, STEP_SKIP, COMPLETE, ERROR, PAUSE, WAIT, RETRY |
//! | waiting   | INPUT_RECEIVED, RESUME, ERROR, PAUSE, RESET |
//! | paused    | RESUME, RESET |
//! | error     | RESET, RETRY |
//! | completed | RESET, START |
//!
//! A rejected event returns [`GraphError::InvalidTransition`] and leaves the
//! state exactly as it was. Accepted events are applied to a copy that
//! replaces the current state in one step.
//!
//! With a [`CheckpointStore`] configured the machine can save, restore, list
//! and delete snapshots of its state, and optionally checkpoint itself in the
//! background every `checkpoint_interval` steps.
//!
//! ```rust
//! use stepgraph_core::{AgentStateMachine, StateMachineConfig, StateTransition};
//! use stepgraph_checkpoint::{AgentStatus, PlanRef};
//!
//! let mut agent = AgentStateMachine::new(StateMachineConfig::new("session-1"));
//! agent.transition(StateTransition::start("summarize the report")).unwrap();
//! agent.transition(StateTransition::PlanCreated {
//!     plan: PlanRef::new("plan-1", "summarize", 2),
//! }).unwrap();
//! assert_eq!(agent.status(), AgentStatus::Executing);
//!
//! // COMPLETE is allowed while executing, RESET is not
//! assert!(agent.can_transition(stepgraph_core::TransitionKind::Complete));
//! assert!(agent.transition(StateTransition::Reset).is_err());
//! ```

use crate::config::StateSettings;
use crate::error::{GraphError, Result};
use crate::event::{EventBus, Subscription, SubscriptionId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use stepgraph_checkpoint::{
    AgentState, AgentStatus, CheckpointError, CheckpointInfo, CheckpointStore,
    FileCheckpointStore, PlanRef, AGENT_STATE_VERSION,
};
use tracing::{debug, info, warn};

/// Event discriminant, used by the transition table and error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionKind {
    Start,
    PlanCreated,
    StepStart,
    StepComplete,
    StepError,
    StepSkip,
    Complete,
    Error,
    Pause,
    Resume,
    Wait,
    InputReceived,
    Retry,
    Reset,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::PlanCreated => "PLAN_CREATED",
            Self::StepStart => "STEP_START",
            Self::StepComplete => "STEP_COMPLETE",
            Self::StepError => "STEP_ERROR",
            Self::StepSkip => "STEP_SKIP",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
            Self::Pause => "PAUSE",
            Self::Resume => "RESUME",
            Self::Wait => "WAIT",
            Self::InputReceived => "INPUT_RECEIVED",
            Self::Retry => "RETRY",
            Self::Reset => "RESET",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events that drive the agent lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum StateTransition {
    /// Begin a new task
    Start {
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },
    PlanCreated {
        plan: PlanRef,
    },
    StepStart {
        step_id: String,
    },
    StepComplete {
        step_id: String,
        result: Value,
    },
    StepError {
        step_id: String,
        error: String,
    },
    StepSkip {
        step_id: String,
        reason: String,
    },
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    Error {
        error: String,
    },
    Pause,
    Resume,
    Wait {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    InputReceived {
        input: Value,
    },
    Retry,
    Reset,
}

impl StateTransition {
    pub fn start(input: impl Into<Value>) -> Self {
        Self::Start {
            input: input.into(),
            task_id: None,
        }
    }

    pub fn start_task(input: impl Into<Value>, task_id: impl Into<String>) -> Self {
        Self::Start {
            input: input.into(),
            task_id: Some(task_id.into()),
        }
    }

    pub fn kind(&self) -> TransitionKind {
        match self {
            Self::Start { .. } => TransitionKind::Start,
            Self::PlanCreated { .. } => TransitionKind::PlanCreated,
            Self::StepStart { .. } => TransitionKind::StepStart,
            Self::StepComplete { .. } => TransitionKind::StepComplete,
            Self::StepError { .. } => TransitionKind::StepError,
            Self::StepSkip { .. } => TransitionKind::StepSkip,
            Self::Complete { .. } => TransitionKind::Complete,
            Self::Error { .. } => TransitionKind::Error,
            Self::Pause => TransitionKind::Pause,
            Self::Resume => TransitionKind::Resume,
            Self::Wait { .. } => TransitionKind::Wait,
            Self::InputReceived { .. } => TransitionKind::InputReceived,
            Self::Retry => TransitionKind::Retry,
            Self::Reset => TransitionKind::Reset,
        }
    }
}

/// Events accepted in `status`
pub fn allowed_events(status: AgentStatus) -> &'static [TransitionKind] {
    use TransitionKind::*;
    match status {
        AgentStatus::Idle => &[Start],
        AgentStatus::Planning => &[PlanCreated, Error, Pause, Reset],
        AgentStatus::Executing => &[
            StepStart,
            StepComplete,
            StepError,
            StepSkip,
            Complete,
            Error,
            Pause,
            Wait,
            Retry,
        ],
        AgentStatus::Waiting => &[InputReceived, Resume, Error, Pause, Reset],
        AgentStatus::Paused => &[Resume, Reset],
        AgentStatus::Error => &[Reset, Retry],
        AgentStatus::Completed => &[Reset, Start],
    }
}

/// Notification sent to subscribers after every state change
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub from: AgentStatus,
    pub to: AgentStatus,
    /// `None` when the change came from restoring a checkpoint
    pub event: Option<StateTransition>,
    pub state: AgentState,
}

/// Callback for rejected transitions
pub type ErrorHandler = Arc<dyn Fn(&GraphError) + Send + Sync>;

/// Callback for failed background checkpoints
pub type CheckpointErrorHandler = Arc<dyn Fn(&CheckpointError) + Send + Sync>;

/// Settings for one agent session
#[derive(Debug, Clone, PartialEq)]
pub struct StateMachineConfig {
    pub session_id: String,
    pub settings: StateSettings,
}

impl StateMachineConfig {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::from_settings(session_id, StateSettings::default())
    }

    /// Build from the `[state]` section of a config file
    pub fn from_settings(session_id: impl Into<String>, settings: StateSettings) -> Self {
        Self {
            session_id: session_id.into(),
            settings,
        }
    }
}

/// State machine for one agent session
pub struct AgentStateMachine {
    config: StateMachineConfig,
    state: AgentState,
    store: Option<Arc<dyn CheckpointStore>>,
    events: EventBus<StateChange>,
    on_error: Option<ErrorHandler>,
    on_checkpoint_error: Option<CheckpointErrorHandler>,
}

impl fmt::Debug for AgentStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentStateMachine")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("has_store", &self.store.is_some())
            .field("subscribers", &self.events.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl AgentStateMachine {
    /// Create an idle machine
    ///
    /// If `checkpoint_dir` is set, a [`FileCheckpointStore`] rooted there is
    /// used until [`with_store`](Self::with_store) replaces it.
    pub fn new(config: StateMachineConfig) -> Self {
        let store = config
            .settings
            .checkpoint_dir
            .clone()
            .map(|dir| Arc::new(FileCheckpointStore::new(dir)) as Arc<dyn CheckpointStore>);
        let state = Self::initial_state(&config);
        Self {
            config,
            state,
            store,
            events: EventBus::new(),
            on_error: None,
            on_checkpoint_error: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Called with every rejected transition
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&GraphError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Called when a background checkpoint fails
    pub fn with_checkpoint_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&CheckpointError) + Send + Sync + 'static,
    {
        self.on_checkpoint_error = Some(Arc::new(handler));
        self
    }

    fn initial_state(config: &StateMachineConfig) -> AgentState {
        let state = AgentState::new(config.session_id.clone());
        if config.settings.include_conversation_history {
            state.with_conversation_history()
        } else {
            state
        }
    }

    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    pub fn config(&self) -> &StateMachineConfig {
        &self.config
    }

    pub fn get_state(&self) -> &AgentState {
        &self.state
    }

    pub fn status(&self) -> AgentStatus {
        self.state.status
    }

    pub fn get_memory(&self, key: &str) -> Option<&Value> {
        self.state.working_memory.get(key)
    }

    pub fn allowed_events(&self) -> &'static [TransitionKind] {
        allowed_events(self.state.status)
    }

    pub fn can_transition(&self, kind: TransitionKind) -> bool {
        self.allowed_events().contains(&kind)
    }

    pub fn subscribe(&mut self) -> Subscription<StateChange> {
        self.events.subscribe()
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Apply an event
    pub fn transition(&mut self, event: StateTransition) -> Result<&AgentState> {
        let kind = event.kind();
        let from = self.state.status;

        if !self.can_transition(kind) {
            let err = GraphError::InvalidTransition {
                event: kind,
                status: from,
            };
            warn!(session_id = %self.state.session_id, error = %err, "Transition rejected");
            if let Some(handler) = &self.on_error {
                handler(&err);
            }
            return Err(err);
        }

        let mut next = match &event {
            StateTransition::Reset => Self::initial_state(&self.config),
            _ => self.apply(self.state.clone(), &event),
        };
        next.updated_at = Utc::now().timestamp_millis();
        self.state = next;

        let to = self.state.status;
        if from != to {
            info!(session_id = %self.state.session_id, event = %kind, from = %from, to = %to, "Agent status changed");
        } else {
            debug!(session_id = %self.state.session_id, event = %kind, status = %to, "Transition applied");
        }

        self.events.emit(StateChange {
            from,
            to,
            event: Some(event),
            state: self.state.clone(),
        });
        self.maybe_auto_checkpoint();

        Ok(&self.state)
    }

    fn apply(&self, mut state: AgentState, event: &StateTransition) -> AgentState {
        let capacity = self.config.settings.max_working_memory_size;

        match event {
            StateTransition::Start { input, task_id } => {
                state.status = AgentStatus::Planning;
                state.task_id = task_id.clone();
                state.step_index = 0;
                state.plan = None;
                state.error = None;
                state.retry_count = 0;
                state.working_memory = Default::default();
                remember(&mut state, "input", input.clone(), capacity);
                if let Some(history) = state.conversation_history.as_mut() {
                    history.clear();
                    history.push(json!({ "role": "user", "content": input }));
                }
            }
            StateTransition::PlanCreated { plan } => {
                state.plan = Some(plan.clone());
                state.status = AgentStatus::Executing;
            }
            StateTransition::StepStart { step_id } => {
                if let Some(plan) = state.plan.as_mut() {
                    plan.current_step_id = Some(step_id.clone());
                }
                remember(&mut state, "currentStep", json!(step_id), capacity);
            }
            StateTransition::StepComplete { step_id, result } => {
                state.step_index += 1;
                remember(&mut state, format!("step:{}:result", step_id), result.clone(), capacity);
                if let Some(plan) = state.plan.as_mut() {
                    plan.completed_steps += 1;
                    plan.current_step_id = None;
                }
            }
            StateTransition::StepError { step_id, error } => {
                remember(&mut state, format!("step:{}:error", step_id), json!(error), capacity);
                state.status = AgentStatus::Error;
                state.error = Some(error.clone());
            }
            StateTransition::StepSkip { step_id, reason } => {
                state.step_index += 1;
                remember(&mut state, format!("step:{}:skipped", step_id), json!(reason), capacity);
                if let Some(plan) = state.plan.as_mut() {
                    plan.completed_steps += 1;
                }
            }
            StateTransition::Complete { result } => {
                let result = result.clone().unwrap_or(Value::Null);
                if let Some(history) = state.conversation_history.as_mut() {
                    if !result.is_null() {
                        history.push(json!({ "role": "assistant", "content": result }));
                    }
                }
                remember(&mut state, "result", result, capacity);
                state.status = AgentStatus::Completed;
            }
            StateTransition::Error { error } => {
                state.status = AgentStatus::Error;
                state.error = Some(error.clone());
            }
            StateTransition::Pause => {
                state.status = AgentStatus::Paused;
            }
            StateTransition::Resume => {
                state.status = if state.plan.is_some() {
                    AgentStatus::Executing
                } else {
                    AgentStatus::Planning
                };
            }
            StateTransition::Wait { reason } => {
                state.status = AgentStatus::Waiting;
                if let Some(reason) = reason {
                    remember(&mut state, "waitReason", json!(reason), capacity);
                }
            }
            StateTransition::InputReceived { input } => {
                remember(&mut state, "userInput", input.clone(), capacity);
                if let Some(history) = state.conversation_history.as_mut() {
                    history.push(json!({ "role": "user", "content": input }));
                }
                state.status = AgentStatus::Executing;
            }
            StateTransition::Retry => {
                state.retry_count += 1;
                state.error = None;
                state.status = AgentStatus::Executing;
            }
            StateTransition::Reset => {
                state = Self::initial_state(&self.config);
            }
        }

        state
    }

    fn maybe_auto_checkpoint(&self) {
        let settings = &self.config.settings;
        if !settings.auto_checkpoint || settings.checkpoint_interval == 0 {
            return;
        }
        if self.state.step_index % settings.checkpoint_interval != 0 {
            return;
        }
        let Some(store) = self.store.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %self.state.session_id, "No tokio runtime, auto-checkpoint skipped");
            return;
        };

        let state = self.state.clone();
        let on_error = self.on_checkpoint_error.clone();
        handle.spawn(async move {
            match store.save(&state, None).await {
                Ok(id) => {
                    debug!(session_id = %state.session_id, checkpoint_id = %id, step_index = state.step_index, "Auto-checkpoint saved");
                }
                Err(e) => {
                    warn!(session_id = %state.session_id, error = %e, "Auto-checkpoint failed");
                    if let Some(handler) = on_error {
                        handler(&e);
                    }
                }
            }
        });
    }

    fn store(&self) -> Result<&Arc<dyn CheckpointStore>> {
        self.store.as_ref().ok_or(GraphError::NoCheckpointStore)
    }

    /// Save the current state, returning the checkpoint id
    pub async fn checkpoint(&self, name: Option<&str>) -> Result<String> {
        let id = self.store()?.save(&self.state, name).await?;
        info!(session_id = %self.state.session_id, checkpoint_id = %id, "Checkpoint saved");
        Ok(id)
    }

    /// Replace the current state with a saved one
    pub async fn restore(&mut self, checkpoint_id: &str) -> Result<&AgentState> {
        let mut restored = self.store()?.load(checkpoint_id).await?;

        if restored.version != AGENT_STATE_VERSION {
            warn!(
                checkpoint_id = %checkpoint_id,
                found = %restored.version,
                expected = AGENT_STATE_VERSION,
                "Checkpoint schema version mismatch"
            );
        }
        if restored.session_id != self.state.session_id {
            warn!(
                checkpoint_id = %checkpoint_id,
                from_session = %restored.session_id,
                session_id = %self.state.session_id,
                "Restoring checkpoint from another session"
            );
        }

        if restored.checkpoint_name.is_none() {
            restored.checkpoint_name = Some(checkpoint_id.to_string());
        }
        restored.updated_at = Utc::now().timestamp_millis();

        let from = self.state.status;
        self.state = restored;
        info!(session_id = %self.state.session_id, checkpoint_id = %checkpoint_id, status = %self.state.status, "Checkpoint restored");

        self.events.emit(StateChange {
            from,
            to: self.state.status,
            event: None,
            state: self.state.clone(),
        });
        Ok(&self.state)
    }

    /// Checkpoints of this session, newest first
    pub async fn list_checkpoints(&self) -> Result<Vec<CheckpointInfo>> {
        Ok(self.store()?.list(Some(&self.state.session_id)).await?)
    }

    pub async fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<()> {
        self.store()?.delete(checkpoint_id).await?;
        debug!(session_id = %self.state.session_id, checkpoint_id = %checkpoint_id, "Checkpoint deleted");
        Ok(())
    }
}

fn remember(state: &mut AgentState, key: impl Into<String>, value: Value, capacity: usize) {
    if let Some(evicted) = state.working_memory.insert(key, value, capacity) {
        debug!(session_id = %state.session_id, evicted = %evicted, "Working memory full, evicted oldest entry");
    }
}
