//! Workflow lifecycle state machine

use crate::core::event::{EventBus, WorkflowEvent};
use crate::core::state::WorkflowState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// A recorded state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Tracks one workflow's lifecycle and enforces the transition table
#[derive(Debug)]
pub struct StateMachine {
    state: WorkflowState,
    history: Vec<Transition>,
    metadata: HashMap<String, Value>,
    events: EventBus,
}

impl StateMachine {
    /// Create a state machine in the `Idle` state
    pub fn new(events: EventBus) -> Self {
        Self {
            state: WorkflowState::Idle,
            history: Vec::new(),
            metadata: HashMap::new(),
            events,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Append-only list of successful transitions
    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Check the transition table
    pub fn can_transition_to(&self, target: WorkflowState) -> bool {
        self.state.allowed_transitions().contains(&target)
    }

    /// Attempt a transition. Rejected transitions have no side effects.
    pub fn transition_to(&mut self, target: WorkflowState, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        if !self.can_transition_to(target) {
            warn!(
                "Invalid transition for workflow {}: {} -> {} ({})",
                self.events.workflow_id(),
                self.state,
                target,
                reason
            );
            return false;
        }

        let from = self.state;
        self.state = target;
        self.history.push(Transition {
            from,
            to: target,
            reason: reason.clone(),
            timestamp: Utc::now(),
        });
        debug!(
            "Workflow {} transitioned {} -> {}",
            self.events.workflow_id(),
            from,
            target
        );
        self.events.emit(WorkflowEvent::StateChanged {
            from,
            to: target,
            reason,
        });
        true
    }

    /// Transition to `target` only when currently in `expected`.
    ///
    /// `Running` is reachable from three states; each wrapper names its own.
    fn transition_from(
        &mut self,
        expected: WorkflowState,
        target: WorkflowState,
        reason: &str,
    ) -> bool {
        if self.state != expected {
            warn!(
                "Workflow {}: {} requires state {}, found {}",
                self.events.workflow_id(),
                reason,
                expected,
                self.state
            );
            return false;
        }
        self.transition_to(target, reason)
    }

    pub fn start(&mut self) -> bool {
        self.transition_from(WorkflowState::Idle, WorkflowState::Running, "workflow started")
    }

    pub fn pause(&mut self) -> bool {
        self.transition_to(WorkflowState::Paused, "workflow paused")
    }

    pub fn resume(&mut self) -> bool {
        self.transition_from(WorkflowState::Paused, WorkflowState::Running, "workflow resumed")
    }

    pub fn complete(&mut self) -> bool {
        self.transition_to(WorkflowState::Completed, "workflow completed")
    }

    pub fn fail(&mut self, error: &str) -> bool {
        self.transition_to(WorkflowState::Failed, error)
    }

    pub fn cancel(&mut self, reason: &str) -> bool {
        self.transition_to(WorkflowState::Cancelled, reason)
    }

    /// `Failed -> Running`; the only way out of `Failed`
    pub fn retry(&mut self) -> bool {
        self.transition_from(WorkflowState::Failed, WorkflowState::Running, "workflow retried")
    }
}
