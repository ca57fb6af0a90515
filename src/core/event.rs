//! Workflow events and the bus that fans them out to observers

use crate::core::state::WorkflowState;
use crate::gates::GateResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Events that can occur during workflow execution
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStarted {
        title: String,
        total_stages: usize,
    },
    Progress {
        overall: u8,
        stage_id: Option<String>,
        stage_progress: u8,
    },
    /// Live progress reported from inside a running stage
    StageProgress {
        stage_id: String,
        progress: u8,
    },
    StepProgress {
        stage_id: String,
        step_id: String,
        progress: u8,
        stage_progress: u8,
    },
    StageStarted {
        stage_id: String,
        name: String,
    },
    StageCompleted {
        stage_id: String,
        result: Value,
    },
    StageError {
        stage_id: String,
        error: String,
    },
    StageSkipped {
        stage_id: String,
        reason: String,
    },
    StepStarted {
        stage_id: String,
        step_id: String,
    },
    StepCompleted {
        stage_id: String,
        step_id: String,
    },
    StepError {
        stage_id: String,
        step_id: String,
        error: String,
    },
    GateChecking {
        gate_id: String,
        stage_id: String,
    },
    GateResult {
        result: GateResult,
    },
    SnapshotRestored {
        stage_id: String,
        success: bool,
    },
    WorkflowCompleted {
        duration_ms: u64,
    },
    WorkflowError {
        error: String,
        failed_stage: Option<String>,
    },
    Paused,
    Resumed,
    Cancelled {
        reason: String,
    },
    StateChanged {
        from: WorkflowState,
        to: WorkflowState,
        reason: String,
    },
}

/// An event together with the workflow it belongs to
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub workflow_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: WorkflowEvent,
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out channel for one workflow's events.
///
/// Emitting never blocks: events go into a broadcast channel and slow
/// subscribers observe `Lagged` rather than stalling the execution loop.
#[derive(Debug, Clone)]
pub struct EventBus {
    workflow_id: Uuid,
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(workflow_id: Uuid) -> Self {
        Self::with_capacity(workflow_id, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(workflow_id: Uuid, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { workflow_id, sender }
    }

    /// The workflow these events are attributed to
    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    /// Emit an event to every current subscriber
    pub fn emit(&self, event: WorkflowEvent) {
        let envelope = EventEnvelope {
            workflow_id: self.workflow_id,
            timestamp: Utc::now(),
            event,
        };
        // An error only means nobody is listening.
        if self.sender.send(envelope).is_err() {
            trace!("No subscribers for workflow {} events", self.workflow_id);
        }
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Add an event handler, driven by a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) => handler(&envelope),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        trace!("Event handler lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
