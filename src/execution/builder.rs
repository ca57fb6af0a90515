//! Pipeline construction

use crate::core::{error::WorkflowError, event::EventBus, stage::Stage};
use crate::execution::engine::{Pipeline, PipelineParts};
use crate::gates::{CheckRegistry, QualityGateManager};
use crate::snapshot::SnapshotManager;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

const DEFAULT_LOG_TAIL: usize = 20;

/// Assembles a [`Pipeline`] from its collaborators
pub struct PipelineBuilder {
    id: Option<Uuid>,
    title: String,
    description: String,
    stages: Vec<Stage>,
    gates: Option<QualityGateManager>,
    snapshots: Option<Arc<SnapshotManager>>,
    events: Option<EventBus>,
    log_tail: usize,
}

impl PipelineBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: String::new(),
            stages: Vec::new(),
            gates: None,
            snapshots: None,
            events: None,
            log_tail: DEFAULT_LOG_TAIL,
        }
    }

    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.stages.extend(stages);
        self
    }

    pub fn gates(mut self, gates: QualityGateManager) -> Self {
        self.gates = Some(gates);
        self
    }

    /// Enable checkpointing: every stage is snapshotted before it runs
    pub fn snapshots(mut self, snapshots: Arc<SnapshotManager>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Use an existing bus; its workflow id becomes the pipeline id
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Log entries included in status reports
    pub fn log_tail(mut self, log_tail: usize) -> Self {
        self.log_tail = log_tail;
        self
    }

    pub fn build(self) -> Result<Pipeline, WorkflowError> {
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.id.is_empty() {
                return Err(WorkflowError::Validation("stage id must not be empty".into()));
            }
            if !seen.insert(stage.id.as_str()) {
                return Err(WorkflowError::Validation(format!(
                    "duplicate stage id '{}'",
                    stage.id
                )));
            }
            if !(stage.weight.is_finite() && stage.weight > 0.0) {
                return Err(WorkflowError::Validation(format!(
                    "stage '{}' weight must be positive, got {}",
                    stage.id, stage.weight
                )));
            }
        }

        let mut gates = self
            .gates
            .unwrap_or_else(|| QualityGateManager::new(CheckRegistry::new()));
        for gate in gates.gates() {
            if !seen.contains(gate.stage_id.as_str()) {
                warn!("Gate {} is bound to unknown stage {}", gate.id, gate.stage_id);
            }
        }

        // Stages without an explicit gate pick up the gate bound to their id.
        let mut stages = self.stages;
        for stage in &mut stages {
            match &stage.gate_id {
                Some(gate_id) => {
                    if gates.gate(gate_id).is_none() {
                        warn!(
                            "Stage {} references unknown gate {}; it will always pass",
                            stage.id, gate_id
                        );
                    }
                }
                None => {
                    stage.gate_id = gates
                        .gates()
                        .find(|g| g.stage_id == stage.id)
                        .map(|g| g.id.clone());
                }
            }
        }

        let events = match self.events {
            Some(events) => events,
            None => EventBus::new(self.id.unwrap_or_else(Uuid::new_v4)),
        };
        gates.attach_events(events.clone());

        Ok(Pipeline::from_parts(PipelineParts {
            id: events.workflow_id(),
            title: self.title,
            description: self.description,
            stages,
            gates,
            snapshots: self.snapshots,
            events,
            log_tail: self.log_tail,
        }))
    }
}
