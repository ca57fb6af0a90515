//! Workflow templates - the stage set, gates and checks new workflows get

use crate::core::{
    config::{CheckKind, WorkflowConfig},
    condition::ConditionPattern,
    error::WorkflowError,
    stage::{Stage, StageExecutor},
    step::Step,
};
use crate::execution::{Pipeline, PipelineBuilder, ShellStep};
use crate::gates::{
    CheckRegistry, NonEmptyCheck, PatternCheck, QualityCheck, QualityGate, QualityGateManager,
    ScoreFieldCheck,
};
use crate::snapshot::{SnapshotConfig, SnapshotManager, TableStore};
use anyhow::Result;
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_LOG_TAIL: usize = 20;

/// Blueprint for building pipelines with fresh runtime state
#[derive(Clone)]
pub struct WorkflowTemplate {
    stages: Vec<Stage>,
    gates: Vec<QualityGate>,
    checks: CheckRegistry,
    snapshots: Option<SnapshotConfig>,
    tables: Option<Arc<dyn TableStore>>,
    log_tail: usize,
}

impl Default for WorkflowTemplate {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowTemplate {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            gates: Vec::new(),
            checks: CheckRegistry::new(),
            snapshots: None,
            tables: None,
            log_tail: DEFAULT_LOG_TAIL,
        }
    }

    /// The standard five-stage delivery workflow.
    ///
    /// Stages carry no executors; inject them with
    /// [`WorkflowTemplate::with_stage_executor`]. Gate checks default to
    /// built-in output and score checks and can be replaced by id.
    pub fn default_stage_set() -> Self {
        let stage = |id: &str, name: &str, weight: f64| Stage::new(id, name).with_weight(weight);

        Self::new()
            .with_stage(stage("analysis", "Analysis", 10.0))
            .with_stage(stage("planning", "Planning", 15.0))
            .with_stage(stage("generation", "Generation", 45.0))
            .with_stage(stage("validation", "Validation", 20.0))
            .with_stage(stage("delivery", "Delivery", 10.0))
            .with_gate(
                QualityGate::new("analysis-gate", "analysis", 0.6)
                    .with_name("Analysis review")
                    .with_check("analysis-output"),
            )
            .with_gate(
                QualityGate::new("generation-gate", "generation", 0.7)
                    .with_name("Generation quality")
                    .with_check("generation-output")
                    .with_check("generation-score")
                    .blocking(true),
            )
            .with_gate(
                QualityGate::new("validation-gate", "validation", 0.8)
                    .with_name("Validation")
                    .with_check("validation-score")
                    .blocking(true),
            )
            .with_check(
                "analysis-output",
                Arc::new(NonEmptyCheck::new("Analysis produced output")),
            )
            .with_check(
                "generation-output",
                Arc::new(NonEmptyCheck::new("Generation produced output")),
            )
            .with_check(
                "generation-score",
                Arc::new(ScoreFieldCheck::new("Generation score", "score", 0.7)),
            )
            .with_check(
                "validation-score",
                Arc::new(ScoreFieldCheck::new("Validation score", "score", 0.8)),
            )
    }

    /// Template equivalent of a YAML workflow definition.
    ///
    /// The config is validated first, so one assembled in code gets the same
    /// reference checks as one loaded from a file.
    pub fn from_config(config: &WorkflowConfig) -> Result<Self> {
        config.validate()?;
        let timeout = config.engine.default_timeout_secs;
        let mut template = Self::new().with_log_tail(config.engine.log_tail);

        for stage_config in &config.stages {
            let mut stage = Stage::new(&stage_config.id, &stage_config.name)
                .with_description(&stage_config.description)
                .with_weight(stage_config.weight)
                .with_checkpoint(stage_config.checkpoint.clone());
            if let Some(gate) = &stage_config.gate {
                stage = stage.with_gate(gate);
            }
            for step_config in &stage_config.steps {
                let mut shell = ShellStep::new(
                    &step_config.run,
                    step_config.timeout_secs.unwrap_or(timeout),
                );
                if let Some(dir) = &step_config.working_dir {
                    shell = shell.with_working_dir(dir);
                }
                stage = stage.with_step(
                    Step::new(&step_config.id, &step_config.name)
                        .with_description(&step_config.description)
                        .with_executor(Arc::new(shell)),
                );
            }
            template = template.with_stage(stage);
        }

        for gate_config in &config.gates {
            let mut gate = QualityGate::new(
                &gate_config.id,
                &gate_config.stage_id,
                gate_config.threshold,
            )
            .blocking(gate_config.blocking)
            .with_description(&gate_config.description);
            if let Some(name) = &gate_config.name {
                gate = gate.with_name(name);
            }
            for check in &gate_config.checks {
                gate = gate.with_check(check);
            }
            template = template.with_gate(gate);
        }

        for check_config in &config.checks {
            let name = check_config
                .name
                .clone()
                .unwrap_or_else(|| check_config.id.clone());
            let check: Arc<dyn QualityCheck> = match &check_config.kind {
                CheckKind::Pattern { pattern, use_regex } => Arc::new(PatternCheck::new(
                    name,
                    ConditionPattern::new(pattern, *use_regex),
                )),
                CheckKind::NonEmpty => Arc::new(NonEmptyCheck::new(name)),
                CheckKind::ScoreField { field, pass_mark } => {
                    Arc::new(ScoreFieldCheck::new(name, field, *pass_mark))
                }
            };
            template = template.with_check(&check_config.id, check);
        }

        if config.engine.snapshots {
            template = template.with_snapshots(config.engine.snapshot_config());
        }

        Ok(template)
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Inject the executor for a stage; unknown ids are ignored
    pub fn with_stage_executor(mut self, stage_id: &str, executor: Arc<dyn StageExecutor>) -> Self {
        if let Some(position) = self.stages.iter().position(|s| s.id == stage_id) {
            let stage = self.stages.remove(position);
            self.stages.insert(position, stage.with_executor(executor));
        }
        self
    }

    pub fn with_gate(mut self, gate: QualityGate) -> Self {
        self.gates.retain(|g| g.id != gate.id);
        self.gates.push(gate);
        self
    }

    /// Register or replace a named check
    pub fn with_check(mut self, id: impl Into<String>, check: Arc<dyn QualityCheck>) -> Self {
        self.checks.register(id, check);
        self
    }

    /// Checkpoint every stage, backing files up under the config's directory
    pub fn with_snapshots(mut self, config: SnapshotConfig) -> Self {
        self.snapshots = Some(config);
        self
    }

    pub fn with_table_store(mut self, store: Arc<dyn TableStore>) -> Self {
        self.tables = Some(store);
        self
    }

    pub fn with_log_tail(mut self, log_tail: usize) -> Self {
        self.log_tail = log_tail;
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn gates(&self) -> &[QualityGate] {
        &self.gates
    }

    /// Build a new, idle pipeline
    pub fn build(&self, title: &str, description: &str) -> Result<Pipeline, WorkflowError> {
        let id = Uuid::new_v4();

        let mut gates = QualityGateManager::new(self.checks.clone());
        for gate in &self.gates {
            gates.register(gate.clone())?;
        }

        let mut builder = PipelineBuilder::new(title)
            .id(id)
            .description(description)
            .stages(self.stages.iter().map(Stage::fresh_copy))
            .gates(gates)
            .log_tail(self.log_tail);

        if let Some(config) = &self.snapshots {
            // one backup directory per workflow so stage ids never collide
            let config = SnapshotConfig {
                backup_dir: config.backup_dir.join(id.to_string()),
                ..config.clone()
            };
            let mut snapshots = SnapshotManager::new(config);
            if let Some(tables) = &self.tables {
                snapshots = snapshots.with_table_store(tables.clone());
            }
            builder = builder.snapshots(Arc::new(snapshots));
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::StageStatus;

    #[test]
    fn test_default_stage_set() {
        let template = WorkflowTemplate::default_stage_set();
        let weights: Vec<_> = template
            .stages()
            .iter()
            .map(|s| (s.id.as_str(), s.weight))
            .collect();
        assert_eq!(
            weights,
            vec![
                ("analysis", 10.0),
                ("planning", 15.0),
                ("generation", 45.0),
                ("validation", 20.0),
                ("delivery", 10.0)
            ]
        );

        let gates = template.gates();
        assert_eq!(gates.len(), 3);
        assert!(!gates[0].blocking);
        assert_eq!(gates[0].threshold, 0.6);
        assert!(gates[1].blocking);
        assert_eq!(gates[1].threshold, 0.7);
        assert!(gates[2].blocking);
        assert_eq!(gates[2].threshold, 0.8);
    }

    #[tokio::test]
    async fn test_built_pipelines_have_independent_state() {
        let template = WorkflowTemplate::default_stage_set();
        let first = template.build("one", "").unwrap();
        let second = template.build("two", "").unwrap();
        assert_ne!(first.id(), second.id());

        first.skip_stage("analysis", "done by hand").await.unwrap();
        assert_eq!(first.stages()[0].status, StageStatus::Skipped);
        assert_eq!(second.stages()[0].status, StageStatus::Pending);
        assert_eq!(
            first.stages()[2].gate_id.as_deref(),
            Some("generation-gate")
        );
    }

    #[test]
    fn test_from_config() {
        let yaml = r#"
title: "Demo"
engine:
  snapshots: false
stages:
  - id: build
    name: Build
    weight: 2
    steps:
      - id: hello
        name: Hello
        run: "echo hi"
gates:
  - id: build-gate
    stage_id: build
    threshold: 0.5
    checks: [said-hi]
checks:
  - id: said-hi
    kind: pattern
    pattern: hi
"#;
        let config = WorkflowConfig::from_yaml(yaml).unwrap();
        let template = WorkflowTemplate::from_config(&config).unwrap();
        assert_eq!(template.stages().len(), 1);
        assert_eq!(template.stages()[0].steps().len(), 1);
        assert!(template.stages()[0].steps()[0].executor().is_some());
        assert_eq!(template.gates()[0].checks, vec!["said-hi".to_string()]);
        assert!(template.snapshots.is_none());

        let mut dangling = config.clone();
        dangling.gates[0].checks.push("missing".to_string());
        let err = WorkflowTemplate::from_config(&dangling).err().unwrap();
        assert!(err.to_string().contains("non-existent check 'missing'"));
    }

    #[test]
    fn test_bundled_release_workflow() {
        let config = WorkflowConfig::from_yaml(include_str!("../../workflows/release.yaml")).unwrap();
        let template = WorkflowTemplate::from_config(&config).unwrap();
        assert_eq!(template.stages().len(), 3);
        assert_eq!(template.stages()[1].gate_id.as_deref(), Some("verify-gate"));
        assert!(template.gates()[1].blocking);
        assert_eq!(template.snapshots.as_ref().unwrap().max_snapshots, 5);
    }
}
