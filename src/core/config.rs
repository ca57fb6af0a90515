//! Workflow configuration from YAML

use crate::core::stage::CheckpointPolicy;
use crate::snapshot::SnapshotConfig;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Top-level workflow definition loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub title: String,

    #[serde(default)]
    pub description: String,

    /// Initial context values, overridable from the command line
    #[serde(default)]
    pub variables: HashMap<String, serde_yaml::Value>,

    pub stages: Vec<StageConfig>,

    #[serde(default)]
    pub gates: Vec<GateConfig>,

    #[serde(default)]
    pub checks: Vec<CheckConfig>,

    #[serde(default)]
    pub engine: EngineConfig,
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Gate evaluated after the stage
    #[serde(default)]
    pub gate: Option<String>,

    #[serde(default)]
    pub checkpoint: CheckpointPolicy,

    pub steps: Vec<StepConfig>,
}

fn default_weight() -> f64 {
    1.0
}

/// A step that runs a shell command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Command template; `{{ key }}` placeholders come from the context,
    /// `{{ input }}` is the stage input
    pub run: String,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    pub stage_id: String,
    pub threshold: f64,

    #[serde(default)]
    pub blocking: bool,

    #[serde(default)]
    pub checks: Vec<String>,

    #[serde(default)]
    pub description: String,
}

/// Named check; `kind` selects one of the built-in check types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(flatten)]
    pub kind: CheckKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckKind {
    /// Stage output contains (or matches) a pattern
    Pattern {
        pattern: String,
        #[serde(default)]
        use_regex: bool,
    },
    /// Stage output is not empty
    NonEmpty,
    /// Numeric field read from the output or the context
    ScoreField {
        field: String,
        #[serde(default = "default_pass_mark")]
        pass_mark: f64,
    },
}

fn default_pass_mark() -> f64 {
    0.5
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Checkpoint each stage and roll back on failure
    #[serde(default = "default_true")]
    pub snapshots: bool,

    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,

    /// Defaults to the local data directory
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,

    /// Log entries included in status reports
    #[serde(default = "default_log_tail")]
    pub log_tail: usize,

    /// Default timeout for shell steps (in seconds)
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_snapshots() -> usize {
    10
}

fn default_log_tail() -> usize {
    20
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshots: default_true(),
            max_snapshots: default_max_snapshots(),
            backup_dir: None,
            log_tail: default_log_tail(),
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

impl EngineConfig {
    pub fn snapshot_config(&self) -> SnapshotConfig {
        let mut config = SnapshotConfig {
            max_snapshots: self.max_snapshots,
            ..SnapshotConfig::default()
        };
        if let Some(dir) = &self.backup_dir {
            config.backup_dir = dir.clone();
        }
        config
    }
}

impl WorkflowConfig {
    /// Load workflow configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse workflow configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WorkflowConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the workflow configuration
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            bail!("Workflow '{}' has no stages", self.title);
        }

        let mut stage_ids = HashSet::new();
        for stage in &self.stages {
            if !stage_ids.insert(stage.id.as_str()) {
                bail!("Duplicate stage ID: {}", stage.id);
            }
            if !(stage.weight.is_finite() && stage.weight > 0.0) {
                bail!("Stage '{}' has invalid weight {}", stage.id, stage.weight);
            }
            if stage.steps.is_empty() {
                bail!("Stage '{}' has no steps", stage.id);
            }
            let mut step_ids = HashSet::new();
            for step in &stage.steps {
                if !step_ids.insert(step.id.as_str()) {
                    bail!("Duplicate step ID '{}' in stage '{}'", step.id, stage.id);
                }
            }
        }

        let check_ids: HashSet<_> = self.checks.iter().map(|c| c.id.as_str()).collect();
        if check_ids.len() != self.checks.len() {
            bail!("Duplicate check ID in workflow '{}'", self.title);
        }

        let mut gate_ids = HashSet::new();
        for gate in &self.gates {
            if !gate_ids.insert(gate.id.as_str()) {
                bail!("Duplicate gate ID: {}", gate.id);
            }
            if !(0.0..=1.0).contains(&gate.threshold) {
                bail!(
                    "Gate '{}' threshold {} is outside [0, 1]",
                    gate.id,
                    gate.threshold
                );
            }
            if !stage_ids.contains(gate.stage_id.as_str()) {
                bail!(
                    "Gate '{}' references non-existent stage '{}'",
                    gate.id,
                    gate.stage_id
                );
            }
            for check in &gate.checks {
                if !check_ids.contains(check.as_str()) {
                    bail!("Gate '{}' references non-existent check '{}'", gate.id, check);
                }
            }
        }

        for stage in &self.stages {
            if let Some(gate) = &stage.gate {
                if !gate_ids.contains(gate.as_str()) {
                    bail!("Stage '{}' references non-existent gate '{}'", stage.id, gate);
                }
            }
        }

        Ok(())
    }

    /// Variables as JSON context values
    pub fn context_variables(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut vars = serde_json::Map::new();
        for (key, value) in &self.variables {
            vars.insert(key.clone(), serde_json::to_value(value)?);
        }
        Ok(vars)
    }
}
