//! Quality gate definitions and results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for gate operations
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Quality gate not found: {0}")]
    NotFound(String),

    #[error("Duplicate quality gate: {0}")]
    Duplicate(String),

    #[error("Gate '{gate_id}' threshold {threshold} is outside [0, 1]")]
    InvalidThreshold { gate_id: String, threshold: f64 },
}

/// A named, threshold-based check bound to a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGate {
    pub id: String,
    pub name: String,

    /// Stage this gate is evaluated after
    pub stage_id: String,

    /// Check identifiers, run in order
    #[serde(default)]
    pub checks: Vec<String>,

    /// Minimum average score to pass, in `[0, 1]`
    pub threshold: f64,

    /// A failed blocking gate halts the pipeline
    #[serde(default)]
    pub blocking: bool,

    #[serde(default)]
    pub description: String,
}

impl QualityGate {
    pub fn new(id: impl Into<String>, stage_id: impl Into<String>, threshold: f64) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            stage_id: stage_id.into(),
            checks: Vec::new(),
            threshold,
            blocking: false,
            description: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_check(mut self, check_id: impl Into<String>) -> Self {
        self.checks.push(check_id.into());
        self
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn validate(&self) -> Result<(), GateError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(GateError::InvalidThreshold {
                gate_id: self.id.clone(),
                threshold: self.threshold,
            });
        }
        Ok(())
    }
}

/// Outcome of one check within a gate run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_id: String,
    pub name: String,
    pub passed: bool,
    pub score: f64,
    pub message: String,
}

/// Latest evaluation of a gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub gate_id: String,
    pub gate_name: String,
    pub passed: bool,
    pub score: f64,
    pub threshold: f64,
    pub blocking: bool,
    pub checks: Vec<CheckResult>,
    pub passed_checks: usize,
    pub total_checks: usize,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl GateResult {
    /// Permissive result for a stage with no configured gate
    pub fn unconfigured(id: &str) -> Self {
        Self {
            gate_id: id.to_string(),
            gate_name: id.to_string(),
            passed: true,
            score: 1.0,
            threshold: 0.0,
            blocking: false,
            checks: Vec::new(),
            passed_checks: 0,
            total_checks: 0,
            message: "No quality gate configured".to_string(),
            timestamp: Utc::now(),
        }
    }

    /// A failed gate that halts the pipeline
    pub fn is_blocking_failure(&self) -> bool {
        !self.passed && self.blocking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_bounds() {
        assert!(QualityGate::new("g", "s", 0.0).validate().is_ok());
        assert!(QualityGate::new("g", "s", 1.0).validate().is_ok());
        assert!(QualityGate::new("g", "s", 1.5).validate().is_err());
        assert!(QualityGate::new("g", "s", f64::NAN).validate().is_err());
    }

    #[test]
    fn test_unconfigured_result_never_blocks() {
        let result = GateResult::unconfigured("stage-x");
        assert!(result.passed);
        assert!(!result.blocking);
        assert!(!result.is_blocking_failure());
    }
}
