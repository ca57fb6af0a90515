//! Quality gate manager - runs checks and records pass/fail per gate

use crate::core::{
    context::WorkflowContext,
    event::{EventBus, WorkflowEvent},
    state::GateStatus,
};
use crate::gates::{
    check::CheckRegistry,
    gate::{CheckResult, GateError, GateResult, QualityGate},
};
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Compact per-gate view used by status listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSummary {
    pub status: GateStatus,
    pub score: Option<f64>,
    pub passed: Option<bool>,
    pub blocking: bool,
}

#[derive(Debug, Clone)]
struct GateRuntime {
    status: GateStatus,
    result: Option<GateResult>,
    override_reason: Option<String>,
}

impl GateRuntime {
    fn pending() -> Self {
        Self {
            status: GateStatus::Pending,
            result: None,
            override_reason: None,
        }
    }
}

/// Registry of gates for one workflow
pub struct QualityGateManager {
    gates: IndexMap<String, QualityGate>,
    checks: CheckRegistry,
    runtime: Mutex<HashMap<String, GateRuntime>>,
    events: Option<EventBus>,
}

impl QualityGateManager {
    pub fn new(checks: CheckRegistry) -> Self {
        Self {
            gates: IndexMap::new(),
            checks,
            runtime: Mutex::new(HashMap::new()),
            events: None,
        }
    }

    /// Register a gate. Gates are immutable once registered.
    pub fn register(&mut self, gate: QualityGate) -> Result<(), GateError> {
        gate.validate()?;
        if self.gates.contains_key(&gate.id) {
            return Err(GateError::Duplicate(gate.id));
        }
        for check in &gate.checks {
            if !self.checks.contains(check) {
                warn!("Gate {} references unknown check {}", gate.id, check);
            }
        }
        self.runtime
            .get_mut()
            .insert(gate.id.clone(), GateRuntime::pending());
        self.gates.insert(gate.id.clone(), gate);
        Ok(())
    }

    pub fn with_gate(mut self, gate: QualityGate) -> Result<Self, GateError> {
        self.register(gate)?;
        Ok(self)
    }

    pub(crate) fn attach_events(&mut self, events: EventBus) {
        self.events = Some(events);
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    pub fn gate(&self, id: &str) -> Option<&QualityGate> {
        self.gates.get(id)
    }

    pub fn gates(&self) -> impl Iterator<Item = &QualityGate> {
        self.gates.values()
    }

    /// Resolve by gate id first, then by bound stage id
    fn resolve(&self, gate_or_stage_id: &str) -> Option<&QualityGate> {
        self.gates.get(gate_or_stage_id).or_else(|| {
            self.gates
                .values()
                .find(|gate| gate.stage_id == gate_or_stage_id)
        })
    }

    /// Evaluate a gate against a stage result.
    ///
    /// An unknown id yields a passing, non-blocking result.
    pub async fn check(
        &self,
        gate_or_stage_id: &str,
        stage_result: &Value,
        context: &WorkflowContext,
    ) -> GateResult {
        let Some(gate) = self.resolve(gate_or_stage_id) else {
            debug!("No quality gate for {}, passing", gate_or_stage_id);
            return GateResult::unconfigured(gate_or_stage_id);
        };

        {
            let mut runtime = self.runtime.lock().await;
            let entry = runtime
                .entry(gate.id.clone())
                .or_insert_with(GateRuntime::pending);
            if entry.status == GateStatus::Skipped {
                let reason = entry.override_reason.clone().unwrap_or_default();
                info!("Gate {} is overridden, skipping checks", gate.id);
                let result = GateResult {
                    gate_id: gate.id.clone(),
                    gate_name: gate.name.clone(),
                    passed: true,
                    score: entry.result.as_ref().map(|r| r.score).unwrap_or(0.0),
                    threshold: gate.threshold,
                    blocking: gate.blocking,
                    checks: Vec::new(),
                    passed_checks: 0,
                    total_checks: 0,
                    message: format!("Gate overridden: {}", reason),
                    timestamp: Utc::now(),
                };
                entry.result = Some(result.clone());
                drop(runtime);
                self.emit(WorkflowEvent::GateResult {
                    result: result.clone(),
                });
                return result;
            }
            entry.status = GateStatus::Checking;
        }

        self.emit(WorkflowEvent::GateChecking {
            gate_id: gate.id.clone(),
            stage_id: gate.stage_id.clone(),
        });

        let mut checks = Vec::new();
        for check_id in &gate.checks {
            let Some(check) = self.checks.get(check_id) else {
                warn!("Check {} for gate {} has no executor, skipping", check_id, gate.id);
                continue;
            };
            let result = match check.evaluate(stage_result, context).await {
                Ok(outcome) => {
                    let score = if outcome.score.is_nan() {
                        0.0
                    } else {
                        outcome.score.clamp(0.0, 1.0)
                    };
                    CheckResult {
                        check_id: check_id.clone(),
                        name: check.name().to_string(),
                        passed: outcome.passed,
                        score,
                        message: outcome.message,
                    }
                }
                Err(e) => {
                    warn!("Check {} for gate {} errored: {}", check_id, gate.id, e);
                    CheckResult {
                        check_id: check_id.clone(),
                        name: check.name().to_string(),
                        passed: false,
                        score: 0.0,
                        message: e.to_string(),
                    }
                }
            };
            checks.push(result);
        }

        let total_checks = checks.len();
        let passed_checks = checks.iter().filter(|c| c.passed).count();
        let score = if total_checks == 0 {
            0.0
        } else {
            checks.iter().map(|c| c.score).sum::<f64>() / total_checks as f64
        };
        let passed = score >= gate.threshold;
        let message = if passed {
            format!(
                "{} passed ({:.2} >= {:.2}, {}/{} checks)",
                gate.name, score, gate.threshold, passed_checks, total_checks
            )
        } else {
            format!(
                "{} failed ({:.2} < {:.2}, {}/{} checks)",
                gate.name, score, gate.threshold, passed_checks, total_checks
            )
        };

        let result = GateResult {
            gate_id: gate.id.clone(),
            gate_name: gate.name.clone(),
            passed,
            score,
            threshold: gate.threshold,
            blocking: gate.blocking,
            checks,
            passed_checks,
            total_checks,
            message,
            timestamp: Utc::now(),
        };
        info!("{}", result.message);

        {
            let mut runtime = self.runtime.lock().await;
            let entry = runtime
                .entry(gate.id.clone())
                .or_insert_with(GateRuntime::pending);
            entry.status = if passed {
                GateStatus::Passed
            } else {
                GateStatus::Failed
            };
            entry.result = Some(result.clone());
        }

        self.emit(WorkflowEvent::GateResult {
            result: result.clone(),
        });
        result
    }

    /// Force a gate to `Skipped`, blocking or not
    pub async fn override_gate(&self, gate_id: &str, reason: &str) -> Result<(), GateError> {
        let gate = self
            .gates
            .get(gate_id)
            .ok_or_else(|| GateError::NotFound(gate_id.to_string()))?;
        if gate.blocking {
            warn!("Overriding blocking gate {}: {}", gate_id, reason);
        } else {
            info!("Overriding gate {}: {}", gate_id, reason);
        }

        let mut runtime = self.runtime.lock().await;
        let entry = runtime
            .entry(gate_id.to_string())
            .or_insert_with(GateRuntime::pending);
        entry.status = GateStatus::Skipped;
        entry.override_reason = Some(reason.to_string());
        Ok(())
    }

    /// Return every gate to `Pending` and drop results
    pub async fn reset(&self) {
        let mut runtime = self.runtime.lock().await;
        for entry in runtime.values_mut() {
            *entry = GateRuntime::pending();
        }
    }

    pub async fn reset_gate(&self, gate_id: &str) -> Result<(), GateError> {
        if !self.gates.contains_key(gate_id) {
            return Err(GateError::NotFound(gate_id.to_string()));
        }
        self.runtime
            .lock()
            .await
            .insert(gate_id.to_string(), GateRuntime::pending());
        Ok(())
    }

    pub async fn status(&self, gate_id: &str) -> Option<GateStatus> {
        self.runtime.lock().await.get(gate_id).map(|r| r.status)
    }

    pub async fn result(&self, gate_id: &str) -> Option<GateResult> {
        self.runtime
            .lock()
            .await
            .get(gate_id)
            .and_then(|r| r.result.clone())
    }

    /// Map of gate id to status, score, passed and blocking flag
    pub async fn summaries(&self) -> IndexMap<String, GateSummary> {
        let runtime = self.runtime.lock().await;
        self.gates
            .values()
            .map(|gate| {
                let entry = runtime.get(&gate.id);
                let result = entry.and_then(|r| r.result.as_ref());
                let summary = GateSummary {
                    status: entry.map(|r| r.status).unwrap_or(GateStatus::Pending),
                    score: result.map(|r| r.score),
                    passed: result.map(|r| r.passed),
                    blocking: gate.blocking,
                };
                (gate.id.clone(), summary)
            })
            .collect()
    }
}
