//! Named quality checks and the registry gates resolve them from

use crate::core::{condition::ConditionPattern, context::WorkflowContext, error::ExecutorError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Result reported by a single check
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub passed: bool,
    /// Score in `[0, 1]`
    pub score: f64,
    pub message: String,
}

impl CheckOutcome {
    pub fn new(passed: bool, score: f64, message: impl Into<String>) -> Self {
        Self {
            passed,
            score,
            message: message.into(),
        }
    }

    pub fn pass(message: impl Into<String>) -> Self {
        Self::new(true, 1.0, message)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(false, 0.0, message)
    }

    /// Outcome whose pass flag is derived from a score and a pass mark
    pub fn scored(score: f64, pass_mark: f64, message: impl Into<String>) -> Self {
        Self::new(score >= pass_mark, score, message)
    }
}

/// A scoring function evaluated against a stage result
#[async_trait]
pub trait QualityCheck: Send + Sync {
    /// Display name
    fn name(&self) -> &str;

    async fn evaluate(
        &self,
        result: &Value,
        context: &WorkflowContext,
    ) -> Result<CheckOutcome, ExecutorError>;
}

/// Adapter turning a synchronous closure into a [`QualityCheck`]
pub struct FnCheck<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> QualityCheck for FnCheck<F>
where
    F: Fn(&Value, &WorkflowContext) -> CheckOutcome + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(
        &self,
        result: &Value,
        context: &WorkflowContext,
    ) -> Result<CheckOutcome, ExecutorError> {
        Ok((self.f)(result, context))
    }
}

/// Wrap a closure as a shared [`QualityCheck`]
pub fn check_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn QualityCheck>
where
    F: Fn(&Value, &WorkflowContext) -> CheckOutcome + Send + Sync + 'static,
{
    Arc::new(FnCheck {
        name: name.into(),
        f,
    })
}

fn result_text(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Passes when the stage result's text matches a pattern
pub struct PatternCheck {
    name: String,
    pattern: ConditionPattern,
}

impl PatternCheck {
    pub fn new(name: impl Into<String>, pattern: ConditionPattern) -> Self {
        Self {
            name: name.into(),
            pattern,
        }
    }
}

#[async_trait]
impl QualityCheck for PatternCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(
        &self,
        result: &Value,
        _context: &WorkflowContext,
    ) -> Result<CheckOutcome, ExecutorError> {
        let text = result_text(result);
        if self.pattern.matches(&text) {
            Ok(CheckOutcome::pass(format!(
                "Output matches {}",
                self.pattern.display()
            )))
        } else {
            Ok(CheckOutcome::fail(format!(
                "Output does not match {}",
                self.pattern.display()
            )))
        }
    }
}

/// Passes when the stage produced a non-empty result
pub struct NonEmptyCheck {
    name: String,
}

impl NonEmptyCheck {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty() || map.values().all(is_empty),
        _ => false,
    }
}

#[async_trait]
impl QualityCheck for NonEmptyCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(
        &self,
        result: &Value,
        _context: &WorkflowContext,
    ) -> Result<CheckOutcome, ExecutorError> {
        if is_empty(result) {
            Ok(CheckOutcome::fail("Stage produced no output"))
        } else {
            Ok(CheckOutcome::pass("Stage produced output"))
        }
    }
}

/// Reads a numeric score from the result, falling back to the context.
///
/// `field` is a dot-separated path, e.g. `metrics.coverage`.
pub struct ScoreFieldCheck {
    name: String,
    field: String,
    pass_mark: f64,
}

impl ScoreFieldCheck {
    pub fn new(name: impl Into<String>, field: impl Into<String>, pass_mark: f64) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            pass_mark,
        }
    }

    fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.field
            .split('.')
            .try_fold(value, |current, key| current.get(key))
    }
}

#[async_trait]
impl QualityCheck for ScoreFieldCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(
        &self,
        result: &Value,
        context: &WorkflowContext,
    ) -> Result<CheckOutcome, ExecutorError> {
        let from_context = Value::Object(context.snapshot());
        let score = self
            .lookup(result)
            .or_else(|| self.lookup(&from_context))
            .and_then(Value::as_f64);

        match score {
            Some(score) => Ok(CheckOutcome::scored(
                score,
                self.pass_mark,
                format!("{} = {:.2}", self.field, score),
            )),
            None => Ok(CheckOutcome::fail(format!("No numeric '{}' found", self.field))),
        }
    }
}

/// Named checks available to gates
#[derive(Clone, Default)]
pub struct CheckRegistry {
    checks: HashMap<String, Arc<dyn QualityCheck>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, check: Arc<dyn QualityCheck>) {
        self.checks.insert(id.into(), check);
    }

    pub fn with(mut self, id: impl Into<String>, check: Arc<dyn QualityCheck>) -> Self {
        self.register(id, check);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn QualityCheck>> {
        self.checks.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.checks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}
