//! Shell command step executor

use crate::core::{
    context::WorkflowContext,
    error::ExecutorError,
    step::{StepExecutor, StepHandle},
};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Runs a command through `sh -c`.
///
/// `{{ key }}` placeholders are filled from the context and `{{ input }}`
/// from the stage input. Stdout is the step output: parsed as JSON when it
/// is valid JSON, otherwise kept as trimmed text.
#[derive(Debug, Clone)]
pub struct ShellStep {
    command: String,
    timeout_secs: u64,
    working_dir: Option<PathBuf>,
}

impl ShellStep {
    pub fn new(command: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            command: command.into(),
            timeout_secs,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Substitute placeholders in the command template
    pub fn render(&self, input: &Value, context: &WorkflowContext) -> String {
        let mut rendered = self.command.clone();
        rendered = rendered.replace("{{ input }}", &render_value(input));
        for (key, value) in context.snapshot() {
            let placeholder = format!("{{{{ {} }}}}", key);
            if rendered.contains(&placeholder) {
                rendered = rendered.replace(&placeholder, &render_value(&value));
            }
        }
        rendered
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl StepExecutor for ShellStep {
    async fn run(
        &self,
        input: &Value,
        context: &WorkflowContext,
        step: &StepHandle<'_>,
    ) -> Result<Value, ExecutorError> {
        if step.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }

        let command = self.render(input, context);
        debug!("Step {}: running `{}`", step.step_id(), command);
        step.set_message(format!("$ {}", command));

        let mut process = Command::new("sh");
        process.arg("-c").arg(&command).kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            process.current_dir(dir);
        }

        let output = timeout(Duration::from_secs(self.timeout_secs), process.output())
            .await
            .map_err(|_| ExecutorError::Timeout(self.timeout_secs))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            warn!("`{}` exited with code {}: {}", command, exit_code, stderr.trim());
            return Err(ExecutorError::Failed(format!(
                "command exited with code {}: {}",
                exit_code,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let text = stdout.trim();
        debug!("Step {} produced {} bytes", step.step_id(), text.len());
        Ok(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
    }
}
