//! CLI output formatting

use crate::core::{
    event::WorkflowEvent,
    log::{LogEntry, LogLevel},
    stage::Stage,
    state::{StageStatus, WorkflowState},
};
use crate::gates::QualityGate;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SHIELD: Emoji<'_, '_> = Emoji("🛡️  ", "# ");

/// Progress bar over the workflow's 0-100 weighted progress
pub fn create_progress_bar() -> ProgressBar {
    let progress = ProgressBar::new(100);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a workflow state for display
pub fn format_state(state: WorkflowState) -> String {
    match state {
        WorkflowState::Idle => style("IDLE").dim().to_string(),
        WorkflowState::Running => style("RUNNING").yellow().to_string(),
        WorkflowState::Paused => style("PAUSED").blue().to_string(),
        WorkflowState::Completed => style("COMPLETED").green().to_string(),
        WorkflowState::Failed => style("FAILED").red().to_string(),
        WorkflowState::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a stage status for display
pub fn format_stage_status(status: StageStatus) -> String {
    match status {
        StageStatus::Pending => style("PENDING").dim().to_string(),
        StageStatus::Running => style("RUNNING").yellow().to_string(),
        StageStatus::Completed => style("COMPLETED").green().to_string(),
        StageStatus::Failed => style("FAILED").red().to_string(),
        StageStatus::Skipped => style("SKIPPED").dim().to_string(),
    }
}

/// One line per notable event; `None` for events the progress bar covers
pub fn format_event(event: &WorkflowEvent) -> Option<String> {
    let line = match event {
        WorkflowEvent::WorkflowStarted {
            title,
            total_stages,
        } => format!(
            "{} Starting {} ({} stages)",
            ROCKET,
            style(title).bold(),
            total_stages
        ),
        WorkflowEvent::StageStarted { stage_id, name } => {
            format!("{} {} {}", SPINNER, style(name).cyan(), style(stage_id).dim())
        }
        WorkflowEvent::StageCompleted { stage_id, .. } => {
            format!("{} {}", CHECK, style(stage_id).green())
        }
        WorkflowEvent::StageError { stage_id, error } => {
            format!("{} {}: {}", CROSS, style(stage_id).red(), style(error).dim())
        }
        WorkflowEvent::StageSkipped { stage_id, reason } => {
            format!("{} {} skipped ({})", INFO, style(stage_id).dim(), reason)
        }
        WorkflowEvent::StepError {
            step_id, error, ..
        } => format!("{} step {}: {}", WARN, style(step_id).yellow(), style(error).dim()),
        WorkflowEvent::GateResult { result } if result.total_checks > 0 => {
            let verdict = if result.passed {
                style("passed").green()
            } else if result.blocking {
                style("failed").red()
            } else {
                style("failed (advisory)").yellow()
            };
            format!(
                "{} {} {} ({:.2} / {:.2})",
                SHIELD,
                style(&result.gate_name).bold(),
                verdict,
                result.score,
                result.threshold
            )
        }
        WorkflowEvent::SnapshotRestored { stage_id, success } => {
            let outcome = if *success {
                style("restored").green()
            } else {
                style("partially restored").yellow()
            };
            format!("{} Checkpoint for {} {}", INFO, style(stage_id).cyan(), outcome)
        }
        WorkflowEvent::Paused => format!("{} Paused", INFO),
        WorkflowEvent::Resumed => format!("{} Resumed", INFO),
        WorkflowEvent::Cancelled { reason } => {
            format!("{} Cancelled: {}", WARN, style(reason).dim())
        }
        _ => return None,
    };
    Some(line)
}

/// Format a workflow log entry
pub fn format_log_entry(entry: &LogEntry) -> String {
    let level = match entry.level {
        LogLevel::Debug => style("DEBUG").dim(),
        LogLevel::Info => style("INFO ").cyan(),
        LogLevel::Warn => style("WARN ").yellow(),
        LogLevel::Error => style("ERROR").red(),
    };
    let stage = entry
        .stage_id
        .as_deref()
        .map(|id| format!(" [{}]", id))
        .unwrap_or_default();
    format!(
        "{} {}{} {}",
        style(entry.timestamp.format("%H:%M:%S")).dim(),
        level,
        style(stage).dim(),
        entry.message
    )
}

/// Relative weight of each stage as a whole percentage of the total
pub fn weight_shares(stages: &[Stage]) -> Vec<f64> {
    let total: f64 = stages.iter().map(|s| s.weight).sum();
    stages
        .iter()
        .map(|s| if total > 0.0 { s.weight / total * 100.0 } else { 0.0 })
        .collect()
}

/// Format a stage line with its weight share and bound gate
pub fn format_stage_line(
    index: usize,
    stage: &Stage,
    share: f64,
    gate: Option<&QualityGate>,
) -> String {
    let gate = match gate {
        Some(gate) => format!(
            " {} {} >= {:.2}{}",
            SHIELD,
            gate.id,
            gate.threshold,
            if gate.blocking { " (blocking)" } else { "" }
        ),
        None => String::new(),
    };
    format!(
        "  {}. {} {} {}{}",
        index + 1,
        style(&stage.name).bold(),
        style(format!("({})", stage.id)).dim(),
        style(format!("{:.0}%", share)).cyan(),
        gate
    )
}

/// Format a duration the way the run summary shows it
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 1 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Format stage output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}
