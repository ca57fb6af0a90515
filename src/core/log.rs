//! Append-only workflow log, mirrored into `tracing`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<String>,
}

#[derive(Debug)]
pub struct WorkflowLog {
    workflow_id: Uuid,
    entries: Vec<LogEntry>,
}

impl WorkflowLog {
    pub fn new(workflow_id: Uuid) -> Self {
        Self {
            workflow_id,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, level: LogLevel, message: impl Into<String>, stage_id: Option<&str>) {
        let message = message.into();
        let stage = stage_id.unwrap_or("-");
        match level {
            LogLevel::Debug => debug!(workflow = %self.workflow_id, stage, "{}", message),
            LogLevel::Info => info!(workflow = %self.workflow_id, stage, "{}", message),
            LogLevel::Warn => warn!(workflow = %self.workflow_id, stage, "{}", message),
            LogLevel::Error => error!(workflow = %self.workflow_id, stage, "{}", message),
        }
        self.entries.push(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
            stage_id: stage_id.map(str::to_string),
        });
    }

    pub fn info(&mut self, message: impl Into<String>, stage_id: Option<&str>) {
        self.push(LogLevel::Info, message, stage_id);
    }

    pub fn warn(&mut self, message: impl Into<String>, stage_id: Option<&str>) {
        self.push(LogLevel::Warn, message, stage_id);
    }

    pub fn error(&mut self, message: impl Into<String>, stage_id: Option<&str>) {
        self.push(LogLevel::Error, message, stage_id);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// The most recent `limit` entries, oldest first
    pub fn tail(&self, limit: usize) -> Vec<LogEntry> {
        let start = self.entries.len().saturating_sub(limit);
        self.entries[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_returns_most_recent() {
        let mut log = WorkflowLog::new(Uuid::new_v4());
        for i in 0..5 {
            log.info(format!("entry {}", i), None);
        }
        log.warn("careful", Some("build"));

        let tail = log.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].message, "entry 4");
        assert_eq!(tail[1].level, LogLevel::Warn);
        assert_eq!(tail[1].stage_id.as_deref(), Some("build"));
        assert_eq!(log.tail(100).len(), 6);
    }
}
