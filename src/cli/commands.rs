//! CLI command definitions

use clap::Args;
use serde_json::Value;

/// Run a workflow
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    /// Context overrides (key=value); values are parsed as JSON when possible
    #[arg(long, value_parser = parse_key_value)]
    pub var: Vec<(String, String)>,

    /// Input passed to the first stage
    #[arg(short, long)]
    pub input: Option<String>,

    /// Print the final result as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunCommand {
    /// The first stage's input, `null` when none was given
    pub fn input_value(&self) -> Value {
        self.input.as_deref().map(parse_value).unwrap_or(Value::Null)
    }
}

/// Validate a workflow configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show stages and gates
#[derive(Debug, Args, Clone)]
pub struct StagesCommand {
    /// Workflow YAML file; the built-in stage set is shown when omitted
    #[arg(short, long)]
    pub file: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}

/// JSON if the text parses as JSON, otherwise a plain string
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
