//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{RunCommand, StagesCommand, ValidateCommand};
use std::ffi::OsString;

/// Staged workflow runner with quality gates
#[derive(Debug, Parser, Clone)]
#[command(name = "workflow")]
#[command(version = "0.1.0")]
#[command(about = "Run staged workflows with quality gates and checkpoint rollback", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a workflow
    Run(RunCommand),

    /// Validate a workflow configuration
    Validate(ValidateCommand),

    /// Show the stages and gates of a workflow
    Stages(StagesCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }

    /// Default tracing filter directive for this invocation
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "workflow_pipeline=debug,info"
        } else {
            "warn"
        }
    }
}
