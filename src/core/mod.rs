//! Core domain models for workflows
//!
//! This module defines the fundamental data structures: stages and their
//! steps, the shared context, lifecycle state, events and configuration.

pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod log;
pub mod stage;
pub mod state;
pub mod state_machine;
pub mod step;

pub use context::*;
pub use error::*;
pub use event::*;
pub use stage::*;
pub use state::*;
pub use step::*;
