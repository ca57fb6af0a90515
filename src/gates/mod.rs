//! Quality gates evaluated between stages

pub mod check;
pub mod gate;
pub mod manager;

pub use check::{
    check_fn, CheckOutcome, CheckRegistry, FnCheck, NonEmptyCheck, PatternCheck, QualityCheck,
    ScoreFieldCheck,
};
pub use gate::{CheckResult, GateError, GateResult, QualityGate};
pub use manager::{GateSummary, QualityGateManager};
