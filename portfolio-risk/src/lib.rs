//! Risk validation for candidate signals
//!
//! Gates every candidate through a fixed, ordered rule battery against one
//! consistent portfolio snapshot, and owns the single long-lived piece of
//! shared mutable state (the risk context with its sticky halt flag).

pub mod config;
pub mod context;
pub mod validator;

pub use config::RiskConfig;
pub use context::{RiskContext, RiskState};
pub use validator::{RiskValidator, RuleOutcome, RuleTrace, ValidatorStats};
