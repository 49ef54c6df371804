//! Error taxonomy shared across the engine
//!
//! Fetch faults are classified structurally (by a status-like kind, never by
//! free-text matching); risk rejections carry the single earliest-failing
//! rule; lifecycle inconsistencies are fatal to one cycle, never the process.

use serde::{Deserialize, Serialize};

/// Structural classification of an upstream fault
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FaultKind {
    RateLimited,
    Timeout,
    Connection,
    ServerError,
    Unauthenticated,
    Forbidden,
    NotFound,
}

impl FaultKind {
    /// Transient faults are retried; permanent faults abort immediately
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FaultKind::RateLimited
                | FaultKind::Timeout
                | FaultKind::Connection
                | FaultKind::ServerError
        )
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FaultKind::RateLimited => "rate_limited",
            FaultKind::Timeout => "timeout",
            FaultKind::Connection => "connection",
            FaultKind::ServerError => "server_error",
            FaultKind::Unauthenticated => "unauthenticated",
            FaultKind::Forbidden => "forbidden",
            FaultKind::NotFound => "not_found",
        };
        write!(f, "{}", name)
    }
}

/// The explicit fault value returned by a wrapped upstream operation.
///
/// The gateway driver loop inspects the classification instead of branching
/// on error types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchFault {
    pub kind: FaultKind,
    pub message: String,
}

impl FetchFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FetchFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FetchFault {}

/// Terminal outcome of a gateway operation that did not produce a value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FetchError {
    /// Transient fault that survived every allowed attempt
    Transient {
        source_id: String,
        kind: FaultKind,
        attempts: u32,
        last_error: String,
    },
    /// Permanent fault, aborted without a second attempt
    Permanent {
        source_id: String,
        kind: FaultKind,
        attempts: u32,
        last_error: String,
    },
    /// Cycle deadline or bounded wait expired mid-operation
    Timeout { source_id: String, attempts: u32 },
}

impl FetchError {
    pub fn attempts(&self) -> u32 {
        match self {
            FetchError::Transient { attempts, .. }
            | FetchError::Permanent { attempts, .. }
            | FetchError::Timeout { attempts, .. } => *attempts,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            FetchError::Transient { .. } => "FETCH_TRANSIENT",
            FetchError::Permanent { .. } => "FETCH_PERMANENT",
            FetchError::Timeout { .. } => "FETCH_TIMEOUT",
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Transient {
                source_id,
                kind,
                attempts,
                last_error,
            } => write!(
                f,
                "transient fault from {} after {} attempts ({}): {}",
                source_id, attempts, kind, last_error
            ),
            FetchError::Permanent {
                source_id,
                kind,
                attempts,
                last_error,
            } => write!(
                f,
                "permanent fault from {} on attempt {} ({}): {}",
                source_id, attempts, kind, last_error
            ),
            FetchError::Timeout {
                source_id,
                attempts,
            } => write!(
                f,
                "operation against {} cancelled by deadline after {} attempts",
                source_id, attempts
            ),
        }
    }
}

impl std::error::Error for FetchError {}

/// Ordered rejection codes from the risk rule battery
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RiskRejection {
    LowConfidence,
    InvalidPriceLevels,
    RrTooLow,
    PositionTooSmall,
    MaxPositionsReached,
    DrawdownHalt,
}

impl RiskRejection {
    pub fn code(&self) -> &'static str {
        match self {
            RiskRejection::LowConfidence => "LOW_CONFIDENCE",
            RiskRejection::InvalidPriceLevels => "INVALID_PRICE_LEVELS",
            RiskRejection::RrTooLow => "RR_TOO_LOW",
            RiskRejection::PositionTooSmall => "POSITION_TOO_SMALL",
            RiskRejection::MaxPositionsReached => "MAX_POSITIONS_REACHED",
            RiskRejection::DrawdownHalt => "DRAWDOWN_HALT",
        }
    }
}

impl std::fmt::Display for RiskRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::error::Error for RiskRejection {}

/// A lifecycle evaluation was asked to mix data from two cycles.
///
/// Fails that cycle's report; the process and the signal book survive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleInconsistency {
    pub signal_id: uuid::Uuid,
    pub ticker: String,
    pub detail: String,
}

impl std::fmt::Display for LifecycleInconsistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "lifecycle inconsistency for signal {} ({}): {}",
            self.signal_id, self.ticker, self.detail
        )
    }
}

impl std::error::Error for LifecycleInconsistency {}
