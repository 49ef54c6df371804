use crate::error::RiskRejection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Decision class produced by the model ensemble
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalClass {
    Buy,
    Hold,
    Sell,
}

impl SignalClass {
    /// Index into a 3-way probability vector
    pub fn index(&self) -> usize {
        match self {
            SignalClass::Buy => 0,
            SignalClass::Hold => 1,
            SignalClass::Sell => 2,
        }
    }

    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => SignalClass::Buy,
            2 => SignalClass::Sell,
            _ => SignalClass::Hold,
        }
    }

    /// True when `other` is the opposite trade direction (Buy vs Sell)
    pub fn opposes(&self, other: SignalClass) -> bool {
        matches!(
            (self, other),
            (SignalClass::Buy, SignalClass::Sell) | (SignalClass::Sell, SignalClass::Buy)
        )
    }

    pub fn is_tradeable(&self) -> bool {
        *self != SignalClass::Hold
    }
}

impl std::fmt::Display for SignalClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalClass::Buy => write!(f, "BUY"),
            SignalClass::Hold => write!(f, "HOLD"),
            SignalClass::Sell => write!(f, "SELL"),
        }
    }
}

/// Lifecycle state of a signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalState {
    Active,
    Closed,
}

/// Condition that terminated an active signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExitReason {
    Target,
    StopLoss,
    SignalFlip,
    TimeDecay,
    RiskEvent,
}

impl ExitReason {
    pub fn code(&self) -> &'static str {
        match self {
            ExitReason::Target => "TARGET",
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::SignalFlip => "SIGNAL_FLIP",
            ExitReason::TimeDecay => "TIME_DECAY",
            ExitReason::RiskEvent => "RISK_EVENT",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// An unvalidated proposed trade awaiting risk approval.
///
/// Built per ticker per cycle and either promoted into a [`Signal`] by the
/// risk validator or discarded with a [`RejectionRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSignal {
    pub ticker: String,
    pub class: SignalClass,
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub target_price: f64,
}

/// A validated, tracked trading decision.
///
/// Created only by the risk validator on acceptance. Mutated only by the
/// lifecycle manager (or a risk-event halt) through [`Signal::close`], which
/// is forward-only: a closed signal is never resurrected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub ticker: String,
    pub class: SignalClass,
    pub state: SignalState,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub target_price: f64,
    /// Dollar exposure assigned by the risk validator
    pub position_size: f64,
    pub risk_reward_ratio: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
}

impl Signal {
    pub fn is_active(&self) -> bool {
        self.state == SignalState::Active
    }

    /// Transition to Closed, recording exactly one exit reason.
    ///
    /// Errors if the signal is already closed; states only move forward.
    pub fn close(
        &mut self,
        reason: ExitReason,
        exit_price: f64,
        closed_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if self.state == SignalState::Closed {
            anyhow::bail!(
                "signal {} for {} is already closed ({})",
                self.id,
                self.ticker,
                self.exit_reason.map(|r| r.code()).unwrap_or("?")
            );
        }
        self.state = SignalState::Closed;
        self.closed_at = Some(closed_at);
        self.exit_price = Some(exit_price);
        self.exit_reason = Some(reason);
        Ok(())
    }
}

/// Audit record for a candidate turned away by the risk validator.
///
/// Always recorded, never dropped: carries the candidate snapshot, the single
/// earliest-failing rule and a human-readable explanation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub candidate: CandidateSignal,
    pub reason: RiskRejection,
    pub message: String,
    pub rejected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_signal() -> Signal {
        Signal {
            id: Uuid::new_v4(),
            ticker: "AAPL".to_string(),
            class: SignalClass::Buy,
            state: SignalState::Active,
            entry_price: 100.0,
            stop_loss: 95.0,
            target_price: 110.0,
            position_size: 2000.0,
            risk_reward_ratio: 2.0,
            opened_at: Utc::now(),
            closed_at: None,
            exit_price: None,
            exit_reason: None,
        }
    }

    #[test]
    fn test_close_records_single_exit_reason() {
        let mut signal = active_signal();
        signal
            .close(ExitReason::Target, 110.0, Utc::now())
            .unwrap();

        assert_eq!(signal.state, SignalState::Closed);
        assert_eq!(signal.exit_reason, Some(ExitReason::Target));
        assert_eq!(signal.exit_price, Some(110.0));
        assert!(signal.closed_at.is_some());
    }

    #[test]
    fn test_closed_signal_is_never_mutated_again() {
        let mut signal = active_signal();
        signal
            .close(ExitReason::StopLoss, 95.0, Utc::now())
            .unwrap();

        let err = signal.close(ExitReason::Target, 110.0, Utc::now());
        assert!(err.is_err());
        assert_eq!(signal.exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(signal.exit_price, Some(95.0));
    }

    #[test]
    fn test_class_opposition() {
        assert!(SignalClass::Buy.opposes(SignalClass::Sell));
        assert!(SignalClass::Sell.opposes(SignalClass::Buy));
        assert!(!SignalClass::Buy.opposes(SignalClass::Hold));
        assert!(!SignalClass::Hold.opposes(SignalClass::Sell));
        assert!(!SignalClass::Buy.opposes(SignalClass::Buy));
    }
}
