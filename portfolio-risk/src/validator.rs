//! The ordered risk rule battery
//!
//! Rules run in a fixed order and short-circuit on the first failure, so a
//! rejection reason is always reproducible: a candidate failing several
//! rules is reported with the earliest one only.

use crate::config::RiskConfig;
use crate::context::{RiskContext, RiskState};
use chrono::{DateTime, Utc};
use common::{CandidateSignal, RejectionRecord, RiskRejection, Signal, SignalClass, SignalState};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One rule's verdict, kept for the audit trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule: &'static str,
    pub passed: bool,
    pub detail: String,
}

pub type RuleTrace = Vec<RuleOutcome>;

/// Validation counters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValidatorStats {
    pub validations: u64,
    pub accepted: u64,
    pub rejected: u64,
}

struct Sizing {
    risk_per_share: f64,
    reward_per_share: f64,
    risk_reward_ratio: f64,
    position_value: f64,
}

/// Gates candidate signals against the ordered rule battery and computes
/// position sizing for the ones that pass.
pub struct RiskValidator {
    config: RiskConfig,
    validations: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl RiskValidator {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            validations: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn stats(&self) -> ValidatorStats {
        ValidatorStats {
            validations: self.validations.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Run the full battery against one consistent portfolio snapshot.
    ///
    /// On acceptance returns a fully-populated ACTIVE signal plus the rule
    /// trace. On failure returns a rejection carrying the earliest failing
    /// rule. The drawdown rule additionally trips the sticky halt on
    /// `state`, blocking every future candidate until an external reset.
    pub fn validate(
        &self,
        candidate: &CandidateSignal,
        ctx: &RiskContext,
        state: &RiskState,
        now: DateTime<Utc>,
    ) -> Result<(Signal, RuleTrace), RejectionRecord> {
        self.validations.fetch_add(1, Ordering::Relaxed);
        let mut trace = RuleTrace::new();

        // 1. Confidence floor
        if candidate.confidence < self.config.min_confidence {
            return Err(self.reject(
                candidate,
                &mut trace,
                RiskRejection::LowConfidence,
                "confidence floor",
                format!(
                    "confidence {:.2} below minimum {:.2}",
                    candidate.confidence, self.config.min_confidence
                ),
                now,
            ));
        }
        trace.push(pass(
            "confidence floor",
            format!(
                "confidence {:.2} >= {:.2}",
                candidate.confidence, self.config.min_confidence
            ),
        ));

        // 2. Price-level sanity
        if let Err(detail) = check_price_levels(candidate) {
            return Err(self.reject(
                candidate,
                &mut trace,
                RiskRejection::InvalidPriceLevels,
                "price levels",
                detail,
                now,
            ));
        }
        trace.push(pass(
            "price levels",
            format!(
                "stop {:.2} / entry {:.2} / target {:.2} ordered for {}",
                candidate.stop_loss, candidate.entry_price, candidate.target_price, candidate.class
            ),
        ));

        // 3. Risk/reward
        let sizing = self.size(candidate, ctx);
        if sizing.risk_reward_ratio < self.config.min_risk_reward {
            return Err(self.reject(
                candidate,
                &mut trace,
                RiskRejection::RrTooLow,
                "risk/reward",
                format!(
                    "ratio {:.2} below minimum {:.1}",
                    sizing.risk_reward_ratio, self.config.min_risk_reward
                ),
                now,
            ));
        }
        trace.push(pass(
            "risk/reward",
            format!(
                "{:.2} risked for {:.2} sought, ratio {:.2}",
                sizing.risk_per_share, sizing.reward_per_share, sizing.risk_reward_ratio
            ),
        ));

        // 4. Position sizing
        if sizing.position_value.round() == 0.0 {
            return Err(self.reject(
                candidate,
                &mut trace,
                RiskRejection::PositionTooSmall,
                "position sizing",
                format!(
                    "computed position ${:.2} rounds to zero",
                    sizing.position_value
                ),
                now,
            ));
        }
        trace.push(pass(
            "position sizing",
            format!(
                "${:.2} position, capped at {:.0}% of ${:.2}",
                sizing.position_value,
                self.config.max_position_fraction * 100.0,
                ctx.portfolio_value
            ),
        ));

        // 5. Portfolio constraints
        if ctx.open_positions >= self.config.max_open_positions {
            return Err(self.reject(
                candidate,
                &mut trace,
                RiskRejection::MaxPositionsReached,
                "portfolio constraints",
                format!(
                    "{} open positions, limit {}",
                    ctx.open_positions, self.config.max_open_positions
                ),
                now,
            ));
        }
        if ctx.halted || ctx.drawdown >= self.config.max_drawdown {
            if ctx.drawdown >= self.config.max_drawdown {
                // Escalates beyond this candidate: the halt stays until an
                // external reset.
                state.trip_halt();
            }
            return Err(self.reject(
                candidate,
                &mut trace,
                RiskRejection::DrawdownHalt,
                "portfolio constraints",
                format!(
                    "drawdown {:.1}% / halt flag {} (limit {:.0}%)",
                    ctx.drawdown * 100.0,
                    ctx.halted,
                    self.config.max_drawdown * 100.0
                ),
                now,
            ));
        }
        trace.push(pass(
            "portfolio constraints",
            format!(
                "{}/{} positions, drawdown {:.1}%",
                ctx.open_positions,
                self.config.max_open_positions,
                ctx.drawdown * 100.0
            ),
        ));

        self.accepted.fetch_add(1, Ordering::Relaxed);
        let signal = Signal {
            id: Uuid::new_v4(),
            ticker: candidate.ticker.clone(),
            class: candidate.class,
            state: SignalState::Active,
            entry_price: candidate.entry_price,
            stop_loss: candidate.stop_loss,
            target_price: candidate.target_price,
            position_size: sizing.position_value,
            risk_reward_ratio: sizing.risk_reward_ratio,
            opened_at: now,
            closed_at: None,
            exit_price: None,
            exit_reason: None,
        };

        info!(
            ticker = %signal.ticker,
            class = %signal.class,
            entry = signal.entry_price,
            position = signal.position_size,
            rr = signal.risk_reward_ratio,
            "signal accepted"
        );

        Ok((signal, trace))
    }

    fn size(&self, candidate: &CandidateSignal, ctx: &RiskContext) -> Sizing {
        let (risk_per_share, reward_per_share) = match candidate.class {
            SignalClass::Sell => (
                candidate.stop_loss - candidate.entry_price,
                candidate.entry_price - candidate.target_price,
            ),
            _ => (
                candidate.entry_price - candidate.stop_loss,
                candidate.target_price - candidate.entry_price,
            ),
        };

        let risk_reward_ratio = if risk_per_share > 0.0 {
            reward_per_share / risk_per_share
        } else {
            0.0
        };

        let risk_amount = ctx.portfolio_value * self.config.max_risk_per_trade;
        let position_value = if risk_per_share > 0.0 {
            let shares = risk_amount / risk_per_share;
            let uncapped = shares * candidate.entry_price;
            uncapped.min(ctx.portfolio_value * self.config.max_position_fraction)
        } else {
            0.0
        };

        debug!(
            ticker = %candidate.ticker,
            risk_per_share,
            reward_per_share,
            risk_reward_ratio,
            position_value,
            "sizing computed"
        );

        Sizing {
            risk_per_share,
            reward_per_share,
            risk_reward_ratio,
            position_value,
        }
    }

    fn reject(
        &self,
        candidate: &CandidateSignal,
        trace: &mut RuleTrace,
        reason: RiskRejection,
        rule: &'static str,
        detail: String,
        now: DateTime<Utc>,
    ) -> RejectionRecord {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        trace.push(RuleOutcome {
            rule,
            passed: false,
            detail: detail.clone(),
        });
        warn!(
            ticker = %candidate.ticker,
            reason = %reason,
            detail = %detail,
            "candidate rejected"
        );
        RejectionRecord {
            candidate: candidate.clone(),
            reason,
            message: detail,
            rejected_at: now,
        }
    }
}

fn pass(rule: &'static str, detail: String) -> RuleOutcome {
    RuleOutcome {
        rule,
        passed: true,
        detail,
    }
}

fn check_price_levels(candidate: &CandidateSignal) -> Result<(), String> {
    let prices = [
        candidate.entry_price,
        candidate.stop_loss,
        candidate.target_price,
    ];
    if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
        return Err("prices must be finite and positive".to_string());
    }

    match candidate.class {
        SignalClass::Buy => {
            if !(candidate.stop_loss < candidate.entry_price
                && candidate.entry_price < candidate.target_price)
            {
                return Err(format!(
                    "BUY requires stop ({:.2}) < entry ({:.2}) < target ({:.2})",
                    candidate.stop_loss, candidate.entry_price, candidate.target_price
                ));
            }
        }
        SignalClass::Sell => {
            if !(candidate.target_price < candidate.entry_price
                && candidate.entry_price < candidate.stop_loss)
            {
                return Err(format!(
                    "SELL requires target ({:.2}) < entry ({:.2}) < stop ({:.2})",
                    candidate.target_price, candidate.entry_price, candidate.stop_loss
                ));
            }
        }
        SignalClass::Hold => {
            return Err("HOLD candidates carry no tradeable price levels".to_string());
        }
    }
    Ok(())
}
