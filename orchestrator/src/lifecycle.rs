// Signal lifecycle management
// Re-evaluates every ACTIVE signal against the cycle snapshot. Exit
// conditions run in fixed priority and the first match wins, so each signal
// receives exactly one exit reason. A set risk halt overrides everything
// and force-closes the whole book at once.

use crate::snapshot::CycleSnapshot;
use chrono::Duration;
use common::{ExitReason, LifecycleInconsistency, Signal, SignalClass};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A closure decision for one signal
#[derive(Debug, Clone)]
pub struct SignalClose {
    pub signal_id: Uuid,
    pub reason: ExitReason,
    pub exit_price: f64,
}

pub struct LifecycleManager {
    /// Flip predictions below this confidence are ignored
    confidence_floor: f64,
    max_hold: Duration,
}

impl LifecycleManager {
    pub fn new(confidence_floor: f64, max_hold_days: i64) -> Self {
        Self {
            confidence_floor,
            max_hold: Duration::days(max_hold_days),
        }
    }

    /// Decide closures for all active signals against one snapshot.
    ///
    /// A signal opened after the snapshot was taken means the caller mixed
    /// cycles; that fails this cycle's evaluation without touching the book.
    pub fn evaluate(
        &self,
        active: &[Signal],
        snapshot: &CycleSnapshot,
    ) -> Result<Vec<SignalClose>, LifecycleInconsistency> {
        for signal in active {
            if signal.opened_at > snapshot.taken_at {
                return Err(LifecycleInconsistency {
                    signal_id: signal.id,
                    ticker: signal.ticker.clone(),
                    detail: format!(
                        "signal opened at {} is newer than snapshot taken at {}",
                        signal.opened_at, snapshot.taken_at
                    ),
                });
            }
        }

        // A tripped halt force-closes the entire book in one cycle,
        // overriding whatever the ordinary exit rules would have produced.
        if snapshot.halted {
            let closes = active
                .iter()
                .filter(|s| s.is_active())
                .map(|signal| SignalClose {
                    signal_id: signal.id,
                    reason: ExitReason::RiskEvent,
                    exit_price: snapshot.price(&signal.ticker).unwrap_or(signal.entry_price),
                })
                .collect::<Vec<_>>();
            if !closes.is_empty() {
                info!(count = closes.len(), "risk event: force-closing all active signals");
            }
            return Ok(closes);
        }

        let mut closes = Vec::new();
        for signal in active.iter().filter(|s| s.is_active()) {
            if let Some(close) = self.evaluate_one(signal, snapshot) {
                debug!(
                    ticker = %signal.ticker,
                    reason = %close.reason,
                    exit_price = close.exit_price,
                    "exit condition met"
                );
                closes.push(close);
            }
        }
        Ok(closes)
    }

    fn evaluate_one(&self, signal: &Signal, snapshot: &CycleSnapshot) -> Option<SignalClose> {
        let Some(price) = snapshot.price(&signal.ticker) else {
            warn!(
                ticker = %signal.ticker,
                "no price in snapshot, signal skipped this cycle"
            );
            return None;
        };

        // 1. Target
        let target_hit = match signal.class {
            SignalClass::Sell => price <= signal.target_price,
            _ => price >= signal.target_price,
        };
        if target_hit {
            return Some(SignalClose {
                signal_id: signal.id,
                reason: ExitReason::Target,
                exit_price: signal.target_price,
            });
        }

        // 2. Stop loss
        let stop_hit = match signal.class {
            SignalClass::Sell => price >= signal.stop_loss,
            _ => price <= signal.stop_loss,
        };
        if stop_hit {
            return Some(SignalClose {
                signal_id: signal.id,
                reason: ExitReason::StopLoss,
                exit_price: signal.stop_loss,
            });
        }

        // 3. Signal flip: a fresh opposing prediction above the floor,
        // applied symmetrically to long and short signals
        if let Some(prediction) = snapshot.prediction(&signal.ticker) {
            if prediction.class.opposes(signal.class)
                && prediction.confidence >= self.confidence_floor
            {
                return Some(SignalClose {
                    signal_id: signal.id,
                    reason: ExitReason::SignalFlip,
                    exit_price: price,
                });
            }
        }

        // 4. Time decay
        if snapshot.taken_at - signal.opened_at > self.max_hold {
            return Some(SignalClose {
                signal_id: signal.id,
                reason: ExitReason::TimeDecay,
                exit_price: price,
            });
        }

        None
    }
}
