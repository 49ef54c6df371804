//! Shared risk context
//!
//! The one long-lived mutable resource in the engine. Validation reads a
//! consistent snapshot; the commit that actually registers or releases an
//! open slot is serialized through the write lock so concurrent candidate
//! evaluation can never double-count against the position limit.

use common::RiskRejection;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Consistent portfolio snapshot handed to each validation decision
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskContext {
    pub portfolio_value: f64,
    pub open_positions: usize,
    /// Fractional decline from the portfolio's historical peak
    pub drawdown: f64,
    pub halted: bool,
}

struct Inner {
    portfolio_value: f64,
    peak_value: f64,
    open_positions: usize,
}

/// Process-wide risk state: portfolio value, peak, open-slot count and the
/// sticky halt flag.
///
/// The halt flag persists across cycles until [`RiskState::reset_halt`] is
/// called externally; recovery of the portfolio value alone never clears it.
pub struct RiskState {
    inner: RwLock<Inner>,
    halted: AtomicBool,
}

impl RiskState {
    pub fn new(initial_portfolio_value: f64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                portfolio_value: initial_portfolio_value,
                peak_value: initial_portfolio_value,
                open_positions: 0,
            }),
            halted: AtomicBool::new(false),
        }
    }

    /// Record the latest portfolio value, tracking the historical peak
    pub async fn record_portfolio_value(&self, value: f64) {
        let mut inner = self.inner.write().await;
        inner.portfolio_value = value;
        if value > inner.peak_value {
            inner.peak_value = value;
        }
    }

    /// Resynchronize the open-slot count from the persistence collaborator
    pub async fn set_open_positions(&self, count: usize) {
        let mut inner = self.inner.write().await;
        inner.open_positions = count;
    }

    pub async fn snapshot(&self) -> RiskContext {
        let inner = self.inner.read().await;
        RiskContext {
            portfolio_value: inner.portfolio_value,
            open_positions: inner.open_positions,
            drawdown: drawdown(inner.peak_value, inner.portfolio_value),
            halted: self.halted.load(Ordering::SeqCst),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Set the sticky halt. Idempotent.
    pub fn trip_halt(&self) {
        if !self.halted.swap(true, Ordering::SeqCst) {
            error!("risk halt TRIPPED - all new candidates blocked until reset");
        }
    }

    /// External reset of the halt flag; the only way it ever clears
    pub fn reset_halt(&self) {
        if self.halted.swap(false, Ordering::SeqCst) {
            info!("risk halt reset - candidate validation resumed");
        }
    }

    /// Serialized commit of a newly accepted signal.
    ///
    /// Re-checks the position limit and the halt flag under the write lock:
    /// a candidate that validated against a stale snapshot is turned away
    /// here instead of slipping past the concurrent-position limit.
    pub async fn commit_open(&self, max_open_positions: usize) -> Result<(), RiskRejection> {
        let mut inner = self.inner.write().await;
        if self.halted.load(Ordering::SeqCst) {
            return Err(RiskRejection::DrawdownHalt);
        }
        if inner.open_positions >= max_open_positions {
            warn!(
                open = inner.open_positions,
                limit = max_open_positions,
                "commit rejected, position limit reached since validation"
            );
            return Err(RiskRejection::MaxPositionsReached);
        }
        inner.open_positions += 1;
        Ok(())
    }

    /// Release an open slot after a signal closes
    pub async fn commit_close(&self) {
        let mut inner = self.inner.write().await;
        inner.open_positions = inner.open_positions.saturating_sub(1);
    }
}

fn drawdown(peak: f64, value: f64) -> f64 {
    if peak <= 0.0 {
        return 0.0;
    }
    ((peak - value) / peak).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drawdown_tracks_peak() {
        let state = RiskState::new(10_000.0);
        state.record_portfolio_value(12_000.0).await;
        state.record_portfolio_value(10_200.0).await;

        let ctx = state.snapshot().await;
        assert!((ctx.drawdown - 0.15).abs() < 1e-9);
        // Peak never decreases
        state.record_portfolio_value(11_000.0).await;
        let ctx = state.snapshot().await;
        assert!(ctx.drawdown > 0.0);
    }

    #[tokio::test]
    async fn test_halt_is_sticky_until_reset() {
        let state = RiskState::new(10_000.0);
        state.trip_halt();
        assert!(state.is_halted());

        // Portfolio recovery does not clear the flag
        state.record_portfolio_value(20_000.0).await;
        assert!(state.is_halted());

        state.reset_halt();
        assert!(!state.is_halted());
    }

    #[tokio::test]
    async fn test_commit_open_enforces_limit() {
        let state = RiskState::new(10_000.0);
        for _ in 0..5 {
            state.commit_open(5).await.unwrap();
        }
        assert_eq!(
            state.commit_open(5).await.unwrap_err(),
            RiskRejection::MaxPositionsReached
        );

        state.commit_close().await;
        state.commit_open(5).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_open_blocked_while_halted() {
        let state = RiskState::new(10_000.0);
        state.trip_halt();
        assert_eq!(
            state.commit_open(5).await.unwrap_err(),
            RiskRejection::DrawdownHalt
        );
    }

    #[tokio::test]
    async fn test_concurrent_commits_never_exceed_limit() {
        let state = std::sync::Arc::new(RiskState::new(10_000.0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let state = state.clone();
            handles.push(tokio::spawn(async move { state.commit_open(5).await }));
        }

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 5);
        assert_eq!(state.snapshot().await.open_positions, 5);
    }
}
