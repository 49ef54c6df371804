use chrono::{DateTime, Utc};
use common::CombinedPrediction;
use std::collections::HashMap;
use uuid::Uuid;

/// Immutable market view taken at cycle start.
///
/// Every lifecycle decision in a cycle is made against exactly one of
/// these; closures using mixed-cycle data are structurally impossible as
/// long as the snapshot is built once and shared by reference.
#[derive(Debug, Clone)]
pub struct CycleSnapshot {
    pub cycle_id: Uuid,
    pub taken_at: DateTime<Utc>,
    /// Last traded price per ticker that fetched successfully
    pub prices: HashMap<String, f64>,
    /// Fresh combined predictions per ticker, for flip detection
    pub predictions: HashMap<String, CombinedPrediction>,
    /// Sticky risk halt as of cycle start
    pub halted: bool,
}

impl CycleSnapshot {
    pub fn price(&self, ticker: &str) -> Option<f64> {
        self.prices.get(ticker).copied()
    }

    pub fn prediction(&self, ticker: &str) -> Option<&CombinedPrediction> {
        self.predictions.get(ticker)
    }
}
