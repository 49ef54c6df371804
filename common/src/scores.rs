// Model score types
// Per-model probability vectors and the combined ensemble decision

use crate::signal::SignalClass;
use serde::{Deserialize, Serialize};

/// Tolerance when checking that a probability vector sums to 1
pub const PROBABILITY_SUM_EPSILON: f64 = 1e-3;

/// One model's output for one ticker: a probability vector over
/// {BUY, HOLD, SELL}. Immutable and cycle-scoped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelScore {
    pub model_id: String,
    /// [p_buy, p_hold, p_sell]
    pub probabilities: [f64; 3],
    pub confidence: f64,
}

impl ModelScore {
    pub fn new(model_id: impl Into<String>, probabilities: [f64; 3]) -> Self {
        let confidence = probabilities.iter().cloned().fold(f64::MIN, f64::max);
        Self {
            model_id: model_id.into(),
            probabilities,
            confidence,
        }
    }

    /// Shape validation, applied once at the ingestion boundary: every
    /// component finite and in [0, 1], the vector summing to ~1.
    pub fn is_well_formed(&self) -> bool {
        let mut sum = 0.0;
        for p in &self.probabilities {
            if !p.is_finite() || *p < 0.0 || *p > 1.0 {
                return false;
            }
            sum += p;
        }
        (sum - 1.0).abs() <= PROBABILITY_SUM_EPSILON
    }
}

/// Per-model slice of a combined prediction, kept for audit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelContribution {
    pub model_id: String,
    /// Effective weight after redistribution over well-formed vectors
    pub weight: f64,
    pub probabilities: [f64; 3],
    /// False when the vector was malformed and excluded
    pub included: bool,
}

/// Weighted aggregate of all model scores for one ticker.
///
/// Immutable once produced. `degraded` flags a data-quality fallback where
/// every input vector was malformed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedPrediction {
    pub class: SignalClass,
    pub confidence: f64,
    pub probabilities: [f64; 3],
    pub breakdown: Vec<ModelContribution>,
    pub degraded: bool,
}
