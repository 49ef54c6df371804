// Model score aggregation
// Combines per-model probability vectors into one calibrated decision.
// Pure and deterministic: identical inputs always yield identical output.

use common::{CombinedPrediction, ModelContribution, ModelScore, SignalClass};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Fixed configuration fraction given to one model's contribution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelWeight {
    pub model_id: String,
    pub weight: f64,
}

/// Ensemble configuration: per-model weights (summing to 1) plus the
/// confidence floor below which the decision is forced to HOLD
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub weights: Vec<ModelWeight>,
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            weights: vec![
                ModelWeight {
                    model_id: "lstm".to_string(),
                    weight: 0.4,
                },
                ModelWeight {
                    model_id: "xgboost".to_string(),
                    weight: 0.35,
                },
                ModelWeight {
                    model_id: "sentiment".to_string(),
                    weight: 0.25,
                },
            ],
            confidence_floor: default_confidence_floor(),
        }
    }
}

fn default_confidence_floor() -> f64 {
    0.70
}

impl EnsembleConfig {
    /// Weights are fixed configuration and must sum to 1
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.weights.is_empty() {
            anyhow::bail!("ensemble requires at least one model weight");
        }
        let total: f64 = self.weights.iter().map(|w| w.weight).sum();
        if (total - 1.0).abs() > 1e-6 {
            anyhow::bail!("ensemble weights sum to {}, expected 1.0", total);
        }
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            anyhow::bail!(
                "confidence floor {} outside [0, 1]",
                self.confidence_floor
            );
        }
        Ok(())
    }

    fn weight_for(&self, model_id: &str) -> Option<f64> {
        self.weights
            .iter()
            .find(|w| w.model_id == model_id)
            .map(|w| w.weight)
    }
}

/// Combine per-model probability vectors into one decision.
///
/// Malformed vectors are excluded and their weight redistributed
/// proportionally over the survivors. If every vector is malformed the
/// result is HOLD at confidence 0 with the `degraded` data-quality flag.
/// If the argmax probability mass falls below the configured floor the
/// class is forced to HOLD regardless of argmax.
pub fn combine(scores: &[ModelScore], config: &EnsembleConfig) -> CombinedPrediction {
    let mut breakdown = Vec::with_capacity(scores.len());
    let mut usable: Vec<(&ModelScore, f64)> = Vec::with_capacity(scores.len());

    for score in scores {
        let Some(weight) = config.weight_for(&score.model_id) else {
            warn!(model = %score.model_id, "score from unweighted model ignored");
            continue;
        };

        if score.is_well_formed() {
            usable.push((score, weight));
        } else {
            warn!(model = %score.model_id, "malformed probability vector excluded");
            breakdown.push(ModelContribution {
                model_id: score.model_id.clone(),
                weight: 0.0,
                probabilities: score.probabilities,
                included: false,
            });
        }
    }

    let usable_weight: f64 = usable.iter().map(|(_, w)| w).sum();
    if usable.is_empty() || usable_weight <= 0.0 {
        return CombinedPrediction {
            class: SignalClass::Hold,
            confidence: 0.0,
            probabilities: [0.0, 1.0, 0.0],
            breakdown,
            degraded: true,
        };
    }

    let mut combined = [0.0f64; 3];
    for (score, weight) in &usable {
        // Redistribute excluded weight proportionally
        let effective = weight / usable_weight;
        for (idx, p) in score.probabilities.iter().enumerate() {
            combined[idx] += effective * p;
        }
        breakdown.push(ModelContribution {
            model_id: score.model_id.clone(),
            weight: effective,
            probabilities: score.probabilities,
            included: true,
        });
    }

    let (argmax_idx, argmax_mass) = combined
        .iter()
        .enumerate()
        .fold((1, f64::MIN), |(best_idx, best), (idx, &mass)| {
            if mass > best {
                (idx, mass)
            } else {
                (best_idx, best)
            }
        });

    let argmax_class = SignalClass::from_index(argmax_idx);
    // Deliberate bias toward inaction under uncertainty
    let class = if argmax_mass < config.confidence_floor {
        SignalClass::Hold
    } else {
        argmax_class
    };

    debug!(
        argmax = %argmax_class,
        class = %class,
        confidence = argmax_mass,
        models = usable.len(),
        "combined model scores"
    );

    CombinedPrediction {
        class,
        confidence: argmax_mass,
        probabilities: combined,
        breakdown,
        degraded: false,
    }
}
