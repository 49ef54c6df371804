//! Risk rule configuration
//!
//! Every threshold the rule battery applies lives here, externally supplied
//! and immutable once the engine is constructed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Minimum combined confidence to trade at all
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Minimum reward-to-risk ratio (2.0 = one dollar risked for two sought)
    #[serde(default = "default_min_risk_reward")]
    pub min_risk_reward: f64,

    /// Fraction of portfolio value risked per trade
    #[serde(default = "default_max_risk_per_trade")]
    pub max_risk_per_trade: f64,

    /// Cap on any single position as a fraction of portfolio value
    #[serde(default = "default_max_position_fraction")]
    pub max_position_fraction: f64,

    /// Maximum concurrently open signals
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,

    /// Drawdown fraction that trips the sticky halt
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: f64,

    /// Stop distance as a fraction of entry when the upstream proposes none
    #[serde(default = "default_stop_fraction")]
    pub default_stop_fraction: f64,

    /// Target distance as a fraction of entry when the upstream proposes none
    #[serde(default = "default_target_fraction")]
    pub default_target_fraction: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            min_risk_reward: default_min_risk_reward(),
            max_risk_per_trade: default_max_risk_per_trade(),
            max_position_fraction: default_max_position_fraction(),
            max_open_positions: default_max_open_positions(),
            max_drawdown: default_max_drawdown(),
            default_stop_fraction: default_stop_fraction(),
            default_target_fraction: default_target_fraction(),
        }
    }
}

fn default_min_confidence() -> f64 {
    0.70
}

fn default_min_risk_reward() -> f64 {
    2.0
}

fn default_max_risk_per_trade() -> f64 {
    0.02
}

fn default_max_position_fraction() -> f64 {
    0.20
}

fn default_max_open_positions() -> usize {
    5
}

fn default_max_drawdown() -> f64 {
    0.15
}

fn default_stop_fraction() -> f64 {
    0.05
}

fn default_target_fraction() -> f64 {
    0.07
}
