//! Engine configuration
//!
//! One immutable aggregate covering every threshold in the system, injected
//! at construction and overridable per deployment via TOML. Nothing in the
//! engine reads a numeric limit from anywhere else.

use anyhow::Context;
use ensemble::EnsembleConfig;
use market_gateway::{RateLimiterConfig, RetryPolicies};
use portfolio_risk::RiskConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default bucket plus per-source overrides
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RateLimitSection {
    #[serde(default)]
    pub default: RateLimiterConfig,
    #[serde(default)]
    pub sources: HashMap<String, RateLimiterConfig>,
}

impl RateLimitSection {
    /// Every bucket this section can produce must hold to valid parameters
    pub fn validate(&self) -> anyhow::Result<()> {
        self.default.validate().context("default rate limit")?;
        for (source, config) in &self.sources {
            config
                .validate()
                .with_context(|| format!("rate limit override for source '{}'", source))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Universe of tickers evaluated each cycle
    #[serde(default)]
    pub tickers: Vec<String>,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub ensemble: EnsembleConfig,

    #[serde(default)]
    pub retry: RetryPolicies,

    #[serde(default)]
    pub rate_limit: RateLimitSection,

    /// Maximum hold period before a signal decays out
    #[serde(default = "default_max_hold_days")]
    pub max_hold_days: i64,

    /// Parallel gateway fetches per cycle
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Budget for one whole cycle; fetches past it are cancelled
    #[serde(default = "default_cycle_deadline_secs")]
    pub cycle_deadline_secs: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tickers: Vec::new(),
            risk: RiskConfig::default(),
            ensemble: EnsembleConfig::default(),
            retry: RetryPolicies::default(),
            rate_limit: RateLimitSection::default(),
            max_hold_days: default_max_hold_days(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            cycle_deadline_secs: default_cycle_deadline_secs(),
        }
    }
}

fn default_max_hold_days() -> i64 {
    7
}

fn default_max_concurrent_fetches() -> usize {
    8
}

fn default_cycle_deadline_secs() -> f64 {
    120.0
}

/// Load configuration from a TOML file
pub fn load_config(path: &str) -> anyhow::Result<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: EngineConfig = toml::from_str(&content)?;
    config.ensemble.validate()?;
    config.rate_limit.validate()?;
    Ok(config)
}

/// Save configuration to a TOML file
pub fn save_config(config: &EngineConfig, path: &str) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_hold_days, 7);
        assert_eq!(config.risk.max_open_positions, 5);
        assert!(config.ensemble.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = EngineConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: EngineConfig = toml::from_str(&serialized).unwrap();

        assert_eq!(config.max_hold_days, deserialized.max_hold_days);
        assert_eq!(
            config.risk.max_drawdown,
            deserialized.risk.max_drawdown
        );
        assert_eq!(
            config.retry.lenient.max_attempts,
            deserialized.retry.lenient.max_attempts
        );
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            tickers = ["AAPL", "TSLA"]

            [risk]
            max_open_positions = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.tickers.len(), 2);
        assert_eq!(config.risk.max_open_positions, 3);
        // Everything unspecified falls back to documented defaults
        assert_eq!(config.risk.min_confidence, 0.70);
        assert_eq!(config.cycle_deadline_secs, 120.0);
    }

    #[test]
    fn test_degenerate_rate_limit_rejected() {
        assert!(EngineConfig::default().rate_limit.validate().is_ok());

        let mut config = EngineConfig::default();
        config.rate_limit.default.refill_per_sec = 0.0;
        assert!(config.rate_limit.validate().is_err());

        let mut config = EngineConfig::default();
        config
            .rate_limit
            .sources
            .insert("reddit".to_string(), RateLimiterConfig {
                capacity: 0.0,
                ..Default::default()
            });
        let err = config.rate_limit.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("reddit"));
    }
}
