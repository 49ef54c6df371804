use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-ticker feature bundle supplied by the ingestion collaborator:
/// last traded price, technical indicators and aggregated sentiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureBundle {
    pub ticker: String,
    pub last_price: f64,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    /// Aggregated sentiment, -1.0 to 1.0
    pub sentiment: Option<f64>,
    /// Upstream-proposed stop level; engine falls back to a configured
    /// fraction of entry when absent
    pub proposed_stop: Option<f64>,
    pub proposed_target: Option<f64>,
    pub as_of: DateTime<Utc>,
}

impl FeatureBundle {
    pub fn new(ticker: impl Into<String>, last_price: f64, as_of: DateTime<Utc>) -> Self {
        Self {
            ticker: ticker.into(),
            last_price,
            rsi: None,
            macd: None,
            sentiment: None,
            proposed_stop: None,
            proposed_target: None,
            as_of,
        }
    }
}
