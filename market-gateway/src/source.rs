// Ingestion seam
// The pull interface the gateway wraps. The host process implements this
// against its actual upstreams; the engine only sees classified faults.

use crate::retry::PolicyKind;
use anyhow::Result;
use common::{FeatureBundle, FetchFault, ModelScore};

/// Per-ticker market/model data supplier.
///
/// Implementations must be idempotent per call: the gateway may invoke the
/// same fetch several times under its retry policy.
#[async_trait::async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Stable id used for rate limiting and audit
    fn source_id(&self) -> &str;

    /// Which named retry policy this source runs under
    fn policy_kind(&self) -> PolicyKind {
        PolicyKind::Fallback
    }

    /// Technical indicators, sentiment and last price for one ticker
    async fn fetch_features(&self, ticker: &str) -> Result<FeatureBundle, FetchFault>;

    /// Per-model probability vectors for one ticker
    async fn fetch_model_scores(&self, ticker: &str) -> Result<Vec<ModelScore>, FetchFault>;
}
