// Per-source rate limiting
// Token bucket keyed by source id, independent of retry activity: every
// attempt against a source takes a fresh slot. Waiters on one source are
// admitted first-come-first-served.

use common::{FaultKind, FetchFault};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Token-bucket parameters for one source (or the default for all sources)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Maximum burst size
    #[serde(default = "default_capacity")]
    pub capacity: f64,
    /// Sustained calls per second
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,
    /// Bound on how long one acquire may wait, queueing included
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_per_sec: default_refill_per_sec(),
            max_wait_secs: default_max_wait(),
        }
    }
}

fn default_capacity() -> f64 {
    5.0
}

fn default_refill_per_sec() -> f64 {
    1.0
}

fn default_max_wait() -> f64 {
    30.0
}

impl RateLimiterConfig {
    /// The bucket math needs a positive refill rate and room for at least
    /// one token; degenerate values would make waits unbounded
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.capacity.is_finite() || self.capacity < 1.0 {
            anyhow::bail!("rate limiter capacity {} must be a finite value >= 1", self.capacity);
        }
        if !self.refill_per_sec.is_finite() || self.refill_per_sec <= 0.0 {
            anyhow::bail!(
                "rate limiter refill rate {}/s must be a finite value > 0",
                self.refill_per_sec
            );
        }
        if !self.max_wait_secs.is_finite() || self.max_wait_secs < 0.0 {
            anyhow::bail!(
                "rate limiter max wait {}s must be finite and non-negative",
                self.max_wait_secs
            );
        }
        Ok(())
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

struct Bucket {
    config: RateLimiterConfig,
    // Held across the refill wait: tokio mutexes queue waiters FIFO, which
    // is what gives first-come-first-served admission per source.
    state: Mutex<BucketState>,
}

impl Bucket {
    fn new(config: RateLimiterConfig) -> Self {
        let state = BucketState {
            tokens: config.capacity,
            last_refill: Instant::now(),
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.config.refill_per_sec)
            .min(self.config.capacity);
        state.last_refill = now;
    }

    async fn take_one(&self) {
        let mut state = self.state.lock().await;
        loop {
            self.refill(&mut state);
            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return;
            }
            // An unvalidated zero refill rate must not turn the wait
            // infinite; keep it finite and let the acquire bound fire.
            let wait = if self.config.refill_per_sec > 0.0 {
                (1.0 - state.tokens) / self.config.refill_per_sec
            } else {
                self.config.max_wait_secs.max(1.0)
            };
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }
}

/// Caps outbound call rate per upstream source id.
///
/// `acquire` suspends the calling task until a slot frees, bounded by the
/// configured maximum wait; dropping the future cancels cleanly without
/// consuming a slot.
pub struct SourceRateLimiter {
    default_config: RateLimiterConfig,
    overrides: std::collections::HashMap<String, RateLimiterConfig>,
    buckets: DashMap<String, Arc<Bucket>>,
}

impl SourceRateLimiter {
    pub fn new(
        default_config: RateLimiterConfig,
        overrides: std::collections::HashMap<String, RateLimiterConfig>,
    ) -> Self {
        Self {
            default_config,
            overrides,
            buckets: DashMap::new(),
        }
    }

    fn bucket_for(&self, source_id: &str) -> Arc<Bucket> {
        self.buckets
            .entry(source_id.to_string())
            .or_insert_with(|| {
                let config = self
                    .overrides
                    .get(source_id)
                    .cloned()
                    .unwrap_or_else(|| self.default_config.clone());
                Arc::new(Bucket::new(config))
            })
            .clone()
    }

    /// Block until a slot is available for `source_id`, FIFO-fair among
    /// concurrent callers of the same source
    pub async fn acquire(&self, source_id: &str) -> Result<(), FetchFault> {
        let bucket = self.bucket_for(source_id);
        let max_wait = Duration::from_secs_f64(bucket.config.max_wait_secs.max(0.0));

        match tokio::time::timeout(max_wait, bucket.take_one()).await {
            Ok(()) => {
                debug!(source = source_id, "rate limit slot acquired");
                Ok(())
            }
            Err(_) => Err(FetchFault::new(
                FaultKind::RateLimited,
                format!(
                    "no slot for source '{}' within {:.1}s",
                    source_id, bucket.config.max_wait_secs
                ),
            )),
        }
    }
}

impl Default for SourceRateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default(), Default::default())
    }
}
