// Resilient fetch gateway
// Drives an idempotent upstream operation under a named retry policy.
// Faults come back as explicit classification values, the driver loop
// inspects them: transients are retried with capped, jittered backoff,
// permanents abort on the spot.

use crate::rate_limit::SourceRateLimiter;
use crate::retry::{PolicyKind, RetryPolicies};
use common::{FetchError, FetchFault};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Successful gateway outcome, with the attempt count for observability
#[derive(Debug, Clone)]
pub struct FetchReport<T> {
    pub value: T,
    pub attempts: u32,
}

/// Retry/backoff wrapper around unreliable upstream calls.
///
/// Every attempt first takes a rate-limit slot for the source, so retries
/// never sidestep the per-source quota. Backoff suspends only the calling
/// task; the whole operation is cancelled at the cycle deadline.
pub struct FetchGateway {
    policies: RetryPolicies,
    limiter: Arc<SourceRateLimiter>,
}

impl FetchGateway {
    pub fn new(policies: RetryPolicies, limiter: Arc<SourceRateLimiter>) -> Self {
        Self { policies, limiter }
    }

    /// Execute `op` against `source_id` under the named policy for `kind`.
    ///
    /// `op` receives the 1-based attempt number and must be idempotent.
    /// Returns the value plus how many attempts it took, or a typed failure
    /// carrying the classification and attempt count. A deadline miss
    /// (including mid-retry) is `FetchError::Timeout`.
    pub async fn execute<T, F, Fut>(
        &self,
        source_id: &str,
        kind: PolicyKind,
        deadline: Instant,
        op: F,
    ) -> Result<FetchReport<T>, FetchError>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchFault>>,
    {
        let policy = self.policies.for_kind(kind);
        let operation_id = Uuid::new_v4();
        let attempts = AtomicU32::new(0);

        let driver = async {
            loop {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;

                let outcome = match self.limiter.acquire(source_id).await {
                    Ok(()) => op(attempt).await,
                    Err(fault) => Err(fault),
                };

                let fault = match outcome {
                    Ok(value) => {
                        debug!(
                            operation = %operation_id,
                            source = source_id,
                            attempt,
                            "fetch succeeded"
                        );
                        return Ok(FetchReport { value, attempts: attempt });
                    }
                    Err(fault) => fault,
                };

                if !fault.kind.is_transient() {
                    warn!(
                        operation = %operation_id,
                        source = source_id,
                        attempt,
                        classification = %fault.kind,
                        "permanent fault, aborting without retry"
                    );
                    return Err(FetchError::Permanent {
                        source_id: source_id.to_string(),
                        kind: fault.kind,
                        attempts: attempt,
                        last_error: fault.message,
                    });
                }

                if attempt >= policy.max_attempts {
                    warn!(
                        operation = %operation_id,
                        source = source_id,
                        attempts = attempt,
                        classification = %fault.kind,
                        "retry budget exhausted"
                    );
                    return Err(FetchError::Transient {
                        source_id: source_id.to_string(),
                        kind: fault.kind,
                        attempts: attempt,
                        last_error: fault.message,
                    });
                }

                let delay = policy.delay_for(attempt);
                debug!(
                    operation = %operation_id,
                    source = source_id,
                    attempt,
                    classification = %fault.kind,
                    delay_ms = delay.as_millis() as u64,
                    error = %fault.message,
                    "transient fault, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        };

        match tokio::time::timeout_at(deadline, driver).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                source_id: source_id.to_string(),
                attempts: attempts.load(Ordering::SeqCst),
            }),
        }
    }
}
