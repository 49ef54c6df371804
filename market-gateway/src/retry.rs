// Retry policies
// Exponential backoff with a cap and symmetric jitter, configured per
// upstream source class. No policy value is hardcoded at a call site.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which named policy an upstream source runs under
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PolicyKind {
    /// Forgiving sources that rate-limit aggressively (long waits tolerated)
    Lenient,
    /// Fast sources where stale data beats a long stall
    Strict,
    /// Everything else
    Fallback,
}

/// Backoff schedule for one source class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: f64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Symmetric jitter bound, e.g. 0.10 = ±10%
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
            multiplier: default_multiplier(),
            jitter_fraction: default_jitter_fraction(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> f64 {
    1.0
}

fn default_max_delay() -> f64 {
    60.0
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter_fraction() -> f64 {
    0.10
}

impl RetryPolicy {
    /// Un-jittered delay after the given attempt (1-based):
    /// `min(max_delay, base_delay * multiplier^(attempt-1))`
    pub fn raw_delay_secs(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1) as i32;
        (self.base_delay_secs * self.multiplier.powi(exponent)).min(self.max_delay_secs)
    }

    /// Delay after the given attempt with symmetric jitter applied, so
    /// concurrent callers hitting the same source don't retry in lockstep
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.raw_delay_secs(attempt);
        let jitter = 1.0 + self.jitter_fraction * (fastrand::f64() * 2.0 - 1.0);
        Duration::from_secs_f64((raw * jitter).max(0.0))
    }
}

/// The named policies every gateway call resolves through
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicies {
    #[serde(default = "default_lenient")]
    pub lenient: RetryPolicy,
    #[serde(default = "default_strict")]
    pub strict: RetryPolicy,
    #[serde(default)]
    pub fallback: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            lenient: default_lenient(),
            strict: default_strict(),
            fallback: RetryPolicy::default(),
        }
    }
}

fn default_lenient() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay_secs: 2.0,
        max_delay_secs: 120.0,
        ..RetryPolicy::default()
    }
}

fn default_strict() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay_secs: 1.0,
        max_delay_secs: 30.0,
        ..RetryPolicy::default()
    }
}

impl RetryPolicies {
    pub fn for_kind(&self, kind: PolicyKind) -> &RetryPolicy {
        match kind {
            PolicyKind::Lenient => &self.lenient,
            PolicyKind::Strict => &self.strict,
            PolicyKind::Fallback => &self.fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_delay_doubles_up_to_cap() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay_secs: 1.0,
            max_delay_secs: 8.0,
            multiplier: 2.0,
            jitter_fraction: 0.10,
        };

        assert_eq!(policy.raw_delay_secs(1), 1.0);
        assert_eq!(policy.raw_delay_secs(2), 2.0);
        assert_eq!(policy.raw_delay_secs(3), 4.0);
        assert_eq!(policy.raw_delay_secs(4), 8.0);
        // Capped from here on
        assert_eq!(policy.raw_delay_secs(5), 8.0);
        assert_eq!(policy.raw_delay_secs(6), 8.0);
    }

    #[test]
    fn test_raw_delay_sequence_is_non_decreasing() {
        let policy = RetryPolicy::default();
        let mut previous = 0.0;
        for attempt in 1..=10 {
            let delay = policy.raw_delay_secs(attempt);
            assert!(delay >= previous);
            assert!(delay <= policy.max_delay_secs);
            previous = delay;
        }
    }

    #[test]
    fn test_jittered_delay_stays_within_bound() {
        let policy = RetryPolicy {
            jitter_fraction: 0.10,
            ..RetryPolicy::default()
        };

        for attempt in 1..=6 {
            let raw = policy.raw_delay_secs(attempt);
            for _ in 0..200 {
                let jittered = policy.delay_for(attempt).as_secs_f64();
                assert!(jittered >= raw * 0.9 - 1e-9);
                assert!(jittered <= raw * 1.1 + 1e-9);
            }
        }
    }

    #[test]
    fn test_named_policy_lookup() {
        let policies = RetryPolicies::default();
        assert_eq!(policies.for_kind(PolicyKind::Lenient).max_attempts, 5);
        assert_eq!(policies.for_kind(PolicyKind::Strict).max_attempts, 3);
        assert_eq!(policies.for_kind(PolicyKind::Fallback).max_delay_secs, 60.0);
    }
}
