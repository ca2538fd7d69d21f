//! Tunables for the dispatch pipeline, the idempotency ledger, and the
//! live event bus.

use std::time::Duration;

use crate::transitions::DEFAULT_MAX_RETRIES;

/// Largest batch a single trigger may process.
pub const MAX_BATCH_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchConfig {
    /// Failures after which a unit is skipped instead of retried.
    pub max_retries: i32,
    /// Batch size when the trigger does not name one.
    pub default_batch_limit: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            default_batch_limit: 25,
        }
    }
}

impl DispatchConfig {
    /// Resolve a requested batch size to `1..=MAX_BATCH_LIMIT`.
    pub fn batch_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_batch_limit)
            .clamp(1, MAX_BATCH_LIMIT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerConfig {
    /// How long memoized responses are kept.
    pub retention: Duration,
    /// Chance that a completed execution also reaps expired records.
    pub reap_probability: f64,
    /// How long a duplicate waits for the in-flight original.
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    /// Age after which an unfinished claim is considered abandoned.
    pub stale_claim: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 60 * 60),
            reap_probability: 0.01,
            wait_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
            stale_claim: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveConfig {
    /// Minimum spacing between delivered events of one type.
    pub throttle: Duration,
    /// Interval of SSE keep-alive comments.
    pub keepalive: Duration,
    /// Per-subscriber buffer before the oldest events are dropped.
    pub buffer: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            throttle: Duration::from_secs(1),
            keepalive: Duration::from_secs(15),
            buffer: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_limit_clamp() {
        let config = DispatchConfig::default();
        assert_eq!(config.batch_limit(None), 25);
        assert_eq!(config.batch_limit(Some(0)), 1);
        assert_eq!(config.batch_limit(Some(7)), 7);
        assert_eq!(config.batch_limit(Some(5000)), MAX_BATCH_LIMIT);
    }
}
