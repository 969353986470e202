//! Per-caller token buckets.
//!
//! Buckets refill in whole intervals: every full `refill_interval` since the
//! last refill adds `refill_tokens`, capped at `capacity`. Partial intervals
//! add nothing. A bucket is created full on a caller's first request and kept
//! for the life of the process.
//!
//! Deduction happens under the map entry's write guard, so concurrent
//! requests from one caller never overdraw the bucket.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::{ConductorError, Result};

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: u64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: u64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, config: &RateLimitConfig, now: Instant) {
        if config.refill_interval.is_zero() {
            self.tokens = config.capacity;
            self.last_refill = now;
            return;
        }

        let elapsed = now.saturating_duration_since(self.last_refill);
        let intervals = elapsed.as_nanos() / config.refill_interval.as_nanos();
        if intervals == 0 {
            return;
        }

        let added = u64::try_from(intervals)
            .unwrap_or(u64::MAX)
            .saturating_mul(config.refill_tokens);
        self.tokens = self.tokens.saturating_add(added).min(config.capacity);

        let advanced = u32::try_from(intervals)
            .ok()
            .and_then(|n| config.refill_interval.checked_mul(n));
        self.last_refill = match advanced {
            Some(step) => self.last_refill + step,
            None => now,
        };
    }

    fn until_next_refill(&self, config: &RateLimitConfig, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.last_refill);
        config.refill_interval.saturating_sub(elapsed)
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, TokenBucket>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Deduct `tokens` if the caller has that many; otherwise change nothing.
    pub fn try_consume(&self, caller_id: &str, tokens: u64) -> bool {
        self.try_consume_at(caller_id, tokens, Instant::now())
    }

    fn try_consume_at(&self, caller_id: &str, tokens: u64, now: Instant) -> bool {
        let mut bucket = self
            .buckets
            .entry(caller_id.to_string())
            .or_insert_with(|| TokenBucket::full(self.config.capacity, now));

        bucket.refill(&self.config, now);
        if bucket.tokens < tokens {
            debug!(
                "Rate limit: {} requested {} tokens, {} available",
                caller_id, tokens, bucket.tokens
            );
            return false;
        }

        bucket.tokens -= tokens;
        true
    }

    /// Tokens the caller could spend right now. Unknown callers report a
    /// full bucket without one being created.
    pub fn available_tokens(&self, caller_id: &str) -> u64 {
        self.available_tokens_at(caller_id, Instant::now())
    }

    fn available_tokens_at(&self, caller_id: &str, now: Instant) -> u64 {
        match self.buckets.get_mut(caller_id) {
            Some(mut bucket) => {
                bucket.refill(&self.config, now);
                bucket.tokens
            }
            None => self.config.capacity,
        }
    }

    /// Time until the caller's next refill; zero for unknown callers.
    pub fn reset_after(&self, caller_id: &str) -> Duration {
        self.buckets
            .get(caller_id)
            .map(|bucket| bucket.until_next_refill(&self.config, Instant::now()))
            .unwrap_or_default()
    }

    /// Drop the caller's bucket; the next request starts with a full one.
    pub fn reset(&self, caller_id: &str) {
        if self.buckets.remove(caller_id).is_some() {
            debug!("Rate limit bucket reset for {}", caller_id);
        }
    }

    /// [`try_consume`](Self::try_consume) as a `Result`, for tool entry
    /// points.
    pub fn check(&self, caller_id: &str, tokens: u64) -> Result<()> {
        if self.try_consume(caller_id, tokens) {
            return Ok(());
        }

        let reset_after = self.reset_after(caller_id);
        warn!(
            "Rate limit exceeded for {}, resets in {:?}",
            caller_id, reset_after
        );
        Err(ConductorError::RateLimitExceeded {
            caller_id: caller_id.to_string(),
            reset_after,
        })
    }

    pub fn tracked_callers(&self) -> usize {
        self.buckets.len()
    }
}
