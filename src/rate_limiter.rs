//! Global token-bucket rate limiter.
//!
//! Grounded on `original_source/spider/rate_limiter.py`'s `TokenBucket`:
//! continuous refill from elapsed wall-clock time, a blocking acquire that
//! sleeps outside the lock and re-checks on wake (so a concurrent rate
//! reduction cannot under-deduct), and a runtime rate/capacity setter that
//! refills before mutating.

use std::sync::Mutex;
use std::time::Instant;

/// Configuration for [`RateLimiter`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterConfig {
  tokens_per_second: f64,
  capacity: f64,
}

impl RateLimiterConfig {
  /// Create a configuration with explicit rate and capacity.
  ///
  /// # Panics
  ///
  /// Panics if `tokens_per_second <= 0.0` or `capacity <= 0.0`.
  #[must_use]
  pub fn new(tokens_per_second: f64, capacity: f64) -> Self {
    assert!(tokens_per_second > 0.0, "tokens_per_second must be > 0");
    assert!(capacity > 0.0, "capacity must be > 0");
    Self { tokens_per_second, capacity }
  }

  /// Refill rate in tokens/sec.
  #[must_use]
  pub fn tokens_per_second(&self) -> f64 {
    self.tokens_per_second
  }

  /// Bucket capacity.
  #[must_use]
  pub fn capacity(&self) -> f64 {
    self.capacity
  }
}

struct BucketState {
  tokens: f64,
  last_refill: Instant,
  rate: f64,
  capacity: f64,
}

impl BucketState {
  fn refill(&mut self) {
    let now = Instant::now();
    let elapsed = now.duration_since(self.last_refill).as_secs_f64();
    self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
    self.last_refill = now;
  }
}

/// A single global token bucket shared by every worker across every stage.
#[derive(Debug)]
pub struct RateLimiter {
  state: Mutex<BucketState>,
}

impl RateLimiter {
  /// Construct a limiter starting with a full bucket.
  #[must_use]
  pub fn new(config: RateLimiterConfig) -> Self {
    Self {
      state: Mutex::new(BucketState { tokens: config.capacity, last_refill: Instant::now(), rate: config.tokens_per_second, capacity: config.capacity }),
    }
  }

  /// Try to acquire `n` tokens without blocking.
  ///
  /// Returns `true` and deducts `n` tokens on success; returns `false` and
  /// leaves the bucket untouched if insufficient tokens are available.
  #[must_use]
  pub fn try_acquire(&self, n: f64) -> bool {
    let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    state.refill();
    if state.tokens >= n {
      state.tokens -= n;
      true
    } else {
      false
    }
  }

  /// Acquire `n` tokens, sleeping as needed until they are available.
  ///
  /// The sleep happens outside the lock; on wake the loop refills and
  /// re-checks rather than assuming the computed wait was sufficient, so a
  /// concurrent [`set_rate`](Self::set_rate) reduction cannot cause an
  /// under-deduction.
  pub async fn acquire(&self, n: f64) {
    loop {
      let wait = {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.refill();
        if state.tokens >= n {
          state.tokens -= n;
          return;
        }
        (n - state.tokens) / state.rate
      };
      tokio::time::sleep(std::time::Duration::from_secs_f64(wait.max(0.0))).await;
    }
  }

  /// Tokens currently available, after refilling for elapsed time.
  #[must_use]
  pub fn available(&self) -> f64 {
    let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    state.refill();
    state.tokens
  }

  /// Adjust rate and capacity at runtime. Refills against the *old* rate
  /// before the new values take effect, so already-accrued tokens are not
  /// retroactively lost or gained.
  pub fn set_rate(&self, tokens_per_second: f64, capacity: f64) {
    let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    state.refill();
    state.rate = tokens_per_second;
    state.capacity = capacity;
    state.tokens = state.tokens.min(capacity);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn try_acquire_drains_and_refuses_when_empty() {
    let limiter = RateLimiter::new(RateLimiterConfig::new(1.0, 2.0));
    assert!(limiter.try_acquire(2.0));
    assert!(!limiter.try_acquire(0.5));
  }

  #[tokio::test(start_paused = true)]
  async fn acquire_blocks_until_tokens_refill() {
    let limiter = RateLimiter::new(RateLimiterConfig::new(2.0, 5.0));
    // Drain the bucket.
    assert!(limiter.try_acquire(5.0));

    let limiter = std::sync::Arc::new(limiter);
    let waiter = {
      let limiter = limiter.clone();
      tokio::spawn(async move {
        limiter.acquire(1.0).await;
      })
    };

    // tokio's paused clock auto-advances to the next timer once the runtime
    // is otherwise idle, so simply awaiting the task drives it to completion.
    waiter.await.expect("waiter task completed");
  }

  #[tokio::test(start_paused = true)]
  async fn rate_limit_bound_over_burst() {
    // rate=2.0, capacity=5.0: 20 acquire(1) calls in parallel must take
    // at least (20-5)/2 = 7.5s of virtual time to all complete.
    let limiter = std::sync::Arc::new(RateLimiter::new(RateLimiterConfig::new(2.0, 5.0)));
    let start = tokio::time::Instant::now();
    let handles: Vec<_> = (0..20)
      .map(|_| {
        let limiter = limiter.clone();
        tokio::spawn(async move {
          limiter.acquire(1.0).await;
        })
      })
      .collect();
    futures::future::join_all(handles).await;
    let elapsed = start.elapsed();
    assert!(elapsed >= std::time::Duration::from_millis(7_400), "elapsed={elapsed:?}");
  }
}
