//! Request retry loop: exponential backoff with jitter, and automatic
//! credential-failure reporting.
//!
//! Grounded on teacher's `retry_logic.rs` (the attempt-counting,
//! backoff-computing shape of the loop) and on
//! `original_source/spider/api.py`'s `retry_with_backoff` decorator, which
//! this generalizes: call the endpoint, and on a credential-related upstream
//! code mark the bound credential failed before sleeping, so the next
//! attempt's token acquisition is free to rotate onto a different one.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{HarvesterError, Result};
use crate::metrics::Metrics;

/// Backoff parameters for [`retry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
  max_retries: u32,
  base_delay: Duration,
  max_delay: Duration,
}

impl RetryConfig {
  /// Construct an explicit backoff configuration.
  #[must_use]
  pub fn with_explicit_config(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
    Self { max_retries, base_delay, max_delay }
  }

  /// Defaults matching the original: 3 retries, 1s base, 30s cap.
  #[must_use]
  pub fn new() -> Self {
    Self::with_explicit_config(3, Duration::from_secs(1), Duration::from_secs(30))
  }

  /// Chainable setter for the retry count.
  #[must_use]
  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  /// Chainable setter for the base delay.
  #[must_use]
  pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
    self.base_delay = base_delay;
    self
  }

  /// Chainable setter for the delay cap.
  #[must_use]
  pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
    self.max_delay = max_delay;
    self
  }

  /// Total attempts this configuration allows, including the first.
  #[must_use]
  pub fn max_attempts(&self) -> u32 {
    self.max_retries + 1
  }

  /// `delay = min(base * 2^attempt + uniform(0,1)s, cap)`, where `attempt`
  /// is zero-based (the delay before the *second* call is `attempt = 0`).
  #[must_use]
  pub fn backoff_for_attempt(&self, attempt: u32, jitter: f64) -> Duration {
    let exp = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
    Duration::from_secs_f64((exp + jitter).min(self.max_delay.as_secs_f64()))
  }
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self::new()
  }
}

/// Identifies the credential bound to the call being retried, so a
/// credential-related failure can be reported before the backoff sleep.
pub trait CredentialFailureSink {
  /// Record a failure against the given credential value.
  fn mark_failure(&self, value: &str, permanent: bool);
}

impl CredentialFailureSink for crate::credential::CredentialPool {
  fn mark_failure(&self, value: &str, permanent: bool) {
    crate::credential::CredentialPool::mark_failure(self, value, permanent);
  }
}

/// Run `attempt_fn` up to `config.max_attempts()` times.
///
/// `bound_credential` is the cookie value in use for this call, if any; on a
/// credential-related error it is reported to `credentials` before the
/// backoff sleep so the next attempt's token acquisition can rotate away
/// from it. Non-retryable errors ([`HarvesterError::is_retryable`] is
/// `false`) return immediately without consuming a retry. `metrics` is
/// updated for every actual retry and every credential-related failure;
/// a call that never retries (success on the first attempt, or a
/// zero-attempt policy like a validation probe) leaves both counters alone.
pub async fn retry<T, F, Fut>(config: RetryConfig, credentials: &dyn CredentialFailureSink, metrics: &Metrics, bound_credential: Option<&str>, mut attempt_fn: F) -> Result<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let mut attempt = 0u32;
  loop {
    match attempt_fn().await {
      Ok(value) => return Ok(value),
      Err(err) => {
        if !err.is_retryable() || attempt >= config.max_retries {
          if attempt >= config.max_retries && err.is_retryable() {
            return Err(HarvesterError::RetriesExhausted { attempts: attempt + 1, source: Box::new(err) });
          }
          return Err(err);
        }

        if err.is_credential_error() {
          metrics.incr_credential_failures();
          if let Some(value) = bound_credential {
            credentials.mark_failure(value, false);
          }
        }

        metrics.incr_retries_attempted();
        let jitter = rand::rng().random_range(0.0..1.0);
        let delay = config.backoff_for_attempt(attempt, jitter);
        tracing::warn!(attempt, ?delay, error = %err, "retrying after failed attempt");
        tokio::time::sleep(delay).await;
        attempt += 1;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Mutex;

  struct RecordingSink {
    marked: Mutex<Vec<String>>,
  }

  impl RecordingSink {
    fn new() -> Self {
      Self { marked: Mutex::new(Vec::new()) }
    }
  }

  impl CredentialFailureSink for RecordingSink {
    fn mark_failure(&self, value: &str, _permanent: bool) {
      self.marked.lock().unwrap().push(value.to_string());
    }
  }

  #[test]
  fn backoff_grows_exponentially_and_caps() {
    let config = RetryConfig::with_explicit_config(5, Duration::from_secs(1), Duration::from_secs(10));
    assert_eq!(config.backoff_for_attempt(0, 0.0), Duration::from_secs(1));
    assert_eq!(config.backoff_for_attempt(1, 0.0), Duration::from_secs(2));
    assert_eq!(config.backoff_for_attempt(2, 0.0), Duration::from_secs(4));
    assert_eq!(config.backoff_for_attempt(10, 0.0), Duration::from_secs(10));
  }

  #[tokio::test(start_paused = true)]
  async fn succeeds_without_retry_when_first_attempt_succeeds() {
    let sink = RecordingSink::new();
    let metrics = Metrics::new();
    let calls = AtomicU32::new(0);
    let result: Result<u32> = retry(RetryConfig::new(), &sink, &metrics, None, || {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Ok(42) }
    })
    .await;
    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.snapshot().retries_attempted, 0);
  }

  #[tokio::test(start_paused = true)]
  async fn retries_transport_errors_and_eventually_succeeds() {
    let sink = RecordingSink::new();
    let metrics = Metrics::new();
    let calls = AtomicU32::new(0);
    let result: Result<u32> = retry(RetryConfig::with_explicit_config(3, Duration::from_millis(1), Duration::from_millis(5)), &sink, &metrics, None, || {
      let n = calls.fetch_add(1, Ordering::SeqCst);
      async move {
        if n < 2 {
          Err(HarvesterError::Transport("connection reset".into()))
        } else {
          Ok(7)
        }
      }
    })
    .await;
    assert_eq!(result.unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(metrics.snapshot().retries_attempted, 2);
  }

  #[tokio::test(start_paused = true)]
  async fn exhausting_retries_returns_retries_exhausted() {
    let sink = RecordingSink::new();
    let metrics = Metrics::new();
    let result: Result<u32> = retry(RetryConfig::with_explicit_config(2, Duration::from_millis(1), Duration::from_millis(2)), &sink, &metrics, None, || async {
      Err(HarvesterError::Transport("down".into()))
    })
    .await;
    assert!(matches!(result, Err(HarvesterError::RetriesExhausted { attempts: 3, .. })));
    assert_eq!(metrics.snapshot().retries_attempted, 2);
  }

  #[tokio::test(start_paused = true)]
  async fn credential_error_marks_failure_before_next_attempt() {
    let sink = RecordingSink::new();
    let metrics = Metrics::new();
    let calls = AtomicU32::new(0);
    let result: Result<u32> = retry(RetryConfig::with_explicit_config(2, Duration::from_millis(1), Duration::from_millis(2)), &sink, &metrics, Some("cookie-1"), || {
      let n = calls.fetch_add(1, Ordering::SeqCst);
      async move {
        if n == 0 {
          Err(HarvesterError::Application { code: -412, message: "request intercepted".into() })
        } else {
          Ok(1)
        }
      }
    })
    .await;
    assert!(result.is_ok());
    assert_eq!(sink.marked.lock().unwrap().as_slice(), ["cookie-1"]);
    assert_eq!(metrics.snapshot().credential_failures, 1);
  }

  #[tokio::test]
  async fn non_retryable_error_returns_immediately() {
    let sink = RecordingSink::new();
    let metrics = Metrics::new();
    let calls = AtomicU32::new(0);
    let result: Result<u32> = retry(RetryConfig::new(), &sink, &metrics, None, || {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Err(HarvesterError::MissingField { field: "bvid", entity: "video".into() }) }
    })
    .await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
