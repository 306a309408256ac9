//! Per-worker HTTP client construction.
//!
//! Each pipeline worker owns its own [`HttpClient`], bound to its own
//! credential at creation, per `spec.md` §4.4's "sessions are not migrated
//! between workers" rule. The factory holds the shared leaves (credential
//! pool, rate limiter, signer) that every session is built from.

use std::sync::Arc;
use std::time::Duration;

use crate::credential::{Credential, CredentialPool};
use crate::http::{endpoints, HttpClient};
use crate::metrics::Metrics;
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryConfig;
use crate::signer::WbiSigner;

/// A single-attempt retry policy: no sleep, no retry-loop bookkeeping on
/// failure. Used for validation probes, which must observe whether a
/// credential works right now, not whether it eventually does after
/// backing off and mutating the pool's failure counters.
fn no_retry() -> RetryConfig {
  RetryConfig::with_explicit_config(0, Duration::from_secs(0), Duration::from_secs(0))
}

/// Builds a fresh, independently-credentialed [`HttpClient`] per call.
#[derive(Clone)]
pub struct ClientFactory {
  credentials: Arc<CredentialPool>,
  rate_limiter: Arc<RateLimiter>,
  signer: Arc<WbiSigner>,
  retry: RetryConfig,
  user_agent: String,
  base_url: Option<String>,
  metrics: Arc<Metrics>,
}

impl ClientFactory {
  #[must_use]
  #[allow(clippy::too_many_arguments)]
  pub fn new(credentials: Arc<CredentialPool>, rate_limiter: Arc<RateLimiter>, signer: Arc<WbiSigner>, retry: RetryConfig, user_agent: impl Into<String>, metrics: Arc<Metrics>) -> Self {
    Self { credentials, rate_limiter, signer, retry, user_agent: user_agent.into(), base_url: None, metrics }
  }

  /// Point every client this factory builds at `base_url` instead of the
  /// production API root — used to aim a test run at a local mock server.
  #[must_use]
  pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
    self.base_url = Some(base_url.into());
    self
  }

  /// This run's shared metrics counters.
  #[must_use]
  pub fn metrics(&self) -> Arc<Metrics> {
    self.metrics.clone()
  }

  /// Build a new session-bound client, binding the next available
  /// credential from the pool.
  #[must_use]
  pub fn build(&self) -> HttpClient {
    self.build_with_retry(self.retry)
  }

  /// Like [`Self::build`], but with an explicit retry policy overriding the
  /// factory's configured one — used for one-shot probes that must not
  /// sleep or mark credential failures on the normal retry loop's schedule.
  #[must_use]
  pub fn build_with_retry(&self, retry: RetryConfig) -> HttpClient {
    match &self.base_url {
      Some(base_url) => HttpClient::with_base_url(self.credentials.clone(), self.rate_limiter.clone(), self.signer.clone(), retry, self.user_agent.clone(), base_url.clone(), self.metrics.clone()),
      None => HttpClient::new(self.credentials.clone(), self.rate_limiter.clone(), self.signer.clone(), retry, self.user_agent.clone(), self.metrics.clone()),
    }
  }
}

/// Probe every enabled credential in `credentials` against the
/// authenticated `nav` endpoint, one at a time, and update each
/// credential's `is_valid` flag with the result.
///
/// Grounded on `original_source/spider/cookie_pool.py`'s
/// `CookiePool.validate_all`, which does the same serial probe-and-update
/// sweep under its pool lock (here the lock is per-credential, scoped to
/// each `validate_one` call, since the probes themselves are independent
/// network calls that don't need to serialize against each other's I/O).
/// Each probe uses [`no_retry`] rather than the factory's configured retry
/// policy — a validation sweep must see whether a credential is good right
/// now, not spend several seconds backing off, and a failed probe must not
/// itself drive `fail_count` through the normal retry loop's bookkeeping.
pub async fn validate_all_credentials(credentials: &CredentialPool, client_factory: &ClientFactory) {
  for value in credentials.enabled_values() {
    let mut client = client_factory.build_with_retry(no_retry());
    client.rebind(Some(Credential::new(value.clone(), value.clone())));
    let is_logged_in = match endpoints::nav(&client).await {
      Ok(data) => endpoints::is_logged_in(&data),
      Err(err) => {
        tracing::warn!(error = %err, "credential validation probe failed, marking invalid");
        false
      }
    };
    credentials.validate_one(&value, is_logged_in);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::credential::SelectionStrategy;
  use crate::rate_limiter::{RateLimiter, RateLimiterConfig};
  use serde_json::json;
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[tokio::test]
  async fn validate_all_marks_failed_probe_as_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/x/web-interface/nav"))
      .and(header("Cookie", "good-cookie"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "message": "0", "data": {"isLogin": true}})))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/x/web-interface/nav"))
      .and(header("Cookie", "stale-cookie"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": -101, "message": "account not logged in"})))
      .mount(&server)
      .await;

    let credentials = Arc::new(CredentialPool::new(vec![Credential::new("good", "good-cookie"), Credential::new("stale", "stale-cookie")], SelectionStrategy::RoundRobin));
    let rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig::new(100.0, 100.0)));
    let signer = Arc::new(WbiSigner::new());
    let client_factory = ClientFactory::new(credentials.clone(), rate_limiter, signer, RetryConfig::new(), "test-agent", Arc::new(Metrics::new())).with_base_url(server.uri());

    validate_all_credentials(&credentials, &client_factory).await;

    let status = credentials.status();
    assert_eq!(status.total, 2);
    // The stale cookie's nav probe fails (code != 0), so `validate_one`
    // marks it invalid; the good cookie stays available for rotation.
    assert_eq!(status.valid, 1);
    // The probe must not go through the normal retry loop's failure
    // bookkeeping: one failed attempt, not `fail_count` incremented.
    assert_eq!(credentials.fail_count_of("stale-cookie"), Some(0));
  }
}
