//! HTTP client wrapper: rate limiting, retry, and credential-failure
//! attribution composed around a bound [`Session`].
//!
//! Grounded on teacher's `retry_logic.rs` for the overall wrapper shape and
//! on `spec.md` §4.4 for the exact sequencing: acquire a token before every
//! attempt (including retries), run the typed call, and on a
//! credential-related application error mark the bound credential failed
//! before the backoff sleep.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::credential::{Credential, CredentialPool};
use crate::error::{HarvesterError, Result};
use crate::http::session::Session;
use crate::metrics::Metrics;
use crate::rate_limiter::RateLimiter;
use crate::retry::{retry, RetryConfig};
use crate::signer::WbiSigner;

/// Shared infrastructure plus one bound session, threaded into every
/// pipeline stage worker.
pub struct HttpClient {
  session: Session,
  rate_limiter: Arc<RateLimiter>,
  credentials: Arc<CredentialPool>,
  retry_config: RetryConfig,
  signer: Arc<WbiSigner>,
  base_url: String,
  metrics: Arc<Metrics>,
}

const API_ROOT: &str = "https://api.bilibili.com";

impl HttpClient {
  /// Construct a client against the production API root. Binds a
  /// credential from `credentials` up front (per worker, at
  /// session-creation time); if the pool is empty the session proceeds
  /// unauthenticated.
  #[must_use]
  pub fn new(credentials: Arc<CredentialPool>, rate_limiter: Arc<RateLimiter>, signer: Arc<WbiSigner>, retry_config: RetryConfig, user_agent: impl Into<String>, metrics: Arc<Metrics>) -> Self {
    Self::with_base_url(credentials, rate_limiter, signer, retry_config, user_agent, API_ROOT, metrics)
  }

  /// As [`Self::new`], but against an arbitrary base URL — the seam tests
  /// use to point a client at a local `wiremock` server instead of the
  /// production host.
  #[must_use]
  #[allow(clippy::too_many_arguments)]
  pub fn with_base_url(
    credentials: Arc<CredentialPool>,
    rate_limiter: Arc<RateLimiter>,
    signer: Arc<WbiSigner>,
    retry_config: RetryConfig,
    user_agent: impl Into<String>,
    base_url: impl Into<String>,
    metrics: Arc<Metrics>,
  ) -> Self {
    let credential = credentials.next();
    Self { session: Session::new(credential, user_agent), rate_limiter, credentials, retry_config, signer, base_url: base_url.into(), metrics }
  }

  #[must_use]
  pub fn signer(&self) -> &WbiSigner {
    &self.signer
  }

  #[must_use]
  pub fn session(&self) -> &Session {
    &self.session
  }

  /// The run's shared metrics counters, for a pipeline stage worker to
  /// increment on a successful emit.
  #[must_use]
  pub fn metrics(&self) -> &Metrics {
    &self.metrics
  }

  /// Force this client's bound credential, bypassing the pool's rotation.
  /// Used to probe one specific credential (e.g. a load-time validation
  /// sweep) rather than whichever one `next()` would have handed out.
  pub fn rebind(&mut self, credential: Option<Credential>) {
    self.session.rebind(credential);
  }

  fn cookie_header(&self) -> Option<String> {
    self.session.credential_value().map(str::to_string)
  }

  /// GET `path` with query parameters encoded by the transport, parse the
  /// standard `{code, message, data}` envelope, and return `data` decoded
  /// as `T`. Wrapped in the full retry/rate-limit/credential-attribution
  /// sequence.
  pub async fn get_json<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T> {
    let url = format!("{}{path}", self.base_url);
    let bound = self.cookie_header();
    retry(self.retry_config, self.credentials.as_ref(), &self.metrics, bound.as_deref(), || self.call_envelope(&url, params)).await
  }

  /// GET a fully pre-built query string without re-encoding it — required
  /// for signed endpoints, where the signature covers the exact bytes that
  /// must appear on the wire.
  pub async fn get_json_raw_query<T: DeserializeOwned>(&self, path: &str, raw_query: &str) -> Result<T> {
    let url = format!("{}{path}?{raw_query}", self.base_url);
    let bound = self.cookie_header();
    retry(self.retry_config, self.credentials.as_ref(), &self.metrics, bound.as_deref(), || self.call_envelope_raw(&url)).await
  }

  async fn call_envelope<T: DeserializeOwned>(&self, url: &str, params: &[(&str, String)]) -> Result<T> {
    self.rate_limiter.acquire(1.0).await;
    let mut request = self.session.client().get(url).query(params);
    if let Some(cookie) = self.cookie_header() {
      request = request.header(reqwest::header::COOKIE, cookie);
    }
    let response = request.send().await?;
    let body: Value = response.json().await?;
    decode_envelope(body)
  }

  async fn call_envelope_raw<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
    self.rate_limiter.acquire(1.0).await;
    let mut request = self.session.client().get(url);
    if let Some(cookie) = self.cookie_header() {
      request = request.header(reqwest::header::COOKIE, cookie);
    }
    let response = request.send().await?;
    let body: Value = response.json().await?;
    decode_envelope(body)
  }
}

fn decode_envelope<T: DeserializeOwned>(envelope: Value) -> Result<T> {
  let code = envelope.get("code").and_then(Value::as_i64).unwrap_or(-1);
  if code != 0 {
    let message = envelope.get("message").and_then(Value::as_str).unwrap_or("").to_string();
    return Err(HarvesterError::Application { code, message });
  }
  let data = envelope.get("data").cloned().unwrap_or(Value::Null);
  serde_json::from_value(data).map_err(HarvesterError::from)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn decode_envelope_returns_data_on_success() {
    let envelope = json!({"code": 0, "message": "0", "data": {"bvid": "BV1xx"}});
    #[derive(serde::Deserialize)]
    struct Data {
      bvid: String,
    }
    let data: Data = decode_envelope(envelope).unwrap();
    assert_eq!(data.bvid, "BV1xx");
  }

  #[test]
  fn decode_envelope_surfaces_application_error() {
    let envelope = json!({"code": -352, "message": "risk control"});
    let result: Result<Value> = decode_envelope(envelope);
    assert!(matches!(result, Err(HarvesterError::Application { code: -352, .. })));
  }

  #[test]
  fn rebind_overrides_the_bound_session_credential() {
    let credentials = Arc::new(CredentialPool::new(vec![Credential::new("c1", "cookie-1")], crate::credential::SelectionStrategy::RoundRobin));
    let rate_limiter = Arc::new(crate::rate_limiter::RateLimiter::new(crate::rate_limiter::RateLimiterConfig::new(100.0, 100.0)));
    let signer = Arc::new(WbiSigner::new());
    let mut client = HttpClient::new(credentials, rate_limiter, signer, RetryConfig::new(), "test-agent", Arc::new(Metrics::new()));
    assert_eq!(client.session().credential_value(), Some("cookie-1"));

    client.rebind(Some(Credential::new("probe", "cookie-other")));
    assert_eq!(client.session().credential_value(), Some("cookie-other"));

    client.rebind(None);
    assert_eq!(client.session().credential_value(), None);
  }
}
