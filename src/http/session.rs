//! Per-worker HTTP session.
//!
//! Grounded on `spec.md` §9's redesign note replacing the source's
//! `_current_cookie`-on-session monkey-patching with an explicit struct:
//! each worker binds exactly one credential at session-creation time and
//! never migrates it.

use reqwest::Client;
use std::time::Duration;

use crate::credential::Credential;

/// Per-call timeout, per `spec.md` §5 (10-15s band).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(12);

/// One worker's HTTP client plus the credential bound to it for the
/// lifetime of the session.
pub struct Session {
  client: Client,
  credential: Option<Credential>,
  user_agent: String,
}

impl Session {
  /// Build a session, binding `credential` (if any) for its lifetime.
  pub fn new(credential: Option<Credential>, user_agent: impl Into<String>) -> Self {
    let user_agent = user_agent.into();
    let client = Client::builder().timeout(REQUEST_TIMEOUT).user_agent(user_agent.clone()).build().expect("reqwest client builder is infallible here");
    Self { client, credential, user_agent }
  }

  #[must_use]
  pub fn client(&self) -> &Client {
    &self.client
  }

  #[must_use]
  pub fn credential(&self) -> Option<&Credential> {
    self.credential.as_ref()
  }

  /// The bound credential's cookie value, if any is bound.
  #[must_use]
  pub fn credential_value(&self) -> Option<&str> {
    self.credential.as_ref().map(Credential::value)
  }

  #[must_use]
  pub fn user_agent(&self) -> &str {
    &self.user_agent
  }

  /// Replace the bound credential, e.g. after the pool reassigns this
  /// worker to a fresh one following exhausted retries.
  pub fn rebind(&mut self, credential: Option<Credential>) {
    self.credential = credential;
  }
}
