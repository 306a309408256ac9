//! Credential pool: rotation, failure accounting, and validation.
//!
//! Grounded on `original_source/spider/cookie_pool.py`'s `CookiePool`: an
//! insertion-order list of credentials guarded by a single reentrant lock,
//! round-robin or random selection over the `enabled && is_valid` subset,
//! and a fail-count threshold that permanently excludes a credential from
//! rotation once it is reached.

use std::sync::Arc;

use parking_lot::ReentrantMutex;
use std::cell::RefCell;

/// Selection policy for [`CredentialPool::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
  /// Cycle through the available subset in insertion order.
  RoundRobin,
  /// Pick uniformly at random from the available subset.
  Random,
}

impl Default for SelectionStrategy {
  fn default() -> Self {
    SelectionStrategy::RoundRobin
  }
}

/// A single credential and its mutable health state.
#[derive(Debug, Clone)]
pub struct Credential {
  /// Display name, used in logs; not sent on the wire.
  name: String,
  /// Opaque cookie value sent as the `Cookie` header.
  value: String,
  enabled: bool,
  is_valid: bool,
  fail_count: u32,
  max_fails: u32,
}

impl Credential {
  /// Create a new credential with the default failure threshold (3).
  #[must_use]
  pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
    Self::with_max_fails(name, value, 3)
  }

  /// Create a new credential with an explicit failure threshold.
  #[must_use]
  pub fn with_max_fails(name: impl Into<String>, value: impl Into<String>, max_fails: u32) -> Self {
    Self {
      name: name.into(),
      value: value.into(),
      enabled: true,
      is_valid: true,
      fail_count: 0,
      max_fails,
    }
  }

  /// Display name.
  #[must_use]
  pub fn name(&self) -> &str {
    &self.name
  }

  /// The opaque cookie value.
  #[must_use]
  pub fn value(&self) -> &str {
    &self.value
  }

  /// Whether the credential is eligible for rotation (`enabled && is_valid`).
  #[must_use]
  pub fn is_available(&self) -> bool {
    self.enabled && self.is_valid
  }

  /// Current consecutive failure count.
  #[must_use]
  pub fn fail_count(&self) -> u32 {
    self.fail_count
  }
}

impl std::fmt::Display for Credential {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "Credential({}, fails={}/{}, valid={}, enabled={})", self.name, self.fail_count, self.max_fails, self.is_valid, self.enabled)
  }
}

/// A point-in-time view of pool health, returned by [`CredentialPool::status`].
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PoolStatus {
  /// Total credentials loaded, enabled or not.
  pub total: usize,
  /// Credentials with `enabled == true`.
  pub enabled: usize,
  /// Credentials with `enabled && is_valid`.
  pub valid: usize,
  /// Active selection strategy.
  pub strategy: SelectionStrategy,
}

struct PoolState {
  credentials: Vec<Credential>,
  cursor: usize,
  strategy: SelectionStrategy,
}

/// Process-wide set of credentials with rotation and failure accounting.
///
/// All mutable state lives behind a single reentrant lock so that
/// [`CredentialPool::validate_one`] may call back into [`CredentialPool::mark_failure`]
/// (or any other mutator) from within a held lock without deadlocking —
/// mirroring the Python original's single `threading.RLock()`.
pub struct CredentialPool {
  state: Arc<ReentrantMutex<RefCell<PoolState>>>,
}

impl std::fmt::Debug for CredentialPool {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let status = self.status();
    f.debug_struct("CredentialPool")
      .field("total", &status.total)
      .field("enabled", &status.enabled)
      .field("valid", &status.valid)
      .field("strategy", &status.strategy)
      .finish()
  }
}

impl CredentialPool {
  /// Build a pool from a pre-loaded list of credentials.
  #[must_use]
  pub fn new(credentials: Vec<Credential>, strategy: SelectionStrategy) -> Self {
    Self {
      state: Arc::new(ReentrantMutex::new(RefCell::new(PoolState { credentials, cursor: 0, strategy }))),
    }
  }

  /// Select the next available credential, or `None` if the pool is empty
  /// or every credential has been excluded (callers then proceed
  /// unauthenticated).
  ///
  /// Selection is O(n) in the number of credentials and linearizable: the
  /// whole operation runs under the pool lock. The round-robin cursor
  /// advances exactly once per successful selection and does not rewind
  /// when credentials are excluded around it.
  #[must_use]
  pub fn next(&self) -> Option<Credential> {
    let guard = self.state.lock();
    let mut state = guard.borrow_mut();
    let available: Vec<usize> = state.credentials.iter().enumerate().filter(|(_, c)| c.is_available()).map(|(i, _)| i).collect();
    if available.is_empty() {
      return None;
    }

    let chosen_index = match state.strategy {
      SelectionStrategy::RoundRobin => {
        let pos = state.cursor % available.len();
        state.cursor = state.cursor.wrapping_add(1);
        available[pos]
      }
      SelectionStrategy::Random => {
        use rand::Rng;
        let pos = rand::rng().random_range(0..available.len());
        available[pos]
      }
    };

    Some(state.credentials[chosen_index].clone())
  }

  /// Record a failure for the credential identified by its cookie value.
  ///
  /// If `permanent`, the credential is immediately flipped to
  /// `is_valid = false, enabled = false`. Otherwise its failure counter is
  /// incremented; once it reaches `max_fails`, `is_valid` flips to `false`
  /// (the credential stays `enabled` so a later [`reset`](Self::reset) can
  /// bring it back). Failures reported for a value not present in the pool
  /// are ignored.
  pub fn mark_failure(&self, value: &str, permanent: bool) {
    let guard = self.state.lock();
    let mut state = guard.borrow_mut();
    let Some(cred) = state.credentials.iter_mut().find(|c| c.value == value) else {
      return;
    };
    if permanent {
      cred.is_valid = false;
      cred.enabled = false;
    } else {
      cred.fail_count += 1;
      if cred.fail_count >= cred.max_fails {
        cred.is_valid = false;
      }
    }
  }

  /// Reset a credential's failure count and mark it valid again.
  pub fn reset(&self, value: &str) {
    let guard = self.state.lock();
    let mut state = guard.borrow_mut();
    if let Some(cred) = state.credentials.iter_mut().find(|c| c.value == value) {
      cred.fail_count = 0;
      cred.is_valid = true;
    }
  }

  /// Probe a single credential via the supplied side-channel check (an
  /// authenticated endpoint that reports whether the session is logged in)
  /// and update its `is_valid` flag accordingly.
  pub fn validate_one(&self, value: &str, is_logged_in: bool) {
    let guard = self.state.lock();
    let mut state = guard.borrow_mut();
    if let Some(cred) = state.credentials.iter_mut().find(|c| c.value == value) {
      cred.is_valid = is_logged_in;
    }
  }

  /// Values of every enabled credential, for a caller driving serial
  /// validation probes (`validate_one` per value) at load time.
  #[must_use]
  pub fn enabled_values(&self) -> Vec<String> {
    let guard = self.state.lock();
    let state = guard.borrow();
    state.credentials.iter().filter(|c| c.enabled).map(|c| c.value.clone()).collect()
  }

  /// Snapshot of pool health.
  #[must_use]
  pub fn status(&self) -> PoolStatus {
    let guard = self.state.lock();
    let state = guard.borrow();
    PoolStatus {
      total: state.credentials.len(),
      enabled: state.credentials.iter().filter(|c| c.enabled).count(),
      valid: state.credentials.iter().filter(|c| c.is_available()).count(),
      strategy: state.strategy,
    }
  }

  /// Current failure count for a credential, used by tests asserting
  /// fairness/exclusion properties.
  #[must_use]
  pub fn fail_count_of(&self, value: &str) -> Option<u32> {
    let guard = self.state.lock();
    let state = guard.borrow();
    state.credentials.iter().find(|c| c.value == value).map(Credential::fail_count)
  }
}
