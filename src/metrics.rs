//! In-process counters for a harvest run.
//!
//! Grounded on `spec.md` §2's wiring/config/metrics share and on the
//! teacher's `Arc`-wrapped-state-plus-getters idiom (seen in the pool and
//! rate limiter). Kept deliberately small: a handful of atomics rather than
//! a full metrics-export pipeline, since no metrics backend is named by the
//! specification.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters, cheap to increment from any stage worker.
#[derive(Debug, Default)]
pub struct Metrics {
  videos_enriched: AtomicU64,
  comments_emitted: AtomicU64,
  replies_emitted: AtomicU64,
  users_emitted: AtomicU64,
  retries_attempted: AtomicU64,
  credential_failures: AtomicU64,
}

impl Metrics {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  pub fn incr_videos_enriched(&self) {
    self.videos_enriched.fetch_add(1, Ordering::Relaxed);
  }
  pub fn incr_comments_emitted(&self) {
    self.comments_emitted.fetch_add(1, Ordering::Relaxed);
  }
  pub fn incr_replies_emitted(&self) {
    self.replies_emitted.fetch_add(1, Ordering::Relaxed);
  }
  pub fn incr_users_emitted(&self) {
    self.users_emitted.fetch_add(1, Ordering::Relaxed);
  }
  pub fn incr_retries_attempted(&self) {
    self.retries_attempted.fetch_add(1, Ordering::Relaxed);
  }
  pub fn incr_credential_failures(&self) {
    self.credential_failures.fetch_add(1, Ordering::Relaxed);
  }

  #[must_use]
  pub fn snapshot(&self) -> MetricsSnapshot {
    MetricsSnapshot {
      videos_enriched: self.videos_enriched.load(Ordering::Relaxed),
      comments_emitted: self.comments_emitted.load(Ordering::Relaxed),
      replies_emitted: self.replies_emitted.load(Ordering::Relaxed),
      users_emitted: self.users_emitted.load(Ordering::Relaxed),
      retries_attempted: self.retries_attempted.load(Ordering::Relaxed),
      credential_failures: self.credential_failures.load(Ordering::Relaxed),
    }
  }
}

/// A point-in-time read of [`Metrics`], suitable for logging or a status
/// endpoint.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
  pub videos_enriched: u64,
  pub comments_emitted: u64,
  pub replies_emitted: u64,
  pub users_emitted: u64,
  pub retries_attempted: u64,
  pub credential_failures: u64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn counters_start_at_zero_and_increment() {
    let metrics = Metrics::new();
    metrics.incr_videos_enriched();
    metrics.incr_videos_enriched();
    metrics.incr_comments_emitted();
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.videos_enriched, 2);
    assert_eq!(snapshot.comments_emitted, 1);
    assert_eq!(snapshot.replies_emitted, 0);
  }
}
