//! Observed-vs-pending discipline for user ids.
//!
//! Grounded on `spec.md` §4.5.5: a process-local set prevents the same
//! `mid` from being enqueued twice across the detail, comment, and reply
//! stages, which all discover author/owner ids independently. Every newly
//! observed id is durably recorded as pending *before* being pushed to the
//! queue, so a crash between those two steps still leaves a record the
//! next run can pick up from the pending-users ledger.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::error::Result;
use crate::progress::ProgressStore;

/// Shared by every stage that discovers user ids.
pub struct UserIdRouter {
  observed: Mutex<HashSet<String>>,
  progress: Arc<dyn ProgressStore>,
  user_tx: mpsc::Sender<String>,
}

impl UserIdRouter {
  #[must_use]
  pub fn new(progress: Arc<dyn ProgressStore>, user_tx: mpsc::Sender<String>) -> Self {
    Self { observed: Mutex::new(HashSet::new()), progress, user_tx }
  }

  /// Seed the in-memory set from a prior run's pending-users ledger and
  /// re-enqueue every restored id onto the user queue, so a crash between a
  /// prior run durably recording a pending `mid` and enriching it does not
  /// silently drop that `mid` forever. Ids already on disk are not
  /// re-appended to the ledger (though doing so would be harmless, it would
  /// be wasted I/O on every resumed run) — only the queue push is repeated.
  /// Callers must have their user-stage workers already draining the queue
  /// before calling this, since the send blocks on a full queue.
  pub async fn seed_from_store(&self) {
    let ids = self.progress.observed_user_ids().await;
    {
      let mut observed = self.observed.lock().await;
      observed.extend(ids.iter().cloned());
    }
    for mid in ids {
      let _ = self.user_tx.send(mid).await;
    }
  }

  /// Record `mid` as observed if it has not been seen this run, append it
  /// to the durable pending-users ledger, and push it onto the user queue.
  /// A no-op if already observed.
  pub async fn observe(&self, mid: &str) -> Result<()> {
    {
      let mut observed = self.observed.lock().await;
      if !observed.insert(mid.to_string()) {
        return Ok(());
      }
    }
    self.progress.observe_pending_user(mid).await?;
    let _ = self.user_tx.send(mid.to_string()).await;
    Ok(())
  }

  /// Every id observed this run (used to compute the shutdown compaction
  /// set against the emitted-mids ledger).
  pub async fn observed_snapshot(&self) -> HashSet<String> {
    self.observed.lock().await.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::progress::FileProgressStore;

  #[tokio::test]
  async fn observe_is_idempotent_within_a_run() {
    let dir = tempfile::tempdir().unwrap();
    let progress: Arc<dyn ProgressStore> = Arc::new(FileProgressStore::open(dir.path()).await.unwrap());
    let (tx, mut rx) = mpsc::channel(8);
    let router = UserIdRouter::new(progress, tx);

    router.observe("7").await.unwrap();
    router.observe("7").await.unwrap();
    router.observe("8").await.unwrap();

    let mut received = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
    received.sort();
    assert_eq!(received, vec!["7".to_string(), "8".to_string()]);
    assert_eq!(router.observed_snapshot().await.len(), 2);
  }

  #[tokio::test]
  async fn seed_from_store_reenqueues_restored_pending_ids() {
    let dir = tempfile::tempdir().unwrap();
    let progress: Arc<dyn ProgressStore> = Arc::new(FileProgressStore::open(dir.path()).await.unwrap());
    progress.observe_pending_user("101").await.unwrap();
    progress.observe_pending_user("102").await.unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    let router = UserIdRouter::new(progress, tx);
    router.seed_from_store().await;

    let mut received = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
    received.sort();
    assert_eq!(received, vec!["101".to_string(), "102".to_string()]);
    assert_eq!(router.observed_snapshot().await.len(), 2);

    // Already-observed ids from the restored set are not re-queued by a
    // later `observe` call for the same mid.
    router.observe("101").await.unwrap();
    assert!(rx.try_recv().is_err());
  }
}
