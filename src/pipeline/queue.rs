//! Bounded inter-stage queues and the producers-done handshake.
//!
//! Grounded on `spec.md` §4.5 / §5 / §9: each stage polls its input queue
//! with a short timeout and checks the upstream "producers done" event
//! *after* a failed dequeue, never before, to avoid a race against a
//! producer that publishes between the check and the dequeue. The signal
//! itself is a counted latch (an atomic active-worker count plus a
//! broadcast), not an inference from queue emptiness or timing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};

/// A stage's "every worker has exited" signal.
///
/// Constructed with the stage's worker count; each worker calls
/// [`ProducersDone::worker_exited`] exactly once, on its own exit. The
/// latch fires when the count reaches zero.
pub struct ProducersDone {
  active: AtomicU32,
  tx: watch::Sender<bool>,
}

impl ProducersDone {
  /// Create the latch and return it alongside a receiver downstream
  /// workers can poll or await.
  #[must_use]
  pub fn new(worker_count: u32) -> (Arc<Self>, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(worker_count == 0);
    (Arc::new(Self { active: AtomicU32::new(worker_count), tx }), rx)
  }

  /// Called once by each worker as it exits. Fires the signal when the
  /// last worker has called this.
  pub fn worker_exited(&self) {
    if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
      let _ = self.tx.send(true);
    }
  }
}

/// A bounded multi-producer/multi-consumer queue between two stages.
///
/// Backpressure is real: a full queue blocks the producer's `send`, which
/// is acceptable because consumers only ever block on their own queue, not
/// while holding a lock another stage needs — so this cannot deadlock with
/// the producers-done handshake (a blocked producer is, by definition, not
/// yet done).
pub struct StageQueue<T> {
  sender: mpsc::Sender<T>,
  receiver: AsyncMutex<mpsc::Receiver<T>>,
}

impl<T: Send + 'static> StageQueue<T> {
  /// Create a queue with the given bounded capacity.
  #[must_use]
  pub fn bounded(capacity: usize) -> Self {
    let (sender, receiver) = mpsc::channel(capacity);
    Self { sender, receiver: AsyncMutex::new(receiver) }
  }

  /// A clone of the sending half, handed to each producing worker.
  #[must_use]
  pub fn sender(&self) -> mpsc::Sender<T> {
    self.sender.clone()
  }

  /// Wait up to `timeout` for the next item. `None` means either the
  /// timeout elapsed with nothing available, or every sender has been
  /// dropped — callers distinguish the latter only via the stage's
  /// [`ProducersDone`] signal, consulted after this call returns `None`.
  pub async fn recv_timeout(&self, timeout: Duration) -> Option<T> {
    let mut receiver = self.receiver.lock().await;
    tokio::time::timeout(timeout, receiver.recv()).await.ok().flatten()
  }
}
