//! A tripped cancellation token stops a stage promptly, even with neither
//! work queued nor its upstream producers-done signal set.
//!
//! Covers the encouraged cancellation extension (`spec.md` §5/§9): absent a
//! trip, a worker with an empty queue and an unset producers-done signal
//! would poll forever; tripping the token must make it return well inside
//! one poll interval.

mod common;

use std::sync::Arc;
use std::time::Duration;

use biliclaw_core::metrics::Metrics;
use biliclaw_core::pipeline::context::ClientFactory;
use biliclaw_core::pipeline::queue::{ProducersDone, StageQueue};
use biliclaw_core::pipeline::users;
use biliclaw_core::progress::FileProgressStore;
use biliclaw_core::progress::ProgressStore;
use biliclaw_core::rate_limiter::{RateLimiter, RateLimiterConfig};
use biliclaw_core::retry::RetryConfig;
use biliclaw_core::signer::WbiSigner;
use biliclaw_core::sink::NullSink;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn worker_exits_promptly_on_cancellation_with_no_work_and_no_producers_done() {
  let dir = tempfile::tempdir().unwrap();
  let progress: Arc<dyn ProgressStore> = Arc::new(FileProgressStore::open(dir.path()).await.unwrap());
  let sink = Arc::new(NullSink);
  let rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig::new(100.0, 100.0)));
  let signer = Arc::new(WbiSigner::new());
  let client_factory = ClientFactory::new(Arc::new(biliclaw_core::CredentialPool::new(vec![], biliclaw_core::SelectionStrategy::RoundRobin)), rate_limiter, signer, RetryConfig::new(), "test-agent", Arc::new(Metrics::new()));

  let user_queue = Arc::new(StageQueue::<String>::bounded(4));
  // Never fired: the worker must not be relying on this to exit.
  let (_reply_producers_done, reply_producers_done_rx) = ProducersDone::new(1);
  let (user_producers_done, mut user_producers_done_rx) = ProducersDone::new(1);

  let cancellation = CancellationToken::new();
  let worker_cancellation = cancellation.clone();
  let handle = tokio::spawn(async move {
    users::run_worker(
      0,
      user_queue,
      reply_producers_done_rx,
      // A long poll interval: if the worker were waiting out the full
      // interval instead of racing the cancellation, this test would time
      // out well before the poll returns.
      Duration::from_secs(30),
      client_factory,
      progress,
      sink,
      user_producers_done,
      worker_cancellation,
    )
    .await;
  });

  cancellation.cancel();

  tokio::time::timeout(Duration::from_secs(2), handle).await.expect("worker should exit promptly once cancelled").unwrap();
  user_producers_done_rx.changed().await.unwrap();
  assert!(*user_producers_done_rx.borrow(), "the stage's producers-done latch must still fire on a cancelled exit");
}
