//! Wires the five stages together and drives one harvest run end to end.
//!
//! Grounded on `spec.md` §2's data flow and §9's explicit-dependency-
//! injection note: the credential pool, rate limiter, and signer are built
//! once here and threaded into every stage through a [`ClientFactory`],
//! rather than living as process-wide singletons. A shared
//! [`CancellationToken`] is threaded the same way, wired to `Ctrl-C` by
//! [`run`], so every stage honors one shutdown signal without a
//! hand-rolled atomic flag.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::HarvestConfig;
use crate::credential::CredentialPool;
use crate::error::Result;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::observability::stage_worker_span;
use crate::pipeline::context::ClientFactory;
use crate::pipeline::queue::{ProducersDone, StageQueue};
use crate::pipeline::tasks::{ReplyTask, VideoTask};
use crate::pipeline::user_router::UserIdRouter;
use crate::pipeline::{comments, replies, search, users};
use crate::progress::{FileProgressStore, ProgressStore};
use crate::rate_limiter::RateLimiter;
use crate::signer::WbiSigner;
use crate::sink::{JsonlSink, NullSink, Sink};

/// Aggregate counters returned once a run completes, for the entry point's
/// final log line.
#[derive(Debug, Default)]
pub struct HarvestSummary {
  pub candidates_found: usize,
  pub videos_enriched: usize,
  pub already_emitted_forwarded: usize,
  pub metrics: MetricsSnapshot,
}

/// Run one full harvest: search every configured keyword, enrich videos,
/// walk comments and replies, and enrich users, draining every stage
/// before returning. Flushes the pending-users ledger on return regardless
/// of how the run ended.
///
/// A `Ctrl-C` (or other `SIGINT`) trips an internal [`CancellationToken`]
/// shared by every stage; there is no other global cancellation signal
/// (`spec.md` §5/§9). Each worker still finishes its current durable write
/// before observing the trip, so the progress store and pending-users
/// ledger are flushed exactly as on an orderly finish.
pub async fn run(config: HarvestConfig, credentials: Arc<CredentialPool>) -> Result<HarvestSummary> {
  let cancellation = CancellationToken::new();
  {
    let cancellation = cancellation.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown signal received, draining in-flight work");
        cancellation.cancel();
      }
    });
  }
  run_cancellable(config, credentials, cancellation).await
}

/// Like [`run`], but the caller supplies the [`CancellationToken`] instead
/// of one being wired to `Ctrl-C` internally — used by tests and by
/// embedders that already own a shutdown signal.
pub async fn run_cancellable(config: HarvestConfig, credentials: Arc<CredentialPool>, cancellation: CancellationToken) -> Result<HarvestSummary> {
  config.validate()?;

  let rate_limiter = Arc::new(RateLimiter::new(config.rate_limiter()));
  let signer = Arc::new(WbiSigner::new());
  let metrics = Arc::new(Metrics::new());
  let mut client_factory = ClientFactory::new(credentials, rate_limiter, signer, config.retry(), "biliclaw-harvester/0.1", metrics.clone());
  if let Some(base_url) = config.api_base_url() {
    client_factory = client_factory.with_base_url(base_url.to_string());
  }

  let progress: Arc<dyn ProgressStore> = Arc::new(FileProgressStore::open_with_resume(config.progress_dir(), config.resume()).await?);
  let sink: Arc<dyn Sink> = match config.sink_path() {
    Some(path) => Arc::new(JsonlSink::open(path).await?),
    None => Arc::new(NullSink),
  };

  let comment_queue = Arc::new(StageQueue::<VideoTask>::bounded(config.queue_capacity()));
  let reply_queue = Arc::new(StageQueue::<ReplyTask>::bounded(config.queue_capacity()));
  let user_queue = Arc::new(StageQueue::<String>::bounded(config.queue_capacity()));

  let user_router = Arc::new(UserIdRouter::new(progress.clone(), user_queue.sender()));

  let (video_producers_done, video_producers_done_rx) = ProducersDone::new(1);
  let (comment_producers_done, comment_producers_done_rx) = ProducersDone::new(config.workers_per_stage());
  let (reply_producers_done, reply_producers_done_rx) = ProducersDone::new(config.workers_per_stage());
  let (user_producers_done, _user_producers_done_rx) = ProducersDone::new(config.workers_per_stage());

  let comment_handles: Vec<_> = (0..config.workers_per_stage())
    .map(|worker_id| {
      tokio::spawn(
        comments::run_worker(
          worker_id,
          comment_queue.clone(),
          video_producers_done_rx.clone(),
          config.stage_poll_interval(),
          client_factory.clone(),
          progress.clone(),
          sink.clone(),
          user_router.clone(),
          reply_queue.sender(),
          comment_producers_done.clone(),
          cancellation.clone(),
        )
        .instrument(stage_worker_span("comments", worker_id)),
      )
    })
    .collect();

  let reply_handles: Vec<_> = if config.fetch_replies() {
    (0..config.workers_per_stage())
      .map(|worker_id| {
        tokio::spawn(
          replies::run_worker(
            worker_id,
            reply_queue.clone(),
            comment_producers_done_rx.clone(),
            config.stage_poll_interval(),
            client_factory.clone(),
            progress.clone(),
            sink.clone(),
            user_router.clone(),
            reply_producers_done.clone(),
            cancellation.clone(),
          )
          .instrument(stage_worker_span("replies", worker_id)),
        )
      })
      .collect()
  } else {
    // Replies disabled: the stage is skipped, so its producers-done signal
    // must still fire once comments are done, or the user stage would wait
    // forever on a latch nothing ever closes.
    reply_producers_done.worker_exited();
    Vec::new()
  };

  let user_handles: Vec<_> = if config.fetch_user_cards() {
    (0..config.workers_per_stage())
      .map(|worker_id| {
        tokio::spawn(
          users::run_worker(
            worker_id,
            user_queue.clone(),
            reply_producers_done_rx.clone(),
            config.stage_poll_interval(),
            client_factory.clone(),
            progress.clone(),
            sink.clone(),
            user_producers_done.clone(),
            cancellation.clone(),
          )
          .instrument(stage_worker_span("users", worker_id)),
        )
      })
      .collect()
  } else {
    Vec::new()
  };

  // Queue-A/B/C workers are draining by now, so re-enqueuing restored
  // pending users here cannot block forever on a full, consumer-less queue.
  if config.resume() && config.resume_pending_mids() {
    user_router.seed_from_store().await;
  }

  let mut summary = HarvestSummary::default();
  for keyword in config.search_keywords() {
    if cancellation.is_cancelled() {
      tracing::info!(keyword = %keyword, "shutdown in progress, skipping remaining search keywords");
      break;
    }
    let pages_per_worker = config.max_search_pages().div_ceil(config.workers_per_stage().max(1));
    let outcome = search::run(
      keyword,
      config.workers_per_stage(),
      pages_per_worker,
      &client_factory,
      progress.clone(),
      sink.clone(),
      user_router.clone(),
      comment_queue.sender(),
      &cancellation,
    )
    .await?;
    summary.candidates_found += outcome.candidates_found;
    summary.videos_enriched += outcome.videos_enriched;
    summary.already_emitted_forwarded += outcome.already_emitted_forwarded;
  }
  video_producers_done.worker_exited();

  for handle in comment_handles {
    let _ = handle.await;
  }
  for handle in reply_handles {
    let _ = handle.await;
  }
  for handle in user_handles {
    let _ = handle.await;
  }

  let observed = user_router.observed_snapshot().await;
  let emitted = progress.emitted_ids(crate::progress::mids_ledger()).await;
  let remaining: std::collections::HashSet<String> = observed.difference(&emitted).cloned().collect();
  progress.compact_pending_users(&remaining).await?;

  summary.metrics = metrics.snapshot();
  Ok(summary)
}
