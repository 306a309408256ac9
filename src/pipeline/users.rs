//! Stage 5: user profile enrichment.
//!
//! Grounded on `spec.md` §4.5.5. Workers drain queue-C (`mid`), skip ids
//! already emitted, and fetch the user-card endpoint for the rest.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::entities::UserCard;
use crate::error::Result;
use crate::http::endpoints;
use crate::pipeline::context::ClientFactory;
use crate::pipeline::queue::{ProducersDone, StageQueue};
use crate::progress::{self, ProgressStore};
use crate::sink::{Sink, Topic};

/// Run one user-enrichment worker until the queue drains and
/// `reply_producers_done` has fired.
#[allow(clippy::too_many_arguments)]
pub async fn run_worker(
  worker_id: u32,
  queue: Arc<StageQueue<String>>,
  mut reply_producers_done: tokio::sync::watch::Receiver<bool>,
  poll_interval: Duration,
  client_factory: ClientFactory,
  progress: Arc<dyn ProgressStore>,
  sink: Arc<dyn Sink>,
  user_producers_done: Arc<ProducersDone>,
  cancellation: CancellationToken,
) {
  let client = client_factory.build();
  loop {
    tokio::select! {
      () = cancellation.cancelled() => break,
      received = queue.recv_timeout(poll_interval) => match received {
        Some(mid) => {
          if let Err(err) = enrich_one(&client, &mid, progress.as_ref(), sink.as_ref()).await {
            tracing::warn!(worker_id, mid = %mid, error = %err, "user card fetch failed, skipping");
          }
        }
        None => {
          if *reply_producers_done.borrow() {
            break;
          }
        }
      },
    }
  }
  user_producers_done.worker_exited();
}

async fn enrich_one(client: &crate::http::HttpClient, mid: &str, progress: &dyn ProgressStore, sink: &dyn Sink) -> Result<()> {
  if progress.is_emitted(progress::mids_ledger(), mid).await {
    return Ok(());
  }
  let data = endpoints::card(client, mid).await?;
  let card = UserCard::from_card_data(&data, mid)?;
  sink.emit(Topic::Account, &card.mid, &card.body).await?;
  progress.mark_emitted(progress::mids_ledger(), &card.mid).await?;
  client.metrics().incr_users_emitted();
  Ok(())
}
