//! Stage 4: second-level reply paging.
//!
//! Grounded on `spec.md` §4.5.4. Workers drain queue-B (`ReplyTask`) and
//! page forward with a 1-based page index until the server's own
//! `total_count` is satisfied, a page comes back empty, or a call errors.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::entities::Reply;
use crate::error::Result;
use crate::http::endpoints;
use crate::pipeline::context::ClientFactory;
use crate::pipeline::queue::{ProducersDone, StageQueue};
use crate::pipeline::tasks::ReplyTask;
use crate::pipeline::user_router::UserIdRouter;
use crate::progress::{self, ProgressStore};
use crate::sink::{Sink, Topic};

const PAGE_SIZE: u32 = 20;

/// Run one reply-paging worker until the queue drains and
/// `comment_producers_done` has fired.
#[allow(clippy::too_many_arguments)]
pub async fn run_worker(
  worker_id: u32,
  queue: Arc<StageQueue<ReplyTask>>,
  mut comment_producers_done: tokio::sync::watch::Receiver<bool>,
  poll_interval: Duration,
  client_factory: ClientFactory,
  progress: Arc<dyn ProgressStore>,
  sink: Arc<dyn Sink>,
  user_router: Arc<UserIdRouter>,
  reply_producers_done: Arc<ProducersDone>,
  cancellation: CancellationToken,
) {
  let client = client_factory.build();
  loop {
    tokio::select! {
      () = cancellation.cancelled() => break,
      received = queue.recv_timeout(poll_interval) => match received {
        Some(task) => {
          if let Err(err) = page_one_thread(&client, &task, progress.as_ref(), sink.as_ref(), &user_router, &cancellation).await {
            tracing::warn!(worker_id, parent_rpid = %task.parent_rpid, error = %err, "reply walk aborted for this thread");
          }
        }
        None => {
          if *comment_producers_done.borrow() {
            break;
          }
        }
      },
    }
  }
  reply_producers_done.worker_exited();
}

async fn page_one_thread(client: &crate::http::HttpClient, task: &ReplyTask, progress: &dyn ProgressStore, sink: &dyn Sink, user_router: &UserIdRouter, cancellation: &CancellationToken) -> Result<()> {
  let mut page_index = 1u32;
  let mut total_fetched = 0i64;

  loop {
    if cancellation.is_cancelled() {
      break;
    }

    let page = endpoints::reply_comments(client, task.aid, &task.parent_rpid, page_index, PAGE_SIZE).await?;
    if page.replies.is_empty() {
      break;
    }

    for entry in &page.replies {
      if let Ok(reply) = Reply::from_reply_entry(entry, task.aid) {
        user_router.observe(&reply.mid.to_string()).await?;
        let already_emitted = progress.is_emitted(progress::rpids_ledger(), &reply.rpid).await;
        if already_emitted {
          total_fetched += 1;
          continue;
        }
        sink.emit(Topic::Comment, &reply.rpid, &reply.body).await?;
        progress.mark_emitted(progress::rpids_ledger(), &reply.rpid).await?;
        client.metrics().incr_replies_emitted();
        total_fetched += 1;
      }
    }

    if total_fetched >= page.total_count() {
      break;
    }
    page_index += 1;
  }

  Ok(())
}
