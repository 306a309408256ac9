//! Stage 3: first-level comment paging.
//!
//! Grounded on `spec.md` §4.5.3. Workers drain queue-A (`VideoTask`),
//! resolve `aid` lazily when a forwarded already-emitted video didn't carry
//! one, and page through the signed comment endpoint until the server
//! reports end-of-stream, persisting the cursor after every page.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::entities::{Comment, VideoProgress};
use crate::error::Result;
use crate::http::endpoints;
use crate::pipeline::context::ClientFactory;
use crate::pipeline::queue::{ProducersDone, StageQueue};
use crate::pipeline::tasks::{ReplyTask, VideoTask};
use crate::pipeline::user_router::UserIdRouter;
use crate::progress::{self, ProgressStore};
use crate::sink::{Sink, Topic};

/// Jittered delay applied between pages of the same video's comment walk,
/// per `spec.md` §5's "inter-request politeness delay (uniform over a
/// configured range)".
const POLITENESS_DELAY_MIN: Duration = Duration::from_millis(200);
const POLITENESS_DELAY_MAX: Duration = Duration::from_millis(600);

/// Run one comment-paging worker until the queue drains and
/// `video_producers_done` has fired.
#[allow(clippy::too_many_arguments)]
pub async fn run_worker(
  worker_id: u32,
  queue: Arc<StageQueue<VideoTask>>,
  mut video_producers_done: tokio::sync::watch::Receiver<bool>,
  poll_interval: Duration,
  client_factory: ClientFactory,
  progress: Arc<dyn ProgressStore>,
  sink: Arc<dyn Sink>,
  user_router: Arc<UserIdRouter>,
  reply_tx: tokio::sync::mpsc::Sender<ReplyTask>,
  comment_producers_done: Arc<ProducersDone>,
  cancellation: CancellationToken,
) {
  let client = client_factory.build();
  loop {
    tokio::select! {
      () = cancellation.cancelled() => break,
      received = queue.recv_timeout(poll_interval) => match received {
        Some(task) => {
          if let Err(err) = page_one_video(&client, task, progress.as_ref(), sink.as_ref(), &user_router, &reply_tx, &cancellation).await {
            tracing::warn!(worker_id, error = %err, "comment walk aborted for this video, cursor left at last durable position");
          }
        }
        None => {
          if *video_producers_done.borrow() {
            break;
          }
        }
      },
    }
  }
  comment_producers_done.worker_exited();
}

async fn page_one_video(
  client: &crate::http::HttpClient,
  task: VideoTask,
  progress: &dyn ProgressStore,
  sink: &dyn Sink,
  user_router: &UserIdRouter,
  reply_tx: &tokio::sync::mpsc::Sender<ReplyTask>,
  cancellation: &CancellationToken,
) -> Result<()> {
  let existing = progress.video_progress(&task.bvid).await;
  if existing.as_ref().is_some_and(|p| p.done) {
    return Ok(());
  }

  let aid = match existing.as_ref().and_then(|p| p.aid).or(task.aid) {
    Some(aid) => aid,
    None => {
      let data = endpoints::view(client, &task.bvid).await?;
      data.get("aid").and_then(serde_json::Value::as_i64).ok_or_else(|| crate::error::HarvesterError::MissingField { field: "aid", entity: task.bvid.clone() })?
    }
  };

  let mut cursor = existing.map(|p| p.cursor).unwrap_or_default();

  loop {
    if cancellation.is_cancelled() {
      break;
    }

    let page = endpoints::main_comments(client, aid, &cursor).await?;

    for entry in &page.replies {
      if let Ok(comment) = Comment::from_reply_entry(entry, aid) {
        user_router.observe(&comment.mid.to_string()).await?;
        let already_emitted = progress.is_emitted(progress::rpids_ledger(), &comment.rpid).await;
        if !already_emitted {
          sink.emit(Topic::Comment, &comment.rpid, &comment.body).await?;
          progress.mark_emitted(progress::rpids_ledger(), &comment.rpid).await?;
          client.metrics().incr_comments_emitted();
        }
        if comment.rcount > 0 {
          let _ = reply_tx.send(ReplyTask { aid, parent_rpid: comment.rpid }).await;
        }
      }
    }

    if page.is_end() || page.replies.is_empty() {
      progress.save_video_progress(&task.bvid, VideoProgress { done: true, cursor: String::new(), aid: Some(aid) }).await?;
      break;
    }

    cursor = page.next_offset().to_string();
    progress.save_video_progress(&task.bvid, VideoProgress { done: false, cursor: cursor.clone(), aid: Some(aid) }).await?;

    let jitter = rand::rng().random_range(POLITENESS_DELAY_MIN.as_millis() as u64..=POLITENESS_DELAY_MAX.as_millis() as u64);
    tokio::select! {
      () = cancellation.cancelled() => break,
      () = tokio::time::sleep(Duration::from_millis(jitter)) => {}
    }
  }

  Ok(())
}
