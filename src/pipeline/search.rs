//! Stage 1 (search) and stage 2 (detail enrichment).
//!
//! Grounded on `spec.md` §4.5.1 and §4.5.2. Search has no upstream queue —
//! the keyword is the seed — so unlike the later stages it runs as a
//! one-shot fan-out-then-partition rather than a queue-drain loop: `N`
//! workers each walk a disjoint page range, results are deduplicated by
//! `bvid` under a lock, and the new/already-emitted split is handed
//! straight to `N` detail workers without an intervening queue.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::entities::Video;
use crate::error::Result;
use crate::http::endpoints;
use crate::observability::stage_worker_span;
use crate::pipeline::context::ClientFactory;
use crate::pipeline::tasks::VideoTask;
use crate::pipeline::user_router::UserIdRouter;
use crate::progress::{self, ProgressStore};
use crate::sink::{Sink, Topic};

/// Outcome of the combined search+detail stage, used by the orchestrator
/// for a final status line.
#[derive(Debug, Default)]
pub struct SearchDetailOutcome {
  pub candidates_found: usize,
  pub videos_enriched: usize,
  pub already_emitted_forwarded: usize,
}

/// Run stage 1 and 2 for a single keyword to completion.
///
/// `workers` workers search `workers` page ranges of `pages_per_worker`
/// each (so up to `workers * pages_per_worker` total pages), then the same
/// worker count re-fans-out over the deduplicated new-video set for detail
/// enrichment. Returns once every detail worker has exited; the caller is
/// responsible for signaling `video-producers-done` from the returned
/// latch handle. `cancellation` is checked between pages and between
/// videos so a trip stops new upstream calls promptly without losing
/// progress already durably written for work in flight.
#[allow(clippy::too_many_arguments)]
pub async fn run(
  keyword: &str,
  workers: u32,
  pages_per_worker: u32,
  client_factory: &ClientFactory,
  progress: Arc<dyn ProgressStore>,
  sink: Arc<dyn Sink>,
  user_router: Arc<UserIdRouter>,
  comment_tx: mpsc::Sender<VideoTask>,
  cancellation: &CancellationToken,
) -> Result<SearchDetailOutcome> {
  let found: Arc<Mutex<HashMap<String, Value>>> = Arc::new(Mutex::new(HashMap::new()));

  let mut search_handles = Vec::new();
  for worker_id in 0..workers {
    let first_page = worker_id * pages_per_worker + 1;
    let last_page = first_page + pages_per_worker - 1;
    let client_factory = client_factory.clone();
    let found = found.clone();
    let keyword = keyword.to_string();
    let cancellation = cancellation.clone();
    search_handles.push(tokio::spawn(
      async move {
        let client = client_factory.build();
        for page in first_page..=last_page {
          if cancellation.is_cancelled() {
            break;
          }
          match endpoints::search(&client, &keyword, page).await {
            Ok(search_page) => {
              let mut found = found.lock().await;
              for entry in search_page.result {
                if let Some(bvid) = entry.get("bvid").and_then(Value::as_str) {
                  found.entry(bvid.to_string()).or_insert(entry);
                }
              }
              if page as i64 >= search_page.num_pages {
                break;
              }
            }
            Err(err) => {
              tracing::warn!(worker_id, page, keyword = %keyword, error = %err, "search page failed, skipping remainder of this worker's range");
              break;
            }
          }
        }
      }
      .instrument(stage_worker_span("search", worker_id)),
    ));
  }
  for handle in search_handles {
    let _ = handle.await;
  }

  let candidates = Arc::try_unwrap(found).map(Mutex::into_inner).unwrap_or_default();
  let candidates_found = candidates.len();

  let mut new_videos = Vec::new();
  let mut already_emitted_forwarded = 0usize;
  for (bvid, _entry) in candidates {
    if progress.is_emitted(progress::videos_ledger(), &bvid).await {
      already_emitted_forwarded += 1;
      let _ = comment_tx.send(VideoTask { bvid, aid: None }).await;
    } else {
      new_videos.push(bvid);
    }
  }

  let chunk_size = new_videos.len().div_ceil((workers as usize).max(1));
  let chunks: Vec<Vec<String>> = if chunk_size == 0 { Vec::new() } else { new_videos.chunks(chunk_size).map(<[String]>::to_vec).collect() };

  let videos_enriched = Arc::new(std::sync::atomic::AtomicUsize::new(0));
  let mut detail_handles = Vec::new();
  for (worker_id, chunk) in chunks.into_iter().enumerate() {
    let client_factory = client_factory.clone();
    let progress = progress.clone();
    let sink = sink.clone();
    let user_router = user_router.clone();
    let comment_tx = comment_tx.clone();
    let keyword = keyword.to_string();
    let videos_enriched = videos_enriched.clone();
    let cancellation = cancellation.clone();
    detail_handles.push(tokio::spawn(
      async move {
        let client = client_factory.build();
        for bvid in chunk {
          if cancellation.is_cancelled() {
            break;
          }
          match enrich_one(&client, &bvid, &keyword, progress.as_ref(), sink.as_ref(), &user_router, &comment_tx).await {
            Ok(()) => {
              videos_enriched.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            Err(err) => {
              tracing::warn!(bvid = %bvid, error = %err, "detail enrichment failed, skipping video");
            }
          }
        }
      }
      .instrument(stage_worker_span("detail", worker_id as u32)),
    ));
  }
  for handle in detail_handles {
    let _ = handle.await;
  }

  Ok(SearchDetailOutcome {
    candidates_found,
    videos_enriched: videos_enriched.load(std::sync::atomic::Ordering::Relaxed),
    already_emitted_forwarded,
  })
}

async fn enrich_one(
  client: &crate::http::HttpClient,
  bvid: &str,
  keyword: &str,
  progress: &dyn ProgressStore,
  sink: &dyn Sink,
  user_router: &UserIdRouter,
  comment_tx: &mpsc::Sender<VideoTask>,
) -> Result<()> {
  let data = endpoints::view(client, bvid).await?;
  let video = Video::from_view_data(&data, keyword)?;

  sink.emit(Topic::Video, &video.bvid, &video.body).await?;
  progress.mark_emitted(progress::videos_ledger(), &video.bvid).await?;
  client.metrics().incr_videos_enriched();
  user_router.observe(&video.owner_mid.to_string()).await?;
  let _ = comment_tx.send(VideoTask { bvid: video.bvid, aid: Some(video.aid) }).await;
  Ok(())
}
