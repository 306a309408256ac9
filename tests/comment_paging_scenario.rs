//! End-to-end first-level comment paging against a mock upstream.
//!
//! Covers the spec's first concrete harvest scenario: a two-page comment
//! walk that terminates on the server's `is_end` flag, with exactly one
//! durable progress write per page and no duplicate emission.

mod common;

use std::sync::Arc;
use std::time::Duration;

use biliclaw_core::entities::VideoProgress;
use biliclaw_core::metrics::Metrics;
use biliclaw_core::pipeline::context::ClientFactory;
use biliclaw_core::pipeline::queue::{ProducersDone, StageQueue};
use biliclaw_core::pipeline::tasks::VideoTask;
use biliclaw_core::pipeline::user_router::UserIdRouter;
use biliclaw_core::pipeline::comments;
use biliclaw_core::progress::{FileProgressStore, ProgressStore};
use biliclaw_core::rate_limiter::{RateLimiter, RateLimiterConfig};
use biliclaw_core::retry::RetryConfig;
use biliclaw_core::signer::WbiSigner;
use biliclaw_core::sink::{RecordingSink, Sink, Topic};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn two_pages_terminate_on_end_flag_with_no_duplicate_emission() {
  let server = MockServer::start().await;
  common::mount_nav(&server).await;

  Mock::given(method("GET"))
    .and(path("/x/v2/reply/wbi/main"))
    .and(query_param("pagination_str", r#"{"offset":""}"#))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "code": 0,
      "message": "0",
      "data": {
        "replies": [{"rpid": 111, "member": {"mid": "10"}, "rcount": 0}],
        "cursor": {"is_end": false, "pagination_reply": {"next_offset": "AA"}}
      }
    })))
    .mount(&server)
    .await;

  Mock::given(method("GET"))
    .and(path("/x/v2/reply/wbi/main"))
    .and(query_param("pagination_str", r#"{"offset":"AA"}"#))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "code": 0,
      "message": "0",
      "data": {
        "replies": [{"rpid": 222, "member": {"mid": "11"}, "rcount": 0}],
        "cursor": {"is_end": true, "pagination_reply": {"next_offset": "BB"}}
      }
    })))
    .mount(&server)
    .await;

  let dir = tempfile::tempdir().unwrap();
  let progress: Arc<dyn ProgressStore> = Arc::new(FileProgressStore::open(dir.path()).await.unwrap());
  let recording = Arc::new(RecordingSink::new());
  let sink: Arc<dyn Sink> = recording.clone();

  let user_queue = Arc::new(StageQueue::<String>::bounded(8));
  let user_router = Arc::new(UserIdRouter::new(progress.clone(), user_queue.sender()));

  let rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig::new(100.0, 100.0)));
  let signer = Arc::new(WbiSigner::new());
  let client_factory = ClientFactory::new(common::empty_credential_pool(), rate_limiter, signer, RetryConfig::new(), "test-agent", Arc::new(Metrics::new())).with_base_url(server.uri());

  let video_queue = Arc::new(StageQueue::<VideoTask>::bounded(4));
  video_queue.sender().send(VideoTask { bvid: "BV1xx".into(), aid: Some(100) }).await.unwrap();
  let (video_producers_done, video_producers_done_rx) = ProducersDone::new(1);
  video_producers_done.worker_exited();

  let (comment_producers_done, _comment_producers_done_rx) = ProducersDone::new(1);
  let (reply_tx, _reply_rx) = tokio::sync::mpsc::channel(8);

  comments::run_worker(
    0,
    video_queue,
    video_producers_done_rx,
    Duration::from_millis(20),
    client_factory,
    progress.clone(),
    sink,
    user_router,
    reply_tx,
    comment_producers_done,
    CancellationToken::new(),
  )
  .await;

  let emitted = recording.emitted().await;
  assert_eq!(emitted, vec![(Topic::Comment, "111".to_string()), (Topic::Comment, "222".to_string())]);

  let final_progress = progress.video_progress("BV1xx").await.unwrap();
  assert_eq!(final_progress, VideoProgress { done: true, cursor: String::new(), aid: Some(100) });
}
