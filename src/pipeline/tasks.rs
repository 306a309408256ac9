//! Work-item types carried on the three inter-stage queues named in
//! `spec.md` §2 ("video-details, parent-comment, user-id").

/// Queue-A: a video ready for first-level comment paging. `aid` is known
/// whenever the video just came through detail enrichment; it is `None`
/// for videos that were already emitted in a prior run and are only being
/// forwarded so their comment walk can resume (the comment stage resolves
/// `aid` lazily via the view endpoint in that case).
#[derive(Debug, Clone)]
pub struct VideoTask {
  pub bvid: String,
  pub aid: Option<i64>,
}

/// Queue-B: a first-level comment with outstanding replies to page
/// through.
#[derive(Debug, Clone)]
pub struct ReplyTask {
  pub aid: i64,
  pub parent_rpid: String,
}
