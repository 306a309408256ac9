//! Harvest configuration.
//!
//! Grounded on `original_source/spider/main.py`'s `CONFIG` dict for the
//! knobs themselves, and on the teacher's configuration idiom: an explicit,
//! fully-parameterized constructor, a `new()` compatibility wrapper with
//! sensible defaults, chainable `with_x` setters, and a `validate`/`is_valid`
//! pair run once at startup.

use std::time::Duration;

use crate::error::{HarvesterError, Result};
use crate::rate_limiter::RateLimiterConfig;
use crate::retry::RetryConfig;

/// Top-level knobs for a harvest run.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
  /// Search keyword(s) seeding stage one.
  search_keywords: Vec<String>,
  /// Maximum search result pages to walk per keyword.
  max_search_pages: u32,
  /// Worker pool size per stage (search, detail, comments, replies, users).
  workers_per_stage: u32,
  /// Bounded capacity of each inter-stage queue.
  queue_capacity: usize,
  /// Global request rate limit.
  rate_limiter: RateLimiterConfig,
  /// Retry/backoff policy applied to every endpoint call.
  retry: RetryConfig,
  /// Directory holding the progress store and ledgers.
  progress_dir: std::path::PathBuf,
  /// Output path for the JSONL sink; `None` disables persistence (tests).
  sink_path: Option<std::path::PathBuf>,
  /// Whether to also fetch second-level replies for every first-level
  /// comment (stage four). Disabling keeps the harvest to one comment
  /// level.
  fetch_replies: bool,
  /// Whether to enrich discovered commenter/replier ids with full user
  /// cards (stage five).
  fetch_user_cards: bool,
  /// How often, in comments fetched, to flush the progress store to disk.
  persist_every: u32,
  /// Override for the upstream API root; `None` uses the production host.
  /// Exists for tests to point a run at a local mock server.
  api_base_url: Option<String>,
  /// Whether to resume from the progress store's existing ledgers and
  /// per-video cursors, or start as if none existed.
  resume: bool,
  /// Whether a resumed run also re-seeds the in-memory observed-user-ids
  /// set from the durable pending-users ledger. Ignored if `resume` is
  /// `false`.
  resume_pending_mids: bool,
}

impl HarvestConfig {
  /// Fully-parameterized constructor.
  #[must_use]
  #[allow(clippy::too_many_arguments)]
  pub fn with_explicit_config(
    search_keywords: Vec<String>,
    max_search_pages: u32,
    workers_per_stage: u32,
    queue_capacity: usize,
    rate_limiter: RateLimiterConfig,
    retry: RetryConfig,
    progress_dir: std::path::PathBuf,
    sink_path: Option<std::path::PathBuf>,
    fetch_replies: bool,
    fetch_user_cards: bool,
    persist_every: u32,
  ) -> Self {
    Self {
      search_keywords,
      max_search_pages,
      workers_per_stage,
      queue_capacity,
      rate_limiter,
      retry,
      progress_dir,
      sink_path,
      fetch_replies,
      fetch_user_cards,
      persist_every,
      api_base_url: None,
      resume: true,
      resume_pending_mids: true,
    }
  }

  /// Defaults matching the original's `CONFIG` dict: 5 search pages, 4
  /// workers per stage, a queue depth of 256, a 5 req/s rate limit with
  /// burst 10, the default retry policy, replies and user cards both
  /// enabled, persisting every 20 comments.
  #[must_use]
  pub fn new(search_keywords: Vec<String>, progress_dir: std::path::PathBuf) -> Self {
    Self::with_explicit_config(
      search_keywords,
      5,
      4,
      256,
      RateLimiterConfig::new(5.0, 10.0),
      RetryConfig::new(),
      progress_dir,
      None,
      true,
      true,
      20,
    )
  }

  /// Chainable setter for the search page cap.
  #[must_use]
  pub fn with_max_search_pages(mut self, n: u32) -> Self {
    self.max_search_pages = n;
    self
  }

  /// Chainable setter for per-stage worker count.
  #[must_use]
  pub fn with_workers_per_stage(mut self, n: u32) -> Self {
    self.workers_per_stage = n;
    self
  }

  /// Chainable setter for inter-stage queue capacity.
  #[must_use]
  pub fn with_queue_capacity(mut self, n: usize) -> Self {
    self.queue_capacity = n;
    self
  }

  /// Chainable setter for the rate limiter configuration.
  #[must_use]
  pub fn with_rate_limiter(mut self, rate_limiter: RateLimiterConfig) -> Self {
    self.rate_limiter = rate_limiter;
    self
  }

  /// Chainable setter for the retry policy.
  #[must_use]
  pub fn with_retry(mut self, retry: RetryConfig) -> Self {
    self.retry = retry;
    self
  }

  /// Chainable setter for the JSONL sink output path.
  #[must_use]
  pub fn with_sink_path(mut self, path: std::path::PathBuf) -> Self {
    self.sink_path = Some(path);
    self
  }

  /// Chainable setter disabling reply harvesting (stage four).
  #[must_use]
  pub fn with_fetch_replies(mut self, fetch_replies: bool) -> Self {
    self.fetch_replies = fetch_replies;
    self
  }

  /// Chainable setter disabling user card enrichment (stage five).
  #[must_use]
  pub fn with_fetch_user_cards(mut self, fetch_user_cards: bool) -> Self {
    self.fetch_user_cards = fetch_user_cards;
    self
  }

  /// Chainable setter for the persist-every-N-comments cadence.
  #[must_use]
  pub fn with_persist_every(mut self, n: u32) -> Self {
    self.persist_every = n;
    self
  }

  /// Chainable setter pointing the run at a non-production API root, e.g.
  /// a local `wiremock` server under test.
  #[must_use]
  pub fn with_api_base_url(mut self, base_url: impl Into<String>) -> Self {
    self.api_base_url = Some(base_url.into());
    self
  }

  /// Chainable setter controlling whether the progress store's existing
  /// ledgers and cursors are loaded at startup. `false` starts as if no
  /// prior run's state exists, matching `original_source`'s `resume=False`.
  #[must_use]
  pub fn with_resume(mut self, resume: bool) -> Self {
    self.resume = resume;
    self
  }

  /// Chainable setter controlling whether a resumed run also re-seeds the
  /// in-memory observed-user-ids set from the pending-users ledger.
  #[must_use]
  pub fn with_resume_pending_mids(mut self, resume_pending_mids: bool) -> Self {
    self.resume_pending_mids = resume_pending_mids;
    self
  }

  /// Validate the configuration, returning the first violation found.
  pub fn validate(&self) -> Result<()> {
    if self.search_keywords.is_empty() {
      return Err(HarvesterError::InvalidConfig("at least one search keyword is required".into()));
    }
    if self.max_search_pages == 0 {
      return Err(HarvesterError::InvalidConfig("max_search_pages must be >= 1".into()));
    }
    if self.workers_per_stage == 0 {
      return Err(HarvesterError::InvalidConfig("workers_per_stage must be >= 1".into()));
    }
    if self.queue_capacity == 0 {
      return Err(HarvesterError::InvalidConfig("queue_capacity must be >= 1".into()));
    }
    if self.persist_every == 0 {
      return Err(HarvesterError::InvalidConfig("persist_every must be >= 1".into()));
    }
    Ok(())
  }

  /// Whether the configuration passes [`Self::validate`].
  #[must_use]
  pub fn is_valid(&self) -> bool {
    self.validate().is_ok()
  }

  #[must_use]
  pub fn search_keywords(&self) -> &[String] {
    &self.search_keywords
  }

  #[must_use]
  pub fn max_search_pages(&self) -> u32 {
    self.max_search_pages
  }

  #[must_use]
  pub fn workers_per_stage(&self) -> u32 {
    self.workers_per_stage
  }

  #[must_use]
  pub fn queue_capacity(&self) -> usize {
    self.queue_capacity
  }

  #[must_use]
  pub fn rate_limiter(&self) -> RateLimiterConfig {
    self.rate_limiter
  }

  #[must_use]
  pub fn retry(&self) -> RetryConfig {
    self.retry
  }

  #[must_use]
  pub fn progress_dir(&self) -> &std::path::Path {
    &self.progress_dir
  }

  #[must_use]
  pub fn sink_path(&self) -> Option<&std::path::Path> {
    self.sink_path.as_deref()
  }

  #[must_use]
  pub fn fetch_replies(&self) -> bool {
    self.fetch_replies
  }

  #[must_use]
  pub fn fetch_user_cards(&self) -> bool {
    self.fetch_user_cards
  }

  #[must_use]
  pub fn persist_every(&self) -> u32 {
    self.persist_every
  }

  #[must_use]
  pub fn api_base_url(&self) -> Option<&str> {
    self.api_base_url.as_deref()
  }

  #[must_use]
  pub fn resume(&self) -> bool {
    self.resume
  }

  #[must_use]
  pub fn resume_pending_mids(&self) -> bool {
    self.resume_pending_mids
  }

  /// Idle-poll interval used by every stage's dequeue loop between retries
  /// against an empty queue, before checking the producers-done signal.
  #[must_use]
  pub fn stage_poll_interval(&self) -> Duration {
    Duration::from_millis(50)
  }
}
