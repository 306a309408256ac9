//! Durable progress store.
//!
//! Grounded on `original_source/spider/storage.py`: a JSON map of per-video
//! cursors rewritten atomically under a single lock, plus append-only
//! newline-delimited id ledgers for each emitted-id set and for pending
//! user ids. `spec.md` §4.6 is authoritative for the on-disk layout where
//! it differs from the original (the original keeps one file per video; the
//! ledger-of-lines layout here is simpler to reason about and resume from).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::entities::VideoProgress;
use crate::error::{HarvesterError, Result};

/// Seam the pipeline stages depend on; a store may be backed by files (the
/// default) or swapped for an alternative (e.g. a local key-value store)
/// without changing stage code.
#[async_trait]
pub trait ProgressStore: Send + Sync {
  /// Current progress for a video, if any has ever been recorded.
  async fn video_progress(&self, bvid: &str) -> Option<VideoProgress>;

  /// Persist progress for a video. Once an entry has `done=true`, later
  /// calls for the same `bvid` are rejected with `InvalidConfig`-free no-op
  /// semantics at the call site (callers are expected to check `done`
  /// before calling again); the store itself does not re-check here.
  async fn save_video_progress(&self, bvid: &str, progress: VideoProgress) -> Result<()>;

  /// Whether `id` is already recorded as emitted under `set_name`.
  async fn is_emitted(&self, set_name: &str, id: &str) -> bool;

  /// Record `id` as emitted under `set_name`. Must be called only after the
  /// sink has accepted the corresponding record.
  async fn mark_emitted(&self, set_name: &str, id: &str) -> Result<()>;

  /// Snapshot of every id recorded as emitted under `set_name`, used at
  /// shutdown to compute the pending-users compaction set.
  async fn emitted_ids(&self, set_name: &str) -> HashSet<String>;

  /// Append `mid` to the pending-users ledger and record it as observed,
  /// idempotently (observing the same id twice is a no-op).
  async fn observe_pending_user(&self, mid: &str) -> Result<()>;

  /// Every id ever observed as pending, whether or not since emitted.
  async fn observed_user_ids(&self) -> HashSet<String>;

  /// Rewrite the pending-users ledger to contain exactly `remaining`,
  /// deleting the file if `remaining` is empty. Called once at shutdown.
  async fn compact_pending_users(&self, remaining: &HashSet<String>) -> Result<()>;
}

const EMITTED_VIDEOS: &str = "emitted_videos";
const EMITTED_RPIDS: &str = "emitted_rpids";
const EMITTED_MIDS: &str = "emitted_mids";

/// Ledger set name for emitted videos (`bvid`).
#[must_use]
pub fn videos_ledger() -> &'static str {
  EMITTED_VIDEOS
}
/// Ledger set name for emitted comments/replies (`rpid`).
#[must_use]
pub fn rpids_ledger() -> &'static str {
  EMITTED_RPIDS
}
/// Ledger set name for emitted user cards (`mid`).
#[must_use]
pub fn mids_ledger() -> &'static str {
  EMITTED_MIDS
}

struct Ledgers {
  sets: HashMap<&'static str, HashSet<String>>,
  pending_users: HashSet<String>,
}

/// File-backed [`ProgressStore`].
///
/// In-memory sets mirror the on-disk ledgers for fast membership checks;
/// every mutation appends to disk before returning, so a crash loses at
/// most the in-flight write. The per-video progress map is the one
/// structure rewritten wholesale rather than appended, per `spec.md` §4.6.
pub struct FileProgressStore {
  dir: PathBuf,
  video_progress: Mutex<HashMap<String, VideoProgress>>,
  ledgers: Mutex<Ledgers>,
}

impl FileProgressStore {
  /// Load (or initialize) a store rooted at `dir`, creating the directory
  /// and reading any existing ledgers and progress map into memory.
  pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
    Self::open_with_resume(dir, true).await
  }

  /// Like [`Self::open`], but with `resume=false` the on-disk ledgers and
  /// progress map are left untouched but not loaded — every id starts
  /// "never seen" for this run's dedup checks, matching
  /// `original_source/spider/crawler.py`'s `Crawler(resume=False)`, which
  /// seeds `saved_bvids`/`saved_rpids`/`saved_mids`/`video_progress` as
  /// empty rather than reading the prior run's files.
  pub async fn open_with_resume(dir: impl AsRef<Path>, resume: bool) -> Result<Self> {
    let dir = dir.as_ref().to_path_buf();
    tokio::fs::create_dir_all(&dir).await.map_err(|err| HarvesterError::ProgressIo(err.to_string()))?;

    if !resume {
      let mut sets = HashMap::new();
      sets.insert(EMITTED_VIDEOS, HashSet::new());
      sets.insert(EMITTED_RPIDS, HashSet::new());
      sets.insert(EMITTED_MIDS, HashSet::new());
      return Ok(Self { dir, video_progress: Mutex::new(HashMap::new()), ledgers: Mutex::new(Ledgers { sets, pending_users: HashSet::new() }) });
    }

    let video_progress = load_progress_map(&dir.join("video_comment_progress.json")).await?;
    let mut sets = HashMap::new();
    sets.insert(EMITTED_VIDEOS, load_ledger(&dir.join("sent_videos.txt")).await?);
    sets.insert(EMITTED_RPIDS, load_ledger(&dir.join("sent_comments.txt")).await?);
    sets.insert(EMITTED_MIDS, load_ledger(&dir.join("sent_accounts.txt")).await?);
    let pending_users = load_ledger(&dir.join("pending_mids.txt")).await?;

    Ok(Self { dir, video_progress: Mutex::new(video_progress), ledgers: Mutex::new(Ledgers { sets, pending_users }) })
  }

  fn progress_path(&self) -> PathBuf {
    self.dir.join("video_comment_progress.json")
  }

  fn ledger_path(&self, set_name: &str) -> PathBuf {
    let filename = match set_name {
      EMITTED_VIDEOS => "sent_videos.txt",
      EMITTED_RPIDS => "sent_comments.txt",
      EMITTED_MIDS => "sent_accounts.txt",
      other => unreachable!("unknown ledger set {other}"),
    };
    self.dir.join(filename)
  }

  fn pending_path(&self) -> PathBuf {
    self.dir.join("pending_mids.txt")
  }
}

async fn load_progress_map(path: &Path) -> Result<HashMap<String, VideoProgress>> {
  match tokio::fs::read_to_string(path).await {
    Ok(content) => serde_json::from_str(&content).map_err(HarvesterError::from),
    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
    Err(err) => Err(HarvesterError::ProgressIo(err.to_string())),
  }
}

async fn load_ledger(path: &Path) -> Result<HashSet<String>> {
  match tokio::fs::read_to_string(path).await {
    Ok(content) => Ok(content.lines().map(str::to_string).filter(|l| !l.is_empty()).collect()),
    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashSet::new()),
    Err(err) => Err(HarvesterError::ProgressIo(err.to_string())),
  }
}

async fn append_line(path: &Path, line: &str) -> Result<()> {
  let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await.map_err(|err| HarvesterError::ProgressIo(err.to_string()))?;
  file.write_all(format!("{line}\n").as_bytes()).await.map_err(|err| HarvesterError::ProgressIo(err.to_string()))?;
  file.flush().await.map_err(|err| HarvesterError::ProgressIo(err.to_string()))?;
  Ok(())
}

async fn write_atomic(path: &Path, content: &str) -> Result<()> {
  let tmp_path = path.with_extension("tmp");
  tokio::fs::write(&tmp_path, content).await.map_err(|err| HarvesterError::ProgressIo(err.to_string()))?;
  tokio::fs::rename(&tmp_path, path).await.map_err(|err| HarvesterError::ProgressIo(err.to_string()))?;
  Ok(())
}

#[async_trait]
impl ProgressStore for FileProgressStore {
  async fn video_progress(&self, bvid: &str) -> Option<VideoProgress> {
    self.video_progress.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(bvid).cloned()
  }

  async fn save_video_progress(&self, bvid: &str, progress: VideoProgress) -> Result<()> {
    let snapshot = {
      let mut map = self.video_progress.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
      map.insert(bvid.to_string(), progress);
      map.clone()
    };
    let serialized = serde_json::to_string_pretty(&snapshot)?;
    write_atomic(&self.progress_path(), &serialized).await
  }

  async fn is_emitted(&self, set_name: &str, id: &str) -> bool {
    self.ledgers.lock().unwrap_or_else(std::sync::PoisonError::into_inner).sets.get(set_name).is_some_and(|set| set.contains(id))
  }

  async fn mark_emitted(&self, set_name: &str, id: &str) -> Result<()> {
    let already_present = {
      let mut ledgers = self.ledgers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
      let set = ledgers.sets.entry(set_name).or_default();
      !set.insert(id.to_string())
    };
    if already_present {
      return Ok(());
    }
    append_line(&self.ledger_path(set_name), id).await
  }

  async fn emitted_ids(&self, set_name: &str) -> HashSet<String> {
    self.ledgers.lock().unwrap_or_else(std::sync::PoisonError::into_inner).sets.get(set_name).cloned().unwrap_or_default()
  }

  async fn observe_pending_user(&self, mid: &str) -> Result<()> {
    let already_observed = {
      let mut ledgers = self.ledgers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
      !ledgers.pending_users.insert(mid.to_string())
    };
    if already_observed {
      return Ok(());
    }
    append_line(&self.pending_path(), mid).await
  }

  async fn observed_user_ids(&self) -> HashSet<String> {
    self.ledgers.lock().unwrap_or_else(std::sync::PoisonError::into_inner).pending_users.clone()
  }

  async fn compact_pending_users(&self, remaining: &HashSet<String>) -> Result<()> {
    let path = self.pending_path();
    if remaining.is_empty() {
      match tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(HarvesterError::ProgressIo(err.to_string())),
      }
      return Ok(());
    }
    let mut lines: Vec<&str> = remaining.iter().map(String::as_str).collect();
    lines.sort_unstable();
    write_atomic(&path, &format!("{}\n", lines.join("\n"))).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn fresh_store_has_no_progress() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileProgressStore::open(dir.path()).await.unwrap();
    assert!(store.video_progress("BV1xx").await.is_none());
  }

  #[tokio::test]
  async fn progress_round_trips_through_reload() {
    let dir = tempfile::tempdir().unwrap();
    {
      let store = FileProgressStore::open(dir.path()).await.unwrap();
      store.save_video_progress("BV1xx", VideoProgress { done: false, cursor: "AA".into(), aid: Some(100) }).await.unwrap();
    }
    let reloaded = FileProgressStore::open(dir.path()).await.unwrap();
    let progress = reloaded.video_progress("BV1xx").await.unwrap();
    assert_eq!(progress.cursor, "AA");
    assert!(!progress.done);
  }

  #[tokio::test]
  async fn mark_emitted_is_idempotent_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileProgressStore::open(dir.path()).await.unwrap();
    store.mark_emitted(videos_ledger(), "BV1xx").await.unwrap();
    store.mark_emitted(videos_ledger(), "BV1xx").await.unwrap();
    assert!(store.is_emitted(videos_ledger(), "BV1xx").await);

    let content = tokio::fs::read_to_string(dir.path().join("sent_videos.txt")).await.unwrap();
    assert_eq!(content.lines().count(), 1);
  }

  #[tokio::test]
  async fn emitted_ledger_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    {
      let store = FileProgressStore::open(dir.path()).await.unwrap();
      store.mark_emitted(rpids_ledger(), "1").await.unwrap();
      store.mark_emitted(rpids_ledger(), "2").await.unwrap();
    }
    let reloaded = FileProgressStore::open(dir.path()).await.unwrap();
    assert!(reloaded.is_emitted(rpids_ledger(), "1").await);
    assert!(reloaded.is_emitted(rpids_ledger(), "2").await);
    assert!(!reloaded.is_emitted(rpids_ledger(), "3").await);
  }

  #[tokio::test]
  async fn pending_users_compaction_keeps_only_remaining() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileProgressStore::open(dir.path()).await.unwrap();
    for mid in ["1", "2", "3", "4", "5", "6", "7", "8", "9", "10"] {
      store.observe_pending_user(mid).await.unwrap();
    }
    let emitted: HashSet<String> = ["1", "2", "3", "4", "5", "6", "7"].iter().map(|s| s.to_string()).collect();
    let observed = store.observed_user_ids().await;
    let remaining: HashSet<String> = observed.difference(&emitted).cloned().collect();
    assert_eq!(remaining.len(), 3);

    store.compact_pending_users(&remaining).await.unwrap();
    let content = tokio::fs::read_to_string(dir.path().join("pending_mids.txt")).await.unwrap();
    let lines: HashSet<String> = content.lines().map(str::to_string).collect();
    assert_eq!(lines, remaining);
  }

  #[tokio::test]
  async fn pending_users_compaction_deletes_file_when_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileProgressStore::open(dir.path()).await.unwrap();
    store.observe_pending_user("1").await.unwrap();
    store.compact_pending_users(&HashSet::new()).await.unwrap();
    assert!(!dir.path().join("pending_mids.txt").exists());
  }
}
