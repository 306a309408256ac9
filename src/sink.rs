//! Downstream sink: a keyed append interface standing in for the message
//! bus. Grounded on the teacher's trait-plus-concrete-adapter shape (seen
//! throughout the client module's pluggable transports) and on `spec.md`
//! §6's three topics.

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::Result;

/// The three downstream topics a record may be emitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
  Video,
  Comment,
  Account,
}

impl Topic {
  #[must_use]
  pub fn name(self) -> &'static str {
    match self {
      Topic::Video => "claw_video",
      Topic::Comment => "claw_comment",
      Topic::Account => "claw_account",
    }
  }
}

/// Append interface onto the downstream message bus.
///
/// Emission is expected to be idempotent-per-key on the receiving side; the
/// pipeline relies on this to allow at-least-once delivery under crash
/// recovery.
#[async_trait]
pub trait Sink: Send + Sync {
  /// Publish `body` to `topic` under `key`. Returns once the sink has
  /// durably accepted the record; only then may the caller record `key` in
  /// an emitted-id set.
  async fn emit(&self, topic: Topic, key: &str, body: &Value) -> Result<()>;
}

/// Appends each record as one JSON line, prefixed with its topic and key,
/// to a single file shared by every topic.
pub struct JsonlSink {
  file: Mutex<tokio::fs::File>,
}

impl JsonlSink {
  /// Open (creating if necessary, appending otherwise) the sink file at
  /// `path`.
  pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
    let file = tokio::fs::OpenOptions::new()
      .create(true)
      .append(true)
      .open(path)
      .await
      .map_err(|err| crate::error::HarvesterError::ProgressIo(err.to_string()))?;
    Ok(Self { file: Mutex::new(file) })
  }
}

#[async_trait]
impl Sink for JsonlSink {
  async fn emit(&self, topic: Topic, key: &str, body: &Value) -> Result<()> {
    let line = serde_json::json!({"topic": topic.name(), "key": key, "body": body});
    let mut serialized = serde_json::to_string(&line)?;
    serialized.push('\n');
    let mut file = self.file.lock().await;
    file.write_all(serialized.as_bytes()).await.map_err(|err| crate::error::HarvesterError::ProgressIo(err.to_string()))?;
    file.flush().await.map_err(|err| crate::error::HarvesterError::ProgressIo(err.to_string()))?;
    Ok(())
  }
}

/// A sink that discards everything, for tests that only care about
/// progress-store and queue behavior.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl Sink for NullSink {
  async fn emit(&self, _topic: Topic, _key: &str, _body: &Value) -> Result<()> {
    Ok(())
  }
}

/// Records every emitted `(topic, key)` in memory, for tests asserting on
/// what was actually published.
#[derive(Debug, Default)]
pub struct RecordingSink {
  emitted: Mutex<Vec<(Topic, String)>>,
}

impl RecordingSink {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn emitted(&self) -> Vec<(Topic, String)> {
    self.emitted.lock().await.clone()
  }
}

#[async_trait]
impl Sink for RecordingSink {
  async fn emit(&self, topic: Topic, key: &str, _body: &Value) -> Result<()> {
    self.emitted.lock().await.push((topic, key.to_string()));
    Ok(())
  }
}
