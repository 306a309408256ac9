//! Record types flowing through the pipeline.
//!
//! Every entity keeps its upstream JSON body mostly opaque (downstream
//! consumes the body as received) while exposing the handful of fields the
//! pipeline itself needs to route, dedupe, and resume. Grounded on
//! `spec.md` §3's entity table; the `Record<K>` wrapper replaces the
//! original's habit of passing around bare dicts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A record paired with the primary key used for sink routing and dedupe.
#[derive(Debug, Clone, Serialize)]
pub struct Record<K> {
  /// Primary key (bvid, rpid, or mid depending on entity).
  pub key: K,
  /// The record body exactly as received from upstream.
  pub body: Value,
}

impl<K> Record<K> {
  #[must_use]
  pub fn new(key: K, body: Value) -> Self {
    Self { key, body }
  }
}

/// A harvested video, keyed by `bvid`.
#[derive(Debug, Clone)]
pub struct Video {
  pub bvid: String,
  pub aid: i64,
  pub owner_mid: i64,
  pub keyword: String,
  pub body: Value,
}

/// A first-level comment, keyed by `rpid`.
#[derive(Debug, Clone)]
pub struct Comment {
  pub rpid: String,
  pub aid: i64,
  pub mid: i64,
  pub rcount: i64,
  pub body: Value,
}

/// A second-level reply, keyed by `rpid`.
#[derive(Debug, Clone)]
pub struct Reply {
  pub rpid: String,
  pub parent_aid: i64,
  pub mid: i64,
  pub body: Value,
}

/// A harvested user profile card, keyed by `mid`.
#[derive(Debug, Clone)]
pub struct UserCard {
  pub mid: String,
  pub body: Value,
}

/// Per-video comment paging progress, as stored in the progress map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoProgress {
  pub done: bool,
  pub cursor: String,
  pub aid: Option<i64>,
}

impl VideoProgress {
  /// A fresh entry for a video not yet paged: empty cursor, `aid` known
  /// from the moment the record entered the comment queue.
  #[must_use]
  pub fn start(aid: i64) -> Self {
    Self { done: false, cursor: String::new(), aid: Some(aid) }
  }
}

fn required_str(value: &Value, field: &'static str, entity: &str) -> crate::error::Result<String> {
  value
    .get(field)
    .and_then(Value::as_str)
    .map(str::to_string)
    .ok_or_else(|| crate::error::HarvesterError::MissingField { field, entity: entity.to_string() })
}

fn required_i64(value: &Value, field: &'static str, entity: &str) -> crate::error::Result<i64> {
  value.get(field).and_then(Value::as_i64).ok_or_else(|| crate::error::HarvesterError::MissingField { field, entity: entity.to_string() })
}

impl Video {
  /// Parse a video record from a `view` endpoint `data` payload, annotating
  /// the stored body with the keyword that produced it during search
  /// discovery (`topic_keyword`, matching the original's field name).
  pub fn from_view_data(data: &Value, keyword: &str) -> crate::error::Result<Self> {
    let bvid = required_str(data, "bvid", "video")?;
    let aid = required_i64(data, "aid", &bvid)?;
    let owner_mid = data.get("owner").and_then(|o| o.get("mid")).and_then(Value::as_i64).ok_or_else(|| crate::error::HarvesterError::MissingField {
      field: "owner.mid",
      entity: bvid.clone(),
    })?;
    let mut body = data.clone();
    if let Some(object) = body.as_object_mut() {
      object.insert("topic_keyword".to_string(), Value::String(keyword.to_string()));
    }
    Ok(Self { bvid, aid, owner_mid, keyword: keyword.to_string(), body })
  }
}

impl Comment {
  /// Parse one entry of `data.replies[]` from the first-level comments
  /// endpoint.
  pub fn from_reply_entry(entry: &Value, aid: i64) -> crate::error::Result<Self> {
    let rpid = reply_id_as_string(entry, "first-level comment")?;
    let mid = entry.get("member").and_then(|m| m.get("mid")).and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| {
      crate::error::HarvesterError::MissingField { field: "member.mid", entity: rpid.clone() }
    })?;
    let rcount = entry.get("rcount").and_then(Value::as_i64).unwrap_or(0);
    Ok(Self { rpid, aid, mid, rcount, body: entry.clone() })
  }
}

impl Reply {
  /// Parse one entry of `data.replies[]` from the second-level replies
  /// endpoint.
  pub fn from_reply_entry(entry: &Value, parent_aid: i64) -> crate::error::Result<Self> {
    let rpid = reply_id_as_string(entry, "reply")?;
    let mid = entry.get("member").and_then(|m| m.get("mid")).and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| {
      crate::error::HarvesterError::MissingField { field: "member.mid", entity: rpid.clone() }
    })?;
    Ok(Self { rpid, parent_aid, mid, body: entry.clone() })
  }
}

/// `rpid` is returned as a JSON number by the upstream API; normalize it to
/// a string for use as a dedupe/routing key (numbers this large can lose
/// precision if ever round-tripped through a float).
fn reply_id_as_string(entry: &Value, entity: &str) -> crate::error::Result<String> {
  match entry.get("rpid") {
    Some(Value::Number(n)) => Ok(n.to_string()),
    Some(Value::String(s)) => Ok(s.clone()),
    _ => Err(crate::error::HarvesterError::MissingField { field: "rpid", entity: entity.to_string() }),
  }
}

impl UserCard {
  /// Parse the `data.card` payload from the user-card endpoint.
  pub fn from_card_data(data: &Value, mid: &str) -> crate::error::Result<Self> {
    let card = data.get("card").ok_or_else(|| crate::error::HarvesterError::MissingField { field: "card", entity: mid.to_string() })?;
    Ok(Self { mid: mid.to_string(), body: card.clone() })
  }
}
