//! Typed request functions, one per endpoint in `spec.md` §6's table.
//!
//! Each function owns the envelope shape specific to its endpoint rather
//! than sniffing return arity on failure (the `spec.md` §9 redesign note
//! replacing the source's dynamic tuple reconstruction): callers get a
//! `Result<T, HarvesterError>` and match on it directly.

use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;
use crate::http::client::HttpClient;
use crate::signer::sign;

/// `data.result[]` plus total page count from the search endpoint.
#[derive(Debug, Deserialize)]
pub struct SearchPage {
  #[serde(default)]
  pub result: Vec<Value>,
  #[serde(rename = "numPages", default)]
  pub num_pages: i64,
}

#[derive(Debug, Deserialize)]
struct PaginationReply {
  #[serde(default)]
  next_offset: String,
}

#[derive(Debug, Deserialize)]
struct CommentCursor {
  pagination_reply: PaginationReply,
  #[serde(default)]
  is_end: bool,
}

/// A page of first-level comments plus the opaque cursor for the next one.
#[derive(Debug, Deserialize)]
pub struct MainCommentsPage {
  #[serde(default)]
  pub replies: Vec<Value>,
  cursor: CommentCursor,
}

impl MainCommentsPage {
  /// `next_offset` from `data.cursor.pagination_reply`; `""` denotes the
  /// walk has not started, and an empty value on a populated response also
  /// signals end-of-stream (see [`Self::is_end`]).
  #[must_use]
  pub fn next_offset(&self) -> &str {
    &self.cursor.pagination_reply.next_offset
  }

  /// True when the server's own flag says so, or when `next_offset` is
  /// empty — either condition alone is sufficient, per `spec.md` §4.5.3.
  #[must_use]
  pub fn is_end(&self) -> bool {
    self.cursor.is_end || self.cursor.pagination_reply.next_offset.is_empty()
  }
}

#[derive(Debug, Deserialize)]
struct PageInfo {
  #[serde(default)]
  count: i64,
}

/// A page of second-level replies plus the parent thread's total count.
#[derive(Debug, Deserialize)]
pub struct ReplyPage {
  #[serde(default)]
  pub replies: Vec<Value>,
  page: PageInfo,
}

impl ReplyPage {
  #[must_use]
  pub fn total_count(&self) -> i64 {
    self.page.count
  }
}

/// Bootstrap call used both to seed the WBI signer and (when a credential
/// is bound) as the credential-validation probe.
pub async fn nav(client: &HttpClient) -> Result<Value> {
  client.get_json("/x/web-interface/nav", &[]).await
}

/// Extracts `(img_url, sub_url)` from a `nav` response for the signer.
pub fn wbi_urls_from_nav(data: &Value) -> Option<(String, String)> {
  let wbi_img = data.get("wbi_img")?;
  let img_url = wbi_img.get("img_url")?.as_str()?.to_string();
  let sub_url = wbi_img.get("sub_url")?.as_str()?.to_string();
  Some((img_url, sub_url))
}

/// Whether a `nav` response indicates a logged-in session (`code == 0` is
/// handled by the caller already having `Ok`; this checks the `isLogin`
/// flag the endpoint also reports).
#[must_use]
pub fn is_logged_in(data: &Value) -> bool {
  data.get("isLogin").and_then(Value::as_bool).unwrap_or(false)
}

/// Search endpoint: `page` is 1-based.
pub async fn search(client: &HttpClient, keyword: &str, page: u32) -> Result<SearchPage> {
  client
    .get_json(
      "/x/web-interface/search/type",
      &[("keyword", keyword.to_string()), ("page", page.to_string()), ("page_size", "50".to_string()), ("search_type", "video".to_string())],
    )
    .await
}

/// Video detail endpoint.
pub async fn view(client: &HttpClient, bvid: &str) -> Result<Value> {
  client.get_json("/x/web-interface/view", &[("bvid", bvid.to_string())]).await
}

/// First-level comments: signed. `cursor` is the opaque offset string
/// returned by the previous page, or `""` to start. `pagination_str` is
/// built here (not accepted pre-encoded) so the signer and transmitter are
/// guaranteed to agree on the encoded bytes.
pub async fn main_comments(client: &HttpClient, aid: i64, cursor: &str) -> Result<MainCommentsPage> {
  let pagination_json = format!(r#"{{"offset":"{cursor}"}}"#);
  let pagination_str = urlencoding::encode(&pagination_json).into_owned();

  let mut params: Vec<(&str, String)> = vec![
    ("oid", aid.to_string()),
    ("type", "1".to_string()),
    ("mode", "2".to_string()),
    ("plat", "1".to_string()),
    ("web_location", "1315875".to_string()),
    ("pagination_str", pagination_str),
  ];
  // seek_rpid is present (and signed) only on the first page.
  if cursor.is_empty() {
    params.push(("seek_rpid", String::new()));
  }

  let wts = unix_now();
  let (mixin_key, bootstrap_warning) = client.signer().mixin_key(|| async { fetch_mixin_key_inputs(client).await }).await;
  if let Some(warning) = bootstrap_warning {
    tracing::warn!(error = %warning, "wbi bootstrap failed, using fallback mixin key");
  }
  let w_rid = sign(&params, &mixin_key, wts);

  let mut entries = params;
  entries.push(("wts", wts.to_string()));
  entries.push(("w_rid", w_rid));
  entries.sort_by(|a, b| a.0.cmp(b.0));
  let raw_query = entries.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");

  client.get_json_raw_query("/x/v2/reply/wbi/main", &raw_query).await
}

async fn fetch_mixin_key_inputs(client: &HttpClient) -> Result<(String, String)> {
  let data = nav(client).await?;
  wbi_urls_from_nav(&data).ok_or_else(|| crate::error::HarvesterError::SignerBootstrap("nav response missing wbi_img urls".into()))
}

fn unix_now() -> i64 {
  std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Second-level replies. `page` is 1-based; `page_size` defaults to 20.
pub async fn reply_comments(client: &HttpClient, aid: i64, root_rpid: &str, page: u32, page_size: u32) -> Result<ReplyPage> {
  client
    .get_json(
      "/x/v2/reply/reply",
      &[("oid", aid.to_string()), ("type", "1".to_string()), ("root", root_rpid.to_string()), ("pn", page.to_string()), ("ps", page_size.to_string())],
    )
    .await
}

/// User card endpoint.
pub async fn card(client: &HttpClient, mid: &str) -> Result<Value> {
  client.get_json("/x/web-interface/card", &[("mid", mid.to_string()), ("photo", "true".to_string())]).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn wbi_urls_extracted_from_nav_data() {
    let data = json!({"wbi_img": {"img_url": "https://i0.example/a.png", "sub_url": "https://i0.example/b.png"}});
    let (img, sub) = wbi_urls_from_nav(&data).unwrap();
    assert_eq!(img, "https://i0.example/a.png");
    assert_eq!(sub, "https://i0.example/b.png");
  }

  #[test]
  fn main_comments_page_end_on_flag_or_empty_offset() {
    let page: MainCommentsPage = serde_json::from_value(json!({
      "replies": [],
      "cursor": {"is_end": true, "pagination_reply": {"next_offset": "AA"}}
    }))
    .unwrap();
    assert!(page.is_end());

    let page2: MainCommentsPage = serde_json::from_value(json!({
      "replies": [],
      "cursor": {"is_end": false, "pagination_reply": {"next_offset": ""}}
    }))
    .unwrap();
    assert!(page2.is_end());

    let page3: MainCommentsPage = serde_json::from_value(json!({
      "replies": [],
      "cursor": {"is_end": false, "pagination_reply": {"next_offset": "BB"}}
    }))
    .unwrap();
    assert!(!page3.is_end());
    assert_eq!(page3.next_offset(), "BB");
  }
}
