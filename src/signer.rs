//! WBI request signer for the first-level comment endpoint.
//!
//! Derives a time-bounded "mixin key" from a bootstrap call to the `nav`
//! endpoint, caches it with a 1-hour TTL, and signs parameter maps with
//! `w_rid = md5(sorted_query_string || mixin_key)`.
//!
//! Grounded byte-for-byte on `original_source/spider/api.py`'s
//! `_get_wbi_keys` / `_get_mixin_key` / `_generate_wbi_sign`: the mixing
//! table, the fallback key, and the 3600s TTL are copied from there (and
//! match `spec.md` §6's constants table).

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{HarvesterError, Result};

/// Fixed 64-element permutation used to derive the mixin key from the
/// concatenated `img_key` + `sub_key`.
pub const WBI_MIXIN_KEY_ENC_TAB: [usize; 64] = [
  46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29, 28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26,
  17, 0, 1, 60, 51, 30, 4, 22, 25, 54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

/// Mixin key used when the bootstrap call fails; a stale-but-functional
/// value rather than a hard failure.
pub const FALLBACK_MIXIN_KEY: &str = "ea1db124af3c7062474693fa704f4ff8";

/// How long a fetched mixin key remains valid.
pub const MIXIN_KEY_TTL: Duration = Duration::from_secs(3600);

/// Permute `img_key || sub_key` through [`WBI_MIXIN_KEY_ENC_TAB`] and
/// truncate to 32 characters.
fn mix(concatenated: &str) -> String {
  let chars: Vec<char> = concatenated.chars().collect();
  WBI_MIXIN_KEY_ENC_TAB.iter().filter_map(|&i| chars.get(i)).take(32).collect()
}

/// Extracts the 32-hex key from a WBI image URL by stripping the path and
/// extension, e.g. `.../7e9d4bc.../abcdef0123....png` -> `abcdef0123...`.
fn key_from_url(url: &str) -> Option<String> {
  let filename = url.rsplit('/').next()?;
  let stem = filename.split('.').next()?;
  if stem.is_empty() {
    None
  } else {
    Some(stem.to_string())
  }
}

struct CachedKey {
  mixin_key: String,
  expires_at: Instant,
}

/// Fetches, caches, and applies the WBI mixin key.
///
/// The HTTP fetch is injected as an async closure returning the two raw
/// image URLs (`img_url`, `sub_url`) from the `nav` bootstrap response, so
/// the signer has no direct dependency on the HTTP client type.
pub struct WbiSigner {
  cached: Mutex<Option<CachedKey>>,
}

impl Default for WbiSigner {
  fn default() -> Self {
    Self::new()
  }
}

impl WbiSigner {
  /// Construct a signer with an empty cache.
  #[must_use]
  pub fn new() -> Self {
    Self { cached: Mutex::new(None) }
  }

  /// Returns the current mixin key, refreshing it via `fetch_wbi_urls` if
  /// the cache is empty or expired. On fetch failure, falls back to
  /// [`FALLBACK_MIXIN_KEY`] and returns an error alongside it so the caller
  /// can log a warning; the fallback value is still usable for signing.
  pub async fn mixin_key<F, Fut>(&self, fetch_wbi_urls: F) -> (String, Option<HarvesterError>)
  where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<(String, String)>>,
  {
    {
      let cached = self.cached.lock();
      if let Some(entry) = cached.as_ref() {
        if Instant::now() < entry.expires_at {
          return (entry.mixin_key.clone(), None);
        }
      }
    }

    match fetch_wbi_urls().await {
      Ok((img_url, sub_url)) => match (key_from_url(&img_url), key_from_url(&sub_url)) {
        (Some(img_key), Some(sub_key)) => {
          let mixin_key = mix(&format!("{img_key}{sub_key}"));
          *self.cached.lock() = Some(CachedKey { mixin_key: mixin_key.clone(), expires_at: Instant::now() + MIXIN_KEY_TTL });
          (mixin_key, None)
        }
        _ => (FALLBACK_MIXIN_KEY.to_string(), Some(HarvesterError::SignerBootstrap("nav response missing wbi_img urls".into()))),
      },
      Err(err) => (FALLBACK_MIXIN_KEY.to_string(), Some(HarvesterError::SignerBootstrap(err.to_string()))),
    }
  }
}

/// Sign a parameter map for the first-level comment endpoint.
///
/// `params` must already contain every already-URL-encoded value exactly as
/// it will appear on the wire (the signer and the transmitter must agree on
/// encoding — encode first, then sign). `wts` is added by this function.
/// Returns `(w_rid, wts)`.
#[must_use]
pub fn sign(params: &[(&str, String)], mixin_key: &str, wts: i64) -> String {
  let mut entries: Vec<(&str, String)> = params.to_vec();
  entries.push(("wts", wts.to_string()));
  entries.sort_by(|a, b| a.0.cmp(b.0));
  let query_string = entries.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
  format!("{:x}", md5::compute(format!("{query_string}{mixin_key}")))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn key_from_url_strips_path_and_extension() {
    assert_eq!(key_from_url("https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png"), Some("7cd084941338484aae1ad9425b84077c".to_string()));
  }

  #[test]
  fn mix_truncates_to_32_chars() {
    let raw = "a".repeat(64);
    assert_eq!(mix(&raw).len(), 32);
  }

  #[test]
  fn signer_is_deterministic_for_fixed_inputs() {
    // Test vector from spec.md section 8, scenario 6.
    let mixin_key = "0".repeat(32);
    let params = vec![
      ("mode", "2".to_string()),
      ("oid", "100".to_string()),
      ("pagination_str", "%7B%22offset%22%3A%22%22%7D".to_string()),
      ("plat", "1".to_string()),
      ("seek_rpid", String::new()),
      ("type", "1".to_string()),
      ("web_location", "1315875".to_string()),
    ];
    let wts = 1_700_000_000_i64;
    let w_rid = sign(&params, &mixin_key, wts);

    let mut entries = params.clone();
    entries.push(("wts", wts.to_string()));
    entries.sort_by(|a, b| a.0.cmp(b.0));
    let query = entries.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
    let expected = format!("{:x}", md5::compute(format!("{query}{mixin_key}")));

    assert_eq!(w_rid, expected);
    assert_eq!(w_rid.len(), 32);
  }

  #[test]
  fn signer_changes_when_any_encoded_value_changes() {
    let mixin_key = "deadbeef00000000000000000000000";
    let base = vec![("oid", "100".to_string()), ("type", "1".to_string())];
    let mut mutated = base.clone();
    mutated[0].1 = "101".to_string();

    let wts = 1_700_000_000_i64;
    assert_ne!(sign(&base, mixin_key, wts), sign(&mutated, mixin_key, wts));
  }

  #[tokio::test]
  async fn mixin_key_is_cached_between_calls() {
    let signer = WbiSigner::new();
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let fetch = {
      let calls = calls.clone();
      move || {
        calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        async move { Ok(("https://i0.example/wbi/aaaa.png".to_string(), "https://i0.example/wbi/bbbb.png".to_string())) }
      }
    };
    let (first, err1) = signer.mixin_key(fetch.clone()).await;
    assert!(err1.is_none());
    let (second, err2) = signer.mixin_key(fetch).await;
    assert!(err2.is_none());
    assert_eq!(first, second);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn bootstrap_failure_falls_back_to_static_key() {
    let signer = WbiSigner::new();
    let (key, err) = signer.mixin_key(|| async { Err(HarvesterError::Transport("connection refused".into())) }).await;
    assert_eq!(key, FALLBACK_MIXIN_KEY);
    assert!(err.is_some());
  }
}
