//! Thin CLI entry point.
//!
//! Out of scope for the core per `spec.md` §1 ("the configuration loader /
//! CLI entry point" is an external collaborator); this binary exists only
//! to load credentials and a keyword from the environment, wire up
//! [`biliclaw_core::config::HarvestConfig`], and run one harvest.

use std::path::PathBuf;
use std::sync::Arc;

use biliclaw_core::credential::{Credential, CredentialPool, SelectionStrategy};
use biliclaw_core::{config::HarvestConfig, observability};

#[tokio::main]
async fn main() {
  dotenv::dotenv().ok();
  observability::init();

  let keyword = std::env::var("HARVEST_KEYWORD").unwrap_or_else(|_| "rust".to_string());
  let progress_dir = std::env::var("HARVEST_PROGRESS_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("sent_records"));
  let sink_path = std::env::var("HARVEST_SINK_PATH").map(PathBuf::from).ok();

  let credentials = load_credentials_from_env();
  let pool = Arc::new(CredentialPool::new(credentials, SelectionStrategy::RoundRobin));

  let mut config = HarvestConfig::new(vec![keyword], progress_dir);
  if let Some(path) = sink_path {
    config = config.with_sink_path(path);
  }
  if let Some(resume) = env_bool("HARVEST_RESUME") {
    config = config.with_resume(resume);
  }
  if let Some(resume_pending_mids) = env_bool("HARVEST_RESUME_PENDING_MIDS") {
    config = config.with_resume_pending_mids(resume_pending_mids);
  }

  match biliclaw_core::run(config, pool).await {
    Ok(summary) => {
      tracing::info!(
        candidates_found = summary.candidates_found,
        videos_enriched = summary.videos_enriched,
        already_emitted_forwarded = summary.already_emitted_forwarded,
        comments_emitted = summary.metrics.comments_emitted,
        replies_emitted = summary.metrics.replies_emitted,
        users_emitted = summary.metrics.users_emitted,
        retries_attempted = summary.metrics.retries_attempted,
        credential_failures = summary.metrics.credential_failures,
        "harvest run complete"
      );
    }
    Err(err) => {
      tracing::error!(error = %err, "harvest run failed");
      std::process::exit(1);
    }
  }
}

/// Parses an environment variable as a boolean (`"true"`/`"1"` vs.
/// `"false"`/`"0"`, case-insensitive), or `None` if unset or unparseable.
fn env_bool(key: &str) -> Option<bool> {
  match std::env::var(key).ok()?.to_lowercase().as_str() {
    "true" | "1" => Some(true),
    "false" | "0" => Some(false),
    _ => None,
  }
}

/// Reads `HARVEST_COOKIE_<n>` environment variables (`_1`, `_2`, ...) as the
/// credential pool. Absent any, the pool starts empty and requests proceed
/// unauthenticated.
fn load_credentials_from_env() -> Vec<Credential> {
  let mut credentials = Vec::new();
  let mut index = 1;
  while let Ok(value) = std::env::var(format!("HARVEST_COOKIE_{index}")) {
    credentials.push(Credential::new(format!("cookie-{index}"), value));
    index += 1;
  }
  credentials
}
