//! Tracing setup.
//!
//! Grounded on the teacher's own observability story (`tracing` +
//! `tracing-subscriber` with `EnvFilter`, configured once at process
//! start). Replaces the original's print-prefix-per-stage convention
//! (`f"[{stage}:{worker_id}]"`) with structured spans: each worker enters a
//! span carrying `stage` and `worker_id` fields for the lifetime of its
//! loop, so every log line within it is attributed without string
//! formatting at each call site.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. Honors `RUST_LOG`; defaults to
/// `info` for this crate and `warn` elsewhere.
pub fn init() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,biliclaw_core=info"));
  tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

/// Span for a single pipeline worker, entered for the worker's whole
/// lifetime.
#[must_use]
pub fn stage_worker_span(stage: &'static str, worker_id: u32) -> tracing::Span {
  tracing::info_span!("stage_worker", stage, worker_id)
}
