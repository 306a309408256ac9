#![doc(html_root_url = "https://docs.rs/biliclaw-core/latest/biliclaw_core/")]

//! Concurrent harvesting pipeline for a video platform's public web APIs.
//!
//! Five stages — search, detail enrichment, first-level comments,
//! second-level replies, and user profile cards — run concurrently, linked
//! by bounded queues, behind a request governor (rate limiter, retry with
//! backoff, credential rotation) and a durable progress store that makes
//! the whole run resumable.
//!
//! ## Layout
//!
//! - [`credential`] — credential pool: rotation, failure accounting, validation.
//! - [`rate_limiter`] — global token-bucket rate limiter.
//! - [`retry`] — exponential-backoff retry wrapper with credential attribution.
//! - [`signer`] — WBI request signer (mixin key fetch, cache, signature).
//! - [`http`] — session binding and typed per-endpoint request functions.
//! - [`entities`] — record types and their parsing from upstream JSON.
//! - [`progress`] — durable per-video cursors and emitted-id ledgers.
//! - [`sink`] — the downstream keyed-append interface.
//! - [`pipeline`] — the five stages and their orchestration.
//! - [`config`] — [`config::HarvestConfig`], the top-level run configuration.
//! - [`error`] — the crate-wide error type.
//! - [`observability`] — tracing setup.
//! - [`metrics`] — in-process run counters.

pub mod config;
pub mod credential;
pub mod entities;
pub mod error;
pub mod http;
pub mod metrics;
pub mod observability;
pub mod pipeline;
pub mod progress;
pub mod rate_limiter;
pub mod retry;
pub mod signer;
pub mod sink;

pub use config::HarvestConfig;
pub use credential::{Credential, CredentialPool, SelectionStrategy};
pub use error::{HarvesterError, Result};
pub use pipeline::{run, HarvestSummary};
