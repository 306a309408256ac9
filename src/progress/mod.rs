//! Durable progress store: per-video comment cursors, emitted-id ledgers,
//! and the pending-users queue.

mod store;

pub use store::{mids_ledger, rpids_ledger, videos_ledger, FileProgressStore, ProgressStore};
