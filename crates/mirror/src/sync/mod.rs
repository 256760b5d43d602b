//! Sync engine for mirroring a mailbox into the store
//!
//! Every step is an idempotent upsert, so runs can be interrupted and
//! repeated safely.

mod engine;
mod threads;

pub use engine::{SyncOptions, SyncStats, sync_all, sync_message};
pub use threads::{ThreadStats, rebuild_threads};
