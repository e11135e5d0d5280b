//! # tvc-store
//!
//! Durable candle storage over SQLite.
//!
//! One row per candle keyed by `(symbol, timestamp)`. [`RetentionStore::upsert`]
//! is the only write path and is idempotent; [`RetentionStore::prune`] and
//! [`RetentionStore::compact`] keep the file bounded by the retention window.
//!
//! Each collector consumer task owns its own [`RetentionStore`] (its own SQLite
//! connection). With WAL journaling and a busy timeout, several of them can
//! write distinct keys to the same file concurrently.

mod schema;
pub mod store;

pub use store::{RetentionStore, StoreError};
