//! # tandem-store
//!
//! Durable local state for a tandem client, backed by SQLite.
//!
//! The store is a small textual key/value table holding three entries: the
//! message snapshot (JSON), the local peer identifier and the last peer we
//! were connected to. The crate exposes a synchronous `Database` handle that
//! wraps a `rusqlite::Connection` with typed helpers for each entry.

pub mod database;
pub mod kv;
pub mod migrations;
pub mod models;
pub mod snapshot;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
