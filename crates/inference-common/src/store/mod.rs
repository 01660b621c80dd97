//! Shared key-value state store
//!
//! Quotas, scores, the membership snapshot and score-tracking windows all live
//! in one store shared by every process on a host. Every entry may carry an
//! expiry; expired entries are invisible to reads and removed by
//! [`StateStore::purge_expired`].

pub mod keys;
mod sqlite;

pub use sqlite::SqliteStateStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a state store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(#[from] sqlx::Error),

    #[error("Store not ready: {0}")]
    NotReady(String),

    #[error("Stored value for {key} is malformed: {message}")]
    Malformed { key: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Shared handle to a state store
pub type SharedStore = Arc<dyn StateStore>;

/// Maps the current values of a key set to the entries to write back
pub type UpdateFn<'a> =
    dyn Fn(Vec<Option<String>>) -> StoreResult<Vec<(String, String)>> + Send + Sync + 'a;

/// Key-value store with per-entry expiry, atomic counters and sliding windows
///
/// All time-dependent operations take `now` from the caller so that the
/// caller's clock, not the backend's, decides what has expired.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a live string value
    async fn get(&self, key: &str, now: DateTime<Utc>) -> StoreResult<Option<String>>;

    /// Read several live values; the result has one slot per key, in order
    async fn get_many(&self, keys: &[String], now: DateTime<Utc>)
        -> StoreResult<Vec<Option<String>>>;

    /// All live values whose key starts with `prefix`
    async fn scan_prefix(&self, prefix: &str, now: DateTime<Utc>)
        -> StoreResult<HashMap<String, String>>;

    /// Write a value, replacing any previous one
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Write several values in one transaction: all land or none do
    async fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Read-modify-write over several keys
    ///
    /// Reads the live values of `keys` (one slot per key, in order), passes
    /// them to `update` and writes the entries it returns. The transaction
    /// takes the write lock before the read, so concurrent updates of the same
    /// keys apply one after the other. An error from `update` writes nothing.
    async fn update_many(
        &self,
        keys: &[String],
        ttl: Option<Duration>,
        now: DateTime<Utc>,
        update: &UpdateFn<'_>,
    ) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Live counter value, zero when absent or expired
    async fn counter(&self, key: &str, now: DateTime<Utc>) -> StoreResult<i64>;

    /// Several live counters, one slot per key, in order
    async fn counters(&self, keys: &[String], now: DateTime<Utc>) -> StoreResult<Vec<i64>>;

    /// Atomically increment `key` only if its live value is below `limit`
    ///
    /// Returns the new value on success and `None` when the counter was already
    /// at or above the limit. The expiry is refreshed on every successful
    /// increment.
    async fn increment_below(
        &self,
        key: &str,
        limit: i64,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<i64>>;

    /// Sliding-window admission
    ///
    /// In one transaction: drop entries of `key` older than `period`, count the
    /// remainder and, when fewer than `max_entries` remain, record a new entry
    /// at `now`. Returns whether the new entry was recorded.
    async fn admit_to_window(
        &self,
        key: &str,
        now: DateTime<Utc>,
        period: Duration,
        max_entries: u32,
        ttl: Duration,
    ) -> StoreResult<bool>;

    /// Delete every expired entry, returning how many rows were removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// Expiry instant in unix milliseconds
pub(crate) fn expiry_millis(now: DateTime<Utc>, ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now.timestamp_millis().saturating_add(ttl_ms)
}
