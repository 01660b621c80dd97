use super::MembershipSnapshot;
use crate::clock::SharedClock;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Error, Clone)]
pub enum MembershipError {
    #[error("Membership source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Membership snapshot is {age_secs}s old and refresh failed: {reason}")]
    TooStale { age_secs: i64, reason: String },
}

/// Where a [`MembershipCache`] gets fresh snapshots from
#[async_trait]
pub trait MembershipSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<MembershipSnapshot, MembershipError>;
}

#[derive(Clone)]
struct CachedSnapshot {
    snapshot: Arc<MembershipSnapshot>,
    fetched_at: DateTime<Utc>,
}

/// Time-stamped membership snapshot with a refresh policy
///
/// Readers get the cached value while it is younger than `ttl`. Past that a
/// single refresh runs and concurrent readers wait for it. A failed refresh
/// falls back to the cached value while it is younger than `max_staleness`.
pub struct MembershipCache {
    source: Arc<dyn MembershipSource>,
    clock: SharedClock,
    ttl: Duration,
    max_staleness: Duration,
    current: RwLock<Option<CachedSnapshot>>,
    refresh_lock: Mutex<()>,
}

impl MembershipCache {
    pub fn new(
        source: Arc<dyn MembershipSource>,
        clock: SharedClock,
        ttl: Duration,
        max_staleness: Duration,
    ) -> Self {
        Self {
            source,
            clock,
            ttl,
            max_staleness: max_staleness.max(ttl),
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn fresh_cached(&self) -> Option<Arc<MembershipSnapshot>> {
        let now = self.clock.now();
        self.current
            .read()
            .await
            .as_ref()
            .filter(|cached| now - cached.fetched_at < self.ttl)
            .map(|cached| cached.snapshot.clone())
    }

    /// Current snapshot, refreshing when the cached one has expired
    pub async fn snapshot(&self) -> Result<Arc<MembershipSnapshot>, MembershipError> {
        if let Some(snapshot) = self.fresh_cached().await {
            return Ok(snapshot);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another reader may have refreshed while we waited
        if let Some(snapshot) = self.fresh_cached().await {
            return Ok(snapshot);
        }
        self.refresh_locked().await
    }

    /// Fetch a new snapshot unconditionally
    pub async fn refresh(&self) -> Result<Arc<MembershipSnapshot>, MembershipError> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<Arc<MembershipSnapshot>, MembershipError> {
        match self.source.fetch_snapshot().await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                let fetched_at = self.clock.now();
                *self.current.write().await = Some(CachedSnapshot {
                    snapshot: snapshot.clone(),
                    fetched_at,
                });
                debug!("Membership snapshot refreshed with {} nodes", snapshot.len());
                Ok(snapshot)
            }
            Err(e) => {
                let cached = self.current.read().await.clone();
                let Some(cached) = cached else {
                    warn!("Membership refresh failed with no cached snapshot: {}", e);
                    return Err(e);
                };

                let age = self.clock.now() - cached.fetched_at;
                if age < self.max_staleness {
                    warn!(
                        "Membership refresh failed, serving snapshot {}s old: {}",
                        age.num_seconds(),
                        e
                    );
                    Ok(cached.snapshot)
                } else {
                    info!(
                        "Discarding membership snapshot {}s old after failed refresh",
                        age.num_seconds()
                    );
                    Err(MembershipError::TooStale {
                        age_secs: age.num_seconds(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }
}
