//! Periodic background work
//!
//! - allotment recompute every `quota.refresh_interval_secs`
//! - membership refresh every `membership.cache_ttl_secs`
//! - expired state purge every `store.purge_interval_secs`

use crate::metrics;
use crate::server::AppState;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub fn spawn_background_tasks(state: &AppState) -> Vec<JoinHandle<()>> {
    vec![
        spawn_allotment_refresh(state.clone()),
        spawn_membership_refresh(state.clone()),
        spawn_store_purge(state.clone()),
    ]
}

fn interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_secs(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}

fn spawn_allotment_refresh(state: AppState) -> JoinHandle<()> {
    let period = state.config.quota.refresh_interval();
    tokio::spawn(async move {
        let mut ticker = interval(period);
        // The first tick fires immediately and startup already computed
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match state.quota.recompute_allotments().await {
                Ok(allotments) => {
                    debug!("Allotment refresh covered {} validators", allotments.len());
                    metrics::record_allotment_refresh(true);
                }
                Err(e) => {
                    warn!("Allotment refresh failed: {}", e);
                    metrics::record_allotment_refresh(false);
                }
            }
        }
    })
}

fn spawn_membership_refresh(state: AppState) -> JoinHandle<()> {
    let period = state
        .membership
        .ttl()
        .to_std()
        .unwrap_or(Duration::from_secs(600));
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            match state.membership.refresh().await {
                Ok(snapshot) => debug!("Membership refreshed with {} nodes", snapshot.len()),
                Err(e) => warn!("Membership refresh failed: {}", e),
            }
        }
    })
}

fn spawn_store_purge(state: AppState) -> JoinHandle<()> {
    let period = state.config.store.purge_interval();
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            match state.store.purge_expired(state.clock.now()).await {
                Ok(0) => {}
                Ok(removed) => info!("Purged {} expired state entries", removed),
                Err(e) => warn!("State purge failed: {}", e),
            }
        }
    })
}
