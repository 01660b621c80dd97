//! Score Tracking Window
//!
//! Caps how many times one miner may be scored within a sliding period. This
//! limits scoring volume and is independent of the request quota.

use crate::config::ScoreWindowConfig;
use inference_common::store::{keys, SharedStore, StoreResult};
use inference_common::SharedClock;
use tracing::debug;

pub struct ScoreTrackingWindow {
    store: SharedStore,
    clock: SharedClock,
    config: ScoreWindowConfig,
}

impl ScoreTrackingWindow {
    pub fn new(store: SharedStore, clock: SharedClock, config: ScoreWindowConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Record a scoring of `miner` if it is still under the per-period cap
    pub async fn try_admit(&self, miner: &str) -> StoreResult<bool> {
        let key = keys::score_window(&self.config.key_prefix, miner);
        let period = self.config.period();

        let admitted = self
            .store
            .admit_to_window(
                &key,
                self.clock.now(),
                period,
                self.config.max_scores_per_period,
                period * 2,
            )
            .await?;

        if !admitted {
            debug!(
                miner = %miner,
                "Scoring cap of {} per {}s reached",
                self.config.max_scores_per_period,
                self.config.period_secs
            );
        }
        Ok(admitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use inference_common::{ManualClock, SqliteStateStore};
    use std::sync::Arc;

    async fn window(max: u32) -> (ScoreTrackingWindow, ManualClock) {
        let store: SharedStore = Arc::new(SqliteStateStore::in_memory().await.unwrap());
        let clock = ManualClock::at_unix(1_700_000_000);
        let config = ScoreWindowConfig {
            max_scores_per_period: max,
            period_secs: 600,
            key_prefix: "score_tracking:".to_string(),
        };
        (
            ScoreTrackingWindow::new(store, Arc::new(clock.clone()), config),
            clock,
        )
    }

    #[tokio::test]
    async fn test_cap_within_period() {
        let (window, clock) = window(3).await;
        for _ in 0..3 {
            assert!(window.try_admit("m").await.unwrap());
            clock.advance(Duration::seconds(10));
        }
        assert!(!window.try_admit("m").await.unwrap());
        // Other miners are tracked separately
        assert!(window.try_admit("other").await.unwrap());
    }

    #[tokio::test]
    async fn test_old_entries_slide_out() {
        let (window, clock) = window(2).await;
        assert!(window.try_admit("m").await.unwrap());
        clock.advance(Duration::seconds(300));
        assert!(window.try_admit("m").await.unwrap());
        assert!(!window.try_admit("m").await.unwrap());

        // First entry is now older than the period
        clock.advance(Duration::seconds(301));
        assert!(window.try_admit("m").await.unwrap());
        assert!(!window.try_admit("m").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_cap_never_admits() {
        let (window, _clock) = window(0).await;
        assert!(!window.try_admit("m").await.unwrap());
    }
}
