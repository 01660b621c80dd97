//! # Inference Managing Service
//!
//! Central coordinator of the inference network. Validators ask it which
//! miners they may query and report the scores they measured back to it.
//!
//! ## Components
//!
//! - **Quota Ledger**: stake-proportional per-epoch allotments and atomic
//!   consumption counters per (validator, miner) pair
//! - **Score Store**: bounded per-miner score history and rolling average
//! - **Selection Engine**: top-score filtering and capacity-weighted sampling
//! - **HTTP API**: `/api/consume`, `/api/update-score`, `/api/get-scores`

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod quota;
pub mod scores;
pub mod selection;
pub mod server;
pub mod tasks;

pub use config::ManagingConfig;
pub use error::{ManagingError, Result};
pub use server::{AppState, Server};

/// Version of the inference-managing crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::QuotaConfig;
    use crate::quota::QuotaLedger;
    use crate::scores::ScoreStore;
    use chrono::{DateTime, Duration};
    use inference_common::membership::{
        MemberRecord, MembershipCache, NodeAddress, StaticMembership,
    };
    use inference_common::{ManualClock, SharedClock, SharedStore, SqliteStateStore};
    use std::sync::Arc;

    pub const START_UNIX: i64 = 1_699_999_800;

    pub fn member(uid: u16, identity: &str, stake: f64) -> MemberRecord {
        MemberRecord {
            uid,
            identity: identity.to_string(),
            address: NodeAddress {
                host: "127.0.0.1".to_string(),
                port: 8000 + uid,
                scheme: "http".to_string(),
            },
            stake_alpha: stake,
            stake_tao: 0.0,
            stake_total: stake,
            trust: 0.0,
            last_updated: DateTime::from_timestamp(START_UNIX, 0).unwrap(),
        }
    }

    /// In-memory store, manual clock and replaceable membership
    pub struct Harness {
        pub store: SharedStore,
        pub clock: ManualClock,
        pub membership: Arc<StaticMembership>,
        pub cache: Arc<MembershipCache>,
    }

    impl Harness {
        pub async fn new(nodes: Vec<MemberRecord>) -> Self {
            let store: SharedStore = Arc::new(SqliteStateStore::in_memory().await.unwrap());
            let clock = ManualClock::at_unix(START_UNIX);
            let membership = Arc::new(StaticMembership::new(nodes));
            let cache = Arc::new(MembershipCache::new(
                membership.clone(),
                Arc::new(clock.clone()),
                Duration::seconds(600),
                Duration::seconds(1800),
            ));
            Self {
                store,
                clock,
                membership,
                cache,
            }
        }

        pub fn shared_clock(&self) -> SharedClock {
            Arc::new(self.clock.clone())
        }

        pub fn quota_ledger(&self, max_requests: i64) -> QuotaLedger {
            let config = QuotaConfig {
                max_requests,
                ..QuotaConfig::default()
            };
            QuotaLedger::new(
                self.store.clone(),
                self.cache.clone(),
                self.shared_clock(),
                config,
            )
        }

        /// Score store with the default epoch and ttl factor
        pub fn score_store(&self, history_len: usize) -> ScoreStore {
            let ttl = std::time::Duration::from_secs(600 * history_len as u64 * 2);
            ScoreStore::new(self.store.clone(), self.shared_clock(), history_len, ttl)
        }
    }
}
