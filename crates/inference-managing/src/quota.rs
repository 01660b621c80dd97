//! Quota Ledger
//!
//! Each validator receives a per-epoch allotment proportional to its stake.
//! Every (epoch, validator, miner) pair has a consumption counter that may
//! only grow while it is below `floor(allotment * threshold)`.

use crate::config::QuotaConfig;
use crate::error::{ManagingError, Result};
use crate::metrics::{self, ConsumeOutcome};
use inference_common::membership::{MembershipCache, MembershipSnapshot};
use inference_common::store::{keys, SharedStore, StoreResult};
use inference_common::SharedClock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub type Allotments = HashMap<String, i64>;

/// Proportional integer allotments for members with at least `min_stake`
///
/// Each eligible member gets `floor(max_requests * stake / total_stake)`,
/// clamped to at least 1. Ineligible members are absent.
pub fn compute_allotments(
    snapshot: &MembershipSnapshot,
    min_stake: f64,
    max_requests: i64,
) -> Allotments {
    let eligible: Vec<_> = snapshot
        .nodes()
        .iter()
        .filter(|node| node.stake_total >= min_stake)
        .collect();

    let total_stake: f64 = eligible.iter().map(|node| node.stake_total).sum();
    if eligible.is_empty() || total_stake <= 0.0 {
        return Allotments::new();
    }

    let mut allotments = Allotments::with_capacity(eligible.len());
    for node in eligible {
        let share = (max_requests as f64 * (node.stake_total / total_stake)).floor() as i64;
        allotments
            .entry(node.identity.clone())
            .or_insert_with(|| share.max(1));
    }
    allotments
}

pub struct QuotaLedger {
    store: SharedStore,
    membership: Arc<MembershipCache>,
    clock: SharedClock,
    config: QuotaConfig,
}

impl QuotaLedger {
    pub fn new(
        store: SharedStore,
        membership: Arc<MembershipCache>,
        clock: SharedClock,
        config: QuotaConfig,
    ) -> Self {
        Self {
            store,
            membership,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// `floor(now / epoch_interval)`
    pub fn current_epoch(&self) -> i64 {
        let interval = self.config.epoch_interval_secs.max(1) as i64;
        self.clock.now().timestamp().div_euclid(interval)
    }

    fn counter_ttl(&self) -> Duration {
        self.config.epoch_interval() * 2
    }

    fn allotment_ttl(&self) -> Duration {
        self.config.refresh_interval() * 2
    }

    /// Allotment used when none can be computed
    pub fn degraded_allotment(&self) -> i64 {
        (self.config.max_requests / self.config.degraded_divisor.max(1)).max(1)
    }

    /// Recompute and persist the allotment map from the current membership
    pub async fn recompute_allotments(&self) -> Result<Allotments> {
        let snapshot = self.membership.snapshot().await?;
        let allotments =
            compute_allotments(&snapshot, self.config.min_stake, self.config.max_requests);

        if allotments.is_empty() {
            warn!(
                "No validators meet the minimum stake of {}; allotments left unchanged",
                self.config.min_stake
            );
            return Ok(allotments);
        }

        let encoded = serde_json::to_string(&allotments).map_err(|e| ManagingError::Internal {
            message: format!("Failed to encode allotments: {e}"),
        })?;
        self.store
            .set(
                keys::VALIDATOR_ALLOTMENTS,
                &encoded,
                Some(self.allotment_ttl()),
                self.clock.now(),
            )
            .await?;

        info!("Updated allotments for {} validators", allotments.len());
        Ok(allotments)
    }

    async fn stored_allotments(&self) -> StoreResult<Option<Allotments>> {
        let Some(raw) = self
            .store
            .get(keys::VALIDATOR_ALLOTMENTS, self.clock.now())
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Max requests per epoch for `validator`
    ///
    /// A missing map triggers one synchronous recompute. If the map is still
    /// missing the degraded allotment is returned; store failures yield 0.
    pub async fn allotment(&self, validator: &str) -> i64 {
        match self.stored_allotments().await {
            Ok(Some(allotments)) => return allotments.get(validator).copied().unwrap_or(0),
            Ok(None) => {}
            Err(e) => {
                error!("Failed to read validator allotments: {}", e);
                return 0;
            }
        }

        warn!("No validator allotments stored, recomputing");
        if let Err(e) = self.recompute_allotments().await {
            warn!("Allotment recompute failed: {}", e);
        }

        match self.stored_allotments().await {
            Ok(Some(allotments)) => allotments.get(validator).copied().unwrap_or(0),
            Ok(None) => {
                let degraded = self.degraded_allotment();
                error!(
                    "Validator allotments unavailable after recompute, using degraded allotment {}",
                    degraded
                );
                degraded
            }
            Err(e) => {
                error!("Failed to read validator allotments: {}", e);
                0
            }
        }
    }

    /// Try to spend one request of `validator` against `miner`
    ///
    /// Accepted only while the epoch counter is below
    /// `floor(allotment * threshold)`. Store failures deny.
    pub async fn consume(&self, validator: &str, miner: &str, threshold: f64) -> bool {
        let allotment = self.allotment(validator).await;
        if allotment <= 0 {
            warn!("Validator {} has no quota allocation", validator);
            metrics::record_consume(ConsumeOutcome::Denied);
            return false;
        }

        let limit = (allotment as f64 * threshold).floor() as i64;
        let key = keys::consumed(self.current_epoch(), validator, miner);

        match self
            .store
            .increment_below(&key, limit, self.counter_ttl(), self.clock.now())
            .await
        {
            Ok(Some(consumed)) => {
                debug!(
                    validator = %validator,
                    miner = %miner,
                    "Quota consumed: {}/{}",
                    consumed,
                    limit
                );
                metrics::record_consume(ConsumeOutcome::Accepted);
                true
            }
            Ok(None) => {
                debug!(
                    validator = %validator,
                    miner = %miner,
                    "Quota exceeded at limit {}",
                    limit
                );
                metrics::record_consume(ConsumeOutcome::Denied);
                false
            }
            Err(e) => {
                error!("Error consuming quota: {}", e);
                metrics::record_consume(ConsumeOutcome::Failed);
                false
            }
        }
    }

    /// Requests `validator` has spent against `miner` this epoch
    pub async fn consumed(&self, validator: &str, miner: &str) -> Result<i64> {
        let key = keys::consumed(self.current_epoch(), validator, miner);
        Ok(self.store.counter(&key, self.clock.now()).await?)
    }

    /// Sampling weight per miner: `max(1, allotment - consumed)`
    ///
    /// Never zero, so exhausted miners stay sampleable and are then rejected
    /// by [`QuotaLedger::consume`].
    pub async fn remaining_capacity(&self, validator: &str, miners: &[String]) -> Result<Vec<i64>> {
        let allotment = self.allotment(validator).await;
        if allotment <= 0 {
            warn!("Validator {} has no quota allocation", validator);
            return Ok(vec![1; miners.len()]);
        }

        let epoch = self.current_epoch();
        let counter_keys: Vec<String> = miners
            .iter()
            .map(|miner| keys::consumed(epoch, validator, miner))
            .collect();
        let consumed = self.store.counters(&counter_keys, self.clock.now()).await?;

        Ok(consumed
            .into_iter()
            .map(|used| (allotment - used).max(0).max(1))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{member, Harness};
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_compute_allotments_proportional() {
        let snapshot = MembershipSnapshot::new(vec![
            member(0, "a", 3000.0),
            member(1, "b", 1000.0),
            member(2, "poor", 10.0),
        ]);
        let allotments = compute_allotments(&snapshot, 1000.0, 256);
        assert_eq!(allotments.get("a"), Some(&192));
        assert_eq!(allotments.get("b"), Some(&64));
        assert!(!allotments.contains_key("poor"));
    }

    #[test]
    fn test_compute_allotments_clamps_to_one() {
        let snapshot = MembershipSnapshot::new(vec![
            member(0, "whale", 1_000_000.0),
            member(1, "minnow", 1000.0),
        ]);
        let allotments = compute_allotments(&snapshot, 1000.0, 10);
        assert_eq!(allotments.get("minnow"), Some(&1));
        assert_eq!(allotments.get("whale"), Some(&9));
    }

    #[test]
    fn test_compute_allotments_empty() {
        let snapshot = MembershipSnapshot::new(vec![member(0, "a", 1.0)]);
        assert!(compute_allotments(&snapshot, 1000.0, 256).is_empty());
    }

    #[tokio::test]
    async fn test_consume_respects_threshold_and_epoch() {
        let harness = Harness::new(vec![member(0, "val", 1000.0), member(1, "val2", 1000.0)]).await;
        let ledger = harness.quota_ledger(20);
        assert_eq!(ledger.allotment("val").await, 10);

        for _ in 0..5 {
            assert!(ledger.consume("val", "miner", 0.5).await);
        }
        assert!(!ledger.consume("val", "miner", 0.5).await);
        assert_eq!(ledger.consumed("val", "miner").await.unwrap(), 5);

        harness.clock.advance(ChronoDuration::seconds(600));
        assert!(ledger.consume("val", "miner", 0.5).await);
        assert_eq!(ledger.consumed("val", "miner").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_consume_never_overshoots() {
        let harness = Harness::new(vec![member(0, "val", 1000.0)]).await;
        let ledger = Arc::new(harness.quota_ledger(8));
        ledger.recompute_allotments().await.unwrap();

        let attempts = (0..32).map(|_| {
            let ledger = ledger.clone();
            async move { ledger.consume("val", "miner", 1.0).await }
        });
        let accepted = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();

        assert_eq!(accepted, 8);
        assert_eq!(ledger.consumed("val", "miner").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_unknown_validator_has_no_quota() {
        let harness = Harness::new(vec![member(0, "val", 1000.0)]).await;
        let ledger = harness.quota_ledger(20);
        assert_eq!(ledger.allotment("stranger").await, 0);
        assert!(!ledger.consume("stranger", "miner", 1.0).await);
    }

    #[tokio::test]
    async fn test_degraded_allotment_without_eligible_members() {
        let harness = Harness::new(vec![member(0, "val", 1.0)]).await;
        let ledger = harness.quota_ledger(256);
        assert_eq!(ledger.allotment("val").await, 2);
        assert_eq!(ledger.allotment("anyone").await, 2);
    }

    #[tokio::test]
    async fn test_remaining_capacity_never_zero() {
        let harness = Harness::new(vec![member(0, "val", 1000.0), member(1, "val2", 1000.0)]).await;
        let ledger = harness.quota_ledger(4);
        assert_eq!(ledger.allotment("val").await, 2);

        assert!(ledger.consume("val", "m1", 1.0).await);
        assert!(ledger.consume("val", "m1", 1.0).await);
        assert!(ledger.consume("val", "m2", 1.0).await);

        let miners = vec!["m1".to_string(), "m2".to_string(), "m3".to_string()];
        let capacity = ledger.remaining_capacity("val", &miners).await.unwrap();
        assert_eq!(capacity, vec![1, 1, 2]);

        let capacity = ledger.remaining_capacity("stranger", &miners).await.unwrap();
        assert_eq!(capacity, vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn test_allotments_expire_and_recompute() {
        let harness = Harness::new(vec![member(0, "val", 1000.0)]).await;
        let ledger = harness.quota_ledger(20);
        ledger.recompute_allotments().await.unwrap();

        harness
            .membership
            .replace(vec![member(0, "val", 1000.0), member(1, "new", 1000.0)]);
        // Stored map is still live; new validator is absent until it expires
        assert_eq!(ledger.allotment("new").await, 0);

        harness.clock.advance(ChronoDuration::seconds(1200));
        assert_eq!(ledger.allotment("new").await, 10);
    }
}
