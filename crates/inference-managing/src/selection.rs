//! Selection Engine
//!
//! Turns a consume request into a quota-respecting, capacity-weighted sample
//! of miners and consumes quota for each of them.

use crate::error::{ManagingError, Result};
use crate::quota::QuotaLedger;
use crate::scores::{ScoreStore, NEUTRAL_SCORE};
use futures::future::join_all;
use inference_common::membership::{MembershipCache, MembershipSnapshot};
use inference_common::protocol::{ConsumeRequest, MinerSamplingResponse};
use rand::Rng;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SelectionEngine {
    quota: Arc<QuotaLedger>,
    scores: Arc<ScoreStore>,
    membership: Arc<MembershipCache>,
}

/// Draw `amount` distinct indices without replacement, weighted by `weights`
pub(crate) fn draw_weighted<R: Rng + ?Sized>(
    rng: &mut R,
    weights: &[i64],
    amount: usize,
) -> Result<Vec<usize>> {
    let amount = amount.min(weights.len());
    rand::seq::index::sample_weighted(rng, weights.len(), |i| weights[i] as f64, amount)
        .map(|indices| indices.into_vec())
        .map_err(|e| ManagingError::Internal {
            message: format!("Failed to sample miners: {e}"),
        })
}

/// Identities ranked by descending average score, ties in snapshot order
pub(crate) fn rank_by_score(
    identities: Vec<String>,
    averages: &std::collections::HashMap<String, f64>,
) -> Vec<String> {
    let mut ranked: Vec<(String, f64)> = identities
        .into_iter()
        .map(|identity| {
            let score = averages.get(&identity).copied().unwrap_or(NEUTRAL_SCORE);
            (identity, score)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    ranked.into_iter().map(|(identity, _)| identity).collect()
}

fn sampling_response(
    snapshot: Option<&MembershipSnapshot>,
    miner_identities: Vec<String>,
) -> MinerSamplingResponse {
    let uids = miner_identities
        .iter()
        .map(|miner| snapshot.and_then(|s| s.uid(miner)))
        .collect();
    let addresses = miner_identities
        .iter()
        .map(|miner| snapshot.and_then(|s| s.address_url(miner)))
        .collect();

    MinerSamplingResponse {
        miner_identities,
        uids,
        addresses,
    }
}

impl SelectionEngine {
    pub fn new(
        quota: Arc<QuotaLedger>,
        scores: Arc<ScoreStore>,
        membership: Arc<MembershipCache>,
    ) -> Self {
        Self {
            quota,
            scores,
            membership,
        }
    }

    pub async fn consume(&self, request: &ConsumeRequest) -> Result<MinerSamplingResponse> {
        request
            .validate()
            .map_err(|message| ManagingError::InvalidRequest { message })?;

        if let Some(miner) = request.target_miner() {
            return self.consume_single(request, miner).await;
        }

        let validator = request.validator_identity.as_str();
        let snapshot = self.membership.snapshot().await?;
        if snapshot.is_empty() {
            return Err(ManagingError::NoMembers {
                reason: "membership snapshot is empty".to_string(),
            });
        }

        let candidates = self.top_candidates(&snapshot, request.top_score).await?;
        if candidates.is_empty() {
            return Err(ManagingError::NoMembers {
                reason: format!("top score filter {} kept no members", request.top_score),
            });
        }

        let capacities = self.quota.remaining_capacity(validator, &candidates).await?;
        if capacities.iter().sum::<i64>() <= 0 {
            return Err(ManagingError::QuotaExhausted);
        }

        let sampled: Vec<String> = {
            let mut rng = rand::thread_rng();
            draw_weighted(&mut rng, &capacities, request.sample_size)?
                .into_iter()
                .map(|i| candidates[i].clone())
                .collect()
        };
        debug!(
            validator = %validator,
            "Sampled {} of {} candidates",
            sampled.len(),
            candidates.len()
        );

        let attempts = sampled.iter().map(|miner| {
            self.quota
                .consume(validator, miner, request.rate_limit_threshold)
        });
        let outcomes = join_all(attempts).await;

        let consumed: Vec<String> = sampled
            .into_iter()
            .zip(outcomes)
            .filter_map(|(miner, accepted)| accepted.then_some(miner))
            .collect();

        if consumed.is_empty() {
            return Err(ManagingError::QuotaExhausted);
        }

        info!(
            "Sampled and consumed quota for validator {} accessing {} miners",
            validator,
            consumed.len()
        );
        Ok(sampling_response(Some(&snapshot), consumed))
    }

    async fn consume_single(
        &self,
        request: &ConsumeRequest,
        miner: &str,
    ) -> Result<MinerSamplingResponse> {
        let validator = request.validator_identity.as_str();
        if !self
            .quota
            .consume(validator, miner, request.rate_limit_threshold)
            .await
        {
            return Err(ManagingError::QuotaExceeded {
                validator: validator.to_string(),
                miner: miner.to_string(),
            });
        }

        let snapshot = match self.membership.snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Consumed quota but membership is unavailable: {}", e);
                None
            }
        };
        Ok(sampling_response(snapshot.as_deref(), vec![miner.to_string()]))
    }

    /// Distinct identities, keeping the top `floor(n * top_score)` by average score
    async fn top_candidates(
        &self,
        snapshot: &MembershipSnapshot,
        top_score: f64,
    ) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let identities: Vec<String> = snapshot
            .identities()
            .filter(|identity| seen.insert(*identity))
            .map(str::to_string)
            .collect();

        if top_score >= 1.0 {
            return Ok(identities);
        }

        let keep = (identities.len() as f64 * top_score).floor() as usize;
        if keep == 0 {
            return Ok(Vec::new());
        }

        let averages = self.scores.all_average_scores().await?;
        let mut ranked = rank_by_score(identities, &averages);
        ranked.truncate(keep);
        debug!("Top score filter kept {} miners", ranked.len());
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{member, Harness};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    #[test]
    fn test_weighted_draw_favours_capacity() {
        let mut rng = StdRng::seed_from_u64(7);
        let weights = [10, 1, 1];
        let mut first_picked = 0;
        for _ in 0..2000 {
            let drawn = draw_weighted(&mut rng, &weights, 1).unwrap();
            if drawn == vec![0] {
                first_picked += 1;
            }
        }
        assert!(first_picked > 1400, "picked {first_picked}");
        assert!(first_picked < 2000, "picked {first_picked}");
    }

    #[test]
    fn test_weighted_draw_is_distinct_and_clamped() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut drawn = draw_weighted(&mut rng, &[1, 5, 2], 10).unwrap();
        drawn.sort_unstable();
        assert_eq!(drawn, vec![0, 1, 2]);
    }

    #[test]
    fn test_rank_by_score_ties_keep_order() {
        let identities: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
        let averages: HashMap<String, f64> = [
            ("m3", 0.9),
            ("m7", 0.8),
            ("m1", 0.7),
            ("m0", 0.1),
            ("m9", 0.2),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let ranked = rank_by_score(identities, &averages);
        // Unscored miners rank at the neutral score, in snapshot order
        assert_eq!(
            &ranked[..5],
            &["m3", "m7", "m1", "m2", "m4"].map(String::from)
        );
    }

    fn engine(harness: &Harness, max_requests: i64) -> SelectionEngine {
        SelectionEngine::new(
            Arc::new(harness.quota_ledger(max_requests)),
            Arc::new(harness.score_store(1)),
            harness.cache.clone(),
        )
    }

    #[tokio::test]
    async fn test_top_score_keeps_highest_half() {
        let mut nodes = vec![member(0, "val", 5000.0)];
        nodes.extend((1..=10).map(|i| member(i, &format!("m{i}"), 0.0)));
        let harness = Harness::new(nodes).await;

        let scores = harness.score_store(1);
        let miners: Vec<String> = (1..=10).map(|i| format!("m{i}")).collect();
        let values: Vec<f64> = (1..=10).map(|i| i as f64 / 10.0).collect();
        scores.update_scores(&miners, &values).await.unwrap();

        let engine = engine(&harness, 1000);
        let mut request = ConsumeRequest::sample("val", 20);
        request.top_score = 0.5;

        let response = engine.consume(&request).await.unwrap();
        let mut picked = response.miner_identities.clone();
        picked.sort();
        // 11 members, floor(11 * 0.5) = 5: the validator ranks at 0.5 below m5..m10
        assert_eq!(picked, vec!["m10", "m6", "m7", "m8", "m9"]);
    }

    #[tokio::test]
    async fn test_zero_top_score_is_no_members() {
        let harness = Harness::new(vec![member(0, "val", 5000.0)]).await;
        let engine = engine(&harness, 100);
        let mut request = ConsumeRequest::sample("val", 1);
        request.top_score = 0.0;

        assert!(matches!(
            engine.consume(&request).await,
            Err(ManagingError::NoMembers { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_membership_is_no_members() {
        let harness = Harness::new(vec![]).await;
        let engine = engine(&harness, 100);
        assert!(matches!(
            engine.consume(&ConsumeRequest::sample("val", 1)).await,
            Err(ManagingError::NoMembers { .. })
        ));
    }

    #[tokio::test]
    async fn test_sample_returns_metadata() {
        let harness = Harness::new(vec![
            member(0, "val", 5000.0),
            member(1, "a", 0.0),
            member(2, "b", 0.0),
        ])
        .await;
        let engine = engine(&harness, 100);

        let response = engine
            .consume(&ConsumeRequest::sample("val", 10))
            .await
            .unwrap();
        assert_eq!(response.miner_identities.len(), 3);
        for (i, identity) in response.miner_identities.iter().enumerate() {
            let node = harness.cache.snapshot().await.unwrap();
            assert_eq!(response.uids[i], node.uid(identity));
            assert_eq!(response.addresses[i], node.address_url(identity));
        }
    }

    #[tokio::test]
    async fn test_exhausted_quota_is_rejected() {
        let harness = Harness::new(vec![member(0, "val", 5000.0), member(1, "a", 0.0)]).await;
        // Allotment 1 per pair
        let engine = engine(&harness, 1);
        let request = ConsumeRequest::sample("val", 2);

        let first = engine.consume(&request).await.unwrap();
        assert_eq!(first.miner_identities.len(), 2);
        assert!(matches!(
            engine.consume(&request).await,
            Err(ManagingError::QuotaExhausted)
        ));
    }

    #[tokio::test]
    async fn test_single_miner_path() {
        let harness = Harness::new(vec![member(0, "val", 5000.0), member(1, "a", 0.0)]).await;
        let engine = engine(&harness, 2);
        let mut request = ConsumeRequest::sample("val", 1);
        request.miner_identity = Some("a".to_string());

        let response = engine.consume(&request).await.unwrap();
        assert_eq!(response.miner_identities, vec!["a"]);
        assert_eq!(response.uids, vec![Some(1)]);

        engine.consume(&request).await.unwrap();
        assert!(matches!(
            engine.consume(&request).await,
            Err(ManagingError::QuotaExceeded { .. })
        ));

        // Unknown miners are consumable but carry no metadata
        request.miner_identity = Some("ghost".to_string());
        let response = engine.consume(&request).await.unwrap();
        assert_eq!(response.uids, vec![None]);
        assert_eq!(response.addresses, vec![None]);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let harness = Harness::new(vec![member(0, "val", 5000.0)]).await;
        let engine = engine(&harness, 100);
        let mut request = ConsumeRequest::sample("val", 1);
        request.rate_limit_threshold = 0.0;

        assert!(matches!(
            engine.consume(&request).await,
            Err(ManagingError::InvalidRequest { .. })
        ));
    }
}
