//! Score Store
//!
//! Per-miner bounded score history and its rolling average. The average is
//! `sum(history) / history_len`, so a new miner starts low and only reaches
//! its true level once its history is full.

use crate::error::{ManagingError, Result};
use crate::metrics;
use inference_common::protocol::ScoreEntry;
use inference_common::store::{keys, SharedStore, StoreResult};
use inference_common::SharedClock;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, warn};

/// Average reported for miners that have never been scored
pub const NEUTRAL_SCORE: f64 = 0.5;

pub struct ScoreStore {
    store: SharedStore,
    clock: SharedClock,
    history_len: usize,
    ttl: Duration,
}

impl ScoreStore {
    pub fn new(store: SharedStore, clock: SharedClock, history_len: usize, ttl: Duration) -> Self {
        Self {
            store,
            clock,
            history_len: history_len.max(1),
            ttl,
        }
    }

    pub fn history_len(&self) -> usize {
        self.history_len
    }

    fn decode_history(&self, miner: &str, raw: Option<String>) -> VecDeque<ScoreEntry> {
        let Some(raw) = raw else {
            return VecDeque::new();
        };
        match serde_json::from_str::<VecDeque<ScoreEntry>>(&raw) {
            Ok(history) => history,
            Err(e) => {
                warn!("Discarding malformed score history for {}: {}", miner, e);
                VecDeque::new()
            }
        }
    }

    /// Append one score per miner and persist history and average together
    ///
    /// The batch is one read-modify-write transaction, so concurrent reports
    /// for the same miner are all kept. A miner listed twice receives both
    /// scores in order.
    pub async fn update_scores(&self, miners: &[String], scores: &[f64]) -> Result<()> {
        if miners.len() != scores.len() {
            return Err(ManagingError::InvalidRequest {
                message: format!(
                    "{} miners but {} scores",
                    miners.len(),
                    scores.len()
                ),
            });
        }
        if miners.is_empty() {
            return Ok(());
        }

        let mut unique: Vec<&String> = Vec::new();
        for miner in miners {
            if !unique.contains(&miner) {
                unique.push(miner);
            }
        }

        let now = self.clock.now();
        let history_keys: Vec<String> = unique.iter().map(|m| keys::score_history(m)).collect();

        let apply = |stored: Vec<Option<String>>| -> StoreResult<Vec<(String, String)>> {
            let mut histories: HashMap<&str, VecDeque<ScoreEntry>> = unique
                .iter()
                .zip(stored)
                .map(|(miner, raw)| (miner.as_str(), self.decode_history(miner, raw)))
                .collect();

            for (miner, score) in miners.iter().zip(scores) {
                if let Some(history) = histories.get_mut(miner.as_str()) {
                    history.push_back(ScoreEntry {
                        score: *score,
                        timestamp: now,
                    });
                    while history.len() > self.history_len {
                        history.pop_front();
                    }
                }
            }

            let mut entries = Vec::with_capacity(unique.len() * 2);
            for miner in &unique {
                let Some(history) = histories.get(miner.as_str()) else {
                    continue;
                };
                let average = history.iter().map(|entry| entry.score).sum::<f64>()
                    / self.history_len as f64;

                debug!(
                    miner = %miner,
                    entries = history.len(),
                    "Updated average score to {:.4}",
                    average
                );
                entries.push((keys::score_history(miner), serde_json::to_string(history)?));
                entries.push((keys::score_average(miner), average.to_string()));
            }
            Ok(entries)
        };

        self.store
            .update_many(&history_keys, Some(self.ttl), now, &apply)
            .await?;
        metrics::record_score_updates(miners.len());
        Ok(())
    }

    /// Stored average, or [`NEUTRAL_SCORE`] for unscored miners
    pub async fn average_score(&self, miner: &str) -> Result<f64> {
        let raw = self
            .store
            .get(&keys::score_average(miner), self.clock.now())
            .await?;
        Ok(raw
            .and_then(|value| value.parse::<f64>().ok())
            .unwrap_or(NEUTRAL_SCORE))
    }

    /// Averages of every scored miner
    pub async fn all_average_scores(&self) -> Result<HashMap<String, f64>> {
        let raw = self
            .store
            .scan_prefix(keys::SCORE_AVERAGE_PREFIX, self.clock.now())
            .await?;

        Ok(raw
            .into_iter()
            .filter_map(|(key, value)| {
                let miner = key.strip_prefix(keys::SCORE_AVERAGE_PREFIX)?.to_string();
                let average = value.parse::<f64>().ok()?;
                Some((miner, average))
            })
            .collect())
    }

    /// Recorded history, oldest first
    pub async fn score_history(&self, miner: &str) -> Result<Vec<ScoreEntry>> {
        let raw = self
            .store
            .get(&keys::score_history(miner), self.clock.now())
            .await?;
        Ok(self.decode_history(miner, raw).into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use chrono::Duration as ChronoDuration;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_fixed_denominator_average() {
        let harness = Harness::new(vec![]).await;
        let scores = harness.score_store(10);

        assert_eq!(scores.average_score("fresh").await.unwrap(), NEUTRAL_SCORE);

        scores.update_scores(&ids(&["fresh"]), &[0.8]).await.unwrap();
        let average = scores.average_score("fresh").await.unwrap();
        assert!((average - 0.08).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let harness = Harness::new(vec![]).await;
        let scores = harness.score_store(10);

        for i in 0..15 {
            scores
                .update_scores(&ids(&["m"]), &[i as f64])
                .await
                .unwrap();
        }

        let history = scores.score_history("m").await.unwrap();
        assert_eq!(history.len(), 10);
        assert_eq!(history.first().map(|e| e.score), Some(5.0));
        assert_eq!(history.last().map(|e| e.score), Some(14.0));

        let expected = (5..15).map(|i| i as f64).sum::<f64>() / 10.0;
        assert!((scores.average_score("m").await.unwrap() - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_duplicates_in_one_batch_apply_in_order() {
        let harness = Harness::new(vec![]).await;
        let scores = harness.score_store(2);

        scores
            .update_scores(&ids(&["m", "m", "m"]), &[0.1, 0.2, 0.3])
            .await
            .unwrap();

        let history: Vec<f64> = scores
            .score_history("m")
            .await
            .unwrap()
            .iter()
            .map(|e| e.score)
            .collect();
        assert_eq!(history, vec![0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_concurrent_reports_for_one_miner_are_all_kept() {
        let harness = Harness::new(vec![]).await;
        let scores = harness.score_store(10);

        let reports = (0..5).map(|i| {
            let scores = &scores;
            async move {
                scores
                    .update_scores(&ids(&["m"]), &[0.1 * (i + 1) as f64])
                    .await
            }
        });
        for result in futures::future::join_all(reports).await {
            result.unwrap();
        }

        let mut history: Vec<f64> = scores
            .score_history("m")
            .await
            .unwrap()
            .iter()
            .map(|e| e.score)
            .collect();
        assert_eq!(history.len(), 5);
        history.sort_by(|a, b| a.total_cmp(b));
        let expected = [0.1, 0.2, 0.3, 0.4, 0.5];
        for (got, want) in history.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12);
        }

        let average = scores.average_score("m").await.unwrap();
        assert!((average - 1.5 / 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_all_average_scores() {
        let harness = Harness::new(vec![]).await;
        let scores = harness.score_store(1);

        scores
            .update_scores(&ids(&["a", "b"]), &[0.25, 0.75])
            .await
            .unwrap();

        let all = scores.all_average_scores().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get("a"), Some(&0.25));
        assert_eq!(all.get("b"), Some(&0.75));
    }

    #[tokio::test]
    async fn test_mismatched_lengths_rejected_without_writes() {
        let harness = Harness::new(vec![]).await;
        let scores = harness.score_store(10);

        let result = scores.update_scores(&ids(&["a", "b"]), &[0.5]).await;
        assert!(matches!(result, Err(ManagingError::InvalidRequest { .. })));
        assert!(scores.all_average_scores().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scores_expire() {
        let harness = Harness::new(vec![]).await;
        let scores = harness.score_store(10);
        scores.update_scores(&ids(&["a"]), &[1.0]).await.unwrap();

        harness.clock.advance(ChronoDuration::seconds(600 * 10 * 2));
        assert_eq!(scores.average_score("a").await.unwrap(), NEUTRAL_SCORE);
        assert!(scores.score_history("a").await.unwrap().is_empty());
    }
}
