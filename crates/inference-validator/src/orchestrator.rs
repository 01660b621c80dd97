//! # Validator Orchestrator
//!
//! One round of the protocol:
//!
//! 1. pick a challenge and fetch its payload
//! 2. ask the managing service for a batch of miners
//! 3. dispatch the payload to every miner concurrently
//! 4. report a zero score for every miss
//! 5. gate the remaining responses through the score tracking window
//! 6. score the admitted responses in one call behind the shared scoring gate
//! 7. report those scores back to the managing service
//!
//! Per miner: `Selected -> Dispatched -> Miss | Responded`, then
//! `Responded -> WindowDropped | Scored`.

use crate::clients::{ManagingClient, MinerClient, MinerMiss, PayloadClient, ScoringClient};
use crate::config::OrchestrationConfig;
use crate::metrics;
use crate::window::ScoreTrackingWindow;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use inference_common::protocol::{Challenge, ChallengeResponse, ConsumeRequest};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Terminal state of one miner within a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MinerOutcome {
    /// No usable response; a zero score was reported
    Miss { reason: String },
    /// Responded, but the miner was already scored enough this period
    WindowDropped,
    Scored { score: f64 },
}

impl MinerOutcome {
    fn label(&self) -> &'static str {
        match self {
            MinerOutcome::Miss { .. } => "miss",
            MinerOutcome::WindowDropped => "window_dropped",
            MinerOutcome::Scored { .. } => "scored",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinerReport {
    pub identity: String,
    pub uid: Option<u16>,
    #[serde(flatten)]
    pub outcome: MinerOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    pub challenge: Challenge,
    pub started_at: DateTime<Utc>,
    /// False when the managing service had no miner capacity for us
    pub capacity_available: bool,
    pub miners: Vec<MinerReport>,
}

impl RoundReport {
    pub fn count(&self, label: &str) -> usize {
        self.miners
            .iter()
            .filter(|miner| miner.outcome.label() == label)
            .count()
    }
}

/// External services a round talks to
pub struct RoundClients {
    pub managing: ManagingClient,
    pub payloads: PayloadClient,
    pub scoring: ScoringClient,
    pub miners: MinerClient,
}

pub struct Orchestrator {
    config: OrchestrationConfig,
    clients: RoundClients,
    window: ScoreTrackingWindow,
    /// Shared by every round of this process
    scoring_gate: Arc<Semaphore>,
}

struct Responded {
    index: usize,
    response: ChallengeResponse,
}

impl Orchestrator {
    pub fn new(
        config: OrchestrationConfig,
        clients: RoundClients,
        window: ScoreTrackingWindow,
    ) -> Self {
        let scoring_gate = Arc::new(Semaphore::new(config.scoring_concurrency.max(1)));
        Self {
            config,
            clients,
            window,
            scoring_gate,
        }
    }

    pub fn identity(&self) -> &str {
        self.clients.miners.identity()
    }

    fn pick_challenge(&self) -> Result<Challenge> {
        let mut rng = rand::thread_rng();
        self.config
            .challenges
            .choose(&mut rng)
            .copied()
            .context("No challenges configured")
    }

    /// Run one full round
    pub async fn run_round(&self) -> Result<RoundReport> {
        let started = Instant::now();
        let result = self.round().await;
        let label = match &result {
            Ok(report) if !report.capacity_available => "no_capacity",
            Ok(_) => "completed",
            Err(_) => "failed",
        };
        metrics::record_round(started.elapsed(), label);
        result
    }

    async fn round(&self) -> Result<RoundReport> {
        let started_at = Utc::now();
        let challenge = self.pick_challenge()?;
        let payload = self
            .clients
            .payloads
            .get_payload(challenge)
            .await
            .context("Failed to get challenge payload")?;
        info!("Challenge: {}, route: {}", challenge, challenge.api_route());

        let request = ConsumeRequest {
            validator_identity: self.identity().to_string(),
            miner_identity: None,
            rate_limit_threshold: self.config.rate_limit_threshold,
            sample_size: self.config.batch_size,
            top_score: self.config.top_score,
        };
        let Some(batch) = self
            .clients
            .managing
            .consume(&request)
            .await
            .context("Failed to get miner batch")?
        else {
            info!("No miner capacity available this round");
            return Ok(RoundReport {
                challenge,
                started_at,
                capacity_available: false,
                miners: Vec::new(),
            });
        };

        let dispatches = batch.miners().map(|(identity, address)| {
            self.clients.miners.forward(identity, address, &payload)
        });
        let results = join_all(dispatches).await;

        let mut outcomes: Vec<Option<MinerOutcome>> = vec![None; results.len()];
        let mut responded = Vec::new();
        let mut missed = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(response) => responded.push(Responded { index, response }),
                Err(miss) => {
                    debug!(
                        miner = %batch.miner_identities[index],
                        "Miner missed: {}",
                        miss
                    );
                    missed.push(index);
                    outcomes[index] = Some(miss_outcome(miss));
                }
            }
        }

        if !missed.is_empty() {
            let miners: Vec<String> = missed
                .iter()
                .map(|&i| batch.miner_identities[i].clone())
                .collect();
            info!("Reporting zero scores for {} missed miners", miners.len());
            let zeros = vec![0.0; miners.len()];
            if let Err(e) = self.clients.managing.update_scores(miners, zeros).await {
                error!("Failed to report zero scores: {:#}", e);
            }
        }

        let mut eligible = Vec::new();
        for entry in responded {
            let miner = &batch.miner_identities[entry.index];
            let admitted = match self.window.try_admit(miner).await {
                Ok(admitted) => admitted,
                Err(e) => {
                    warn!(miner = %miner, "Score window check failed, dropping: {}", e);
                    false
                }
            };
            if admitted {
                eligible.push(entry);
            } else {
                outcomes[entry.index] = Some(MinerOutcome::WindowDropped);
            }
        }

        let dropped = outcomes
            .iter()
            .filter(|o| matches!(o, Some(MinerOutcome::WindowDropped)))
            .count();
        if dropped > 0 {
            info!("Dropping {} miners due to scoring rate limits", dropped);
        }

        if !eligible.is_empty() {
            let responses: Vec<ChallengeResponse> =
                eligible.iter().map(|entry| entry.response).collect();

            let scores = {
                let _permit = self
                    .scoring_gate
                    .acquire()
                    .await
                    .context("Scoring gate closed")?;
                self.clients
                    .scoring
                    .score(&payload, &responses)
                    .await
                    .context("Failed to score miner responses")?
            };

            let miners: Vec<String> = eligible
                .iter()
                .map(|entry| batch.miner_identities[entry.index].clone())
                .collect();
            for (entry, score) in eligible.iter().zip(&scores) {
                outcomes[entry.index] = Some(MinerOutcome::Scored { score: *score });
            }

            info!("Reporting scores for {} miners", miners.len());
            self.clients
                .managing
                .update_scores(miners, scores)
                .await
                .context("Failed to report scores")?;
        }

        let miners: Vec<MinerReport> = batch
            .miner_identities
            .iter()
            .zip(outcomes)
            .enumerate()
            .filter_map(|(i, (identity, outcome))| {
                let outcome = outcome?;
                metrics::record_miner_outcome(outcome.label());
                Some(MinerReport {
                    identity: identity.clone(),
                    uid: batch.uids.get(i).copied().flatten(),
                    outcome,
                })
            })
            .collect();

        Ok(RoundReport {
            challenge,
            started_at,
            capacity_available: true,
            miners,
        })
    }

    /// Start a round every `round_interval`; rounds may overlap
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.round_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "Starting orchestration loop every {}s as {}",
            self.config.round_interval_secs,
            self.identity()
        );

        loop {
            interval.tick().await;
            let orchestrator = self.clone();
            tokio::spawn(async move {
                match orchestrator.run_round().await {
                    Ok(report) => debug!(
                        "Round finished: {} scored, {} missed, {} dropped",
                        report.count("scored"),
                        report.count("miss"),
                        report.count("window_dropped")
                    ),
                    Err(e) => error!("Orchestration round failed: {:#}", e),
                }
            });
        }
    }
}

fn miss_outcome(miss: MinerMiss) -> MinerOutcome {
    MinerOutcome::Miss {
        reason: miss.to_string(),
    }
}
