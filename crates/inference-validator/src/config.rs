//! Configuration for the validator

use inference_common::config::{
    generate_example, load_config, HttpServiceConfig, MetricsConfig, StoreConfig, WalletConfig,
};
use inference_common::protocol::Challenge;
use inference_common::{ConfigValidation, ConfigurationError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const SERVICE_NAME: &str = "inference-validator";
pub const ENV_PREFIX: &str = "INFERENCE_VALIDATOR_";

/// Round scheduling and fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    pub round_interval_secs: u64,
    /// Miners requested from the managing service per round
    pub batch_size: usize,
    /// Fraction of the epoch allotment one round may spend per miner
    pub rate_limit_threshold: f64,
    pub top_score: f64,
    /// Timeout of each miner request
    pub miner_timeout_secs: u64,
    /// Concurrent scoring calls across all rounds of the process
    pub scoring_concurrency: usize,
    pub challenges: Vec<Challenge>,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            round_interval_secs: 12,
            batch_size: 8,
            rate_limit_threshold: 0.8,
            top_score: 1.0,
            miner_timeout_secs: 12,
            scoring_concurrency: 4,
            challenges: Challenge::ALL.to_vec(),
        }
    }
}

impl OrchestrationConfig {
    pub fn round_interval(&self) -> Duration {
        Duration::from_secs(self.round_interval_secs)
    }

    pub fn miner_timeout(&self) -> Duration {
        Duration::from_secs(self.miner_timeout_secs)
    }
}

/// Caps how often one miner may be scored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWindowConfig {
    pub max_scores_per_period: u32,
    pub period_secs: u64,
    pub key_prefix: String,
}

impl Default for ScoreWindowConfig {
    fn default() -> Self {
        Self {
            max_scores_per_period: 4,
            period_secs: 600,
            key_prefix: "score_tracking:".to_string(),
        }
    }
}

impl ScoreWindowConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub wallet: WalletConfig,
    pub store: StoreConfig,
    pub managing: HttpServiceConfig,
    pub payload: HttpServiceConfig,
    pub scoring: HttpServiceConfig,
    pub orchestration: OrchestrationConfig,
    pub score_window: ScoreWindowConfig,
    pub metrics: MetricsConfig,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            wallet: WalletConfig::default(),
            store: StoreConfig::default(),
            managing: HttpServiceConfig::new("http://127.0.0.1:8000", 10),
            payload: HttpServiceConfig::new("http://127.0.0.1:8100", 10),
            scoring: HttpServiceConfig::new("http://127.0.0.1:8200", 30),
            orchestration: OrchestrationConfig::default(),
            score_window: ScoreWindowConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl ValidatorConfig {
    pub fn load(path_override: Option<&Path>) -> Result<Self, ConfigurationError> {
        load_config(SERVICE_NAME, ENV_PREFIX, path_override)
    }

    pub fn generate_example() -> Result<String, ConfigurationError> {
        generate_example::<Self>()
    }
}

impl ConfigValidation for ValidatorConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        self.managing.validate("managing")?;
        self.payload.validate("payload")?;
        self.scoring.validate("scoring")?;

        let orchestration = &self.orchestration;
        if orchestration.batch_size == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: "orchestration.batch_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let threshold = orchestration.rate_limit_threshold;
        if !threshold.is_finite() || threshold <= 0.0 || threshold > 1.0 {
            return Err(ConfigurationError::InvalidValue {
                key: "orchestration.rate_limit_threshold".to_string(),
                reason: format!("must be in (0, 1], got {threshold}"),
            });
        }
        if !(0.0..=1.0).contains(&orchestration.top_score) {
            return Err(ConfigurationError::InvalidValue {
                key: "orchestration.top_score".to_string(),
                reason: format!("must be in [0, 1], got {}", orchestration.top_score),
            });
        }
        if orchestration.scoring_concurrency == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: "orchestration.scoring_concurrency".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if orchestration.challenges.is_empty() {
            return Err(ConfigurationError::MissingValue {
                key: "orchestration.challenges".to_string(),
            });
        }
        if orchestration.round_interval_secs == 0 || orchestration.miner_timeout_secs == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: "orchestration".to_string(),
                reason: "round_interval_secs and miner_timeout_secs must be greater than zero"
                    .to_string(),
            });
        }
        if self.score_window.period_secs == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: "score_window.period_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.score_window.max_scores_per_period == 0 {
            warnings.push(
                "score_window.max_scores_per_period is 0; no responses will ever be scored"
                    .to_string(),
            );
        }
        if self.orchestration.top_score == 0.0 {
            warnings.push(
                "orchestration.top_score is 0; the managing service will return no miners"
                    .to_string(),
            );
        }
        if self.orchestration.miner_timeout_secs > self.orchestration.round_interval_secs {
            warnings.push(format!(
                "orchestration.miner_timeout_secs ({}) exceeds round_interval_secs ({}); rounds will overlap",
                self.orchestration.miner_timeout_secs, self.orchestration.round_interval_secs
            ));
        }
        warnings
    }
}
