//! Configuration for the managing service

use inference_common::config::{
    generate_example, load_config, HttpServiceConfig, MetricsConfig, ServerConfig, StoreConfig,
};
use inference_common::{ConfigValidation, ConfigurationError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const SERVICE_NAME: &str = "inference-managing";
pub const ENV_PREFIX: &str = "INFERENCE_MANAGING_";

/// Membership snapshot caching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipConfig {
    /// Snapshot age after which readers trigger a refresh
    pub cache_ttl_secs: u64,
    /// Oldest snapshot still served when the sidecar is unreachable
    pub max_staleness_secs: u64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 600,
            max_staleness_secs: 1800,
        }
    }
}

/// Per-validator request quotas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub epoch_interval_secs: u64,
    /// Minimum total stake for a validator to receive an allotment
    pub min_stake: f64,
    /// Requests per epoch shared by all eligible validators
    pub max_requests: i64,
    pub refresh_interval_secs: u64,
    /// Allotment when none can be computed is `max_requests / degraded_divisor`
    pub degraded_divisor: i64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            epoch_interval_secs: 600,
            min_stake: 1000.0,
            max_requests: 256,
            refresh_interval_secs: 600,
            degraded_divisor: 100,
        }
    }
}

impl QuotaConfig {
    pub fn epoch_interval(&self) -> Duration {
        Duration::from_secs(self.epoch_interval_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Score history retention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreConfig {
    /// History capacity, also the averaging denominator
    pub history_len: usize,
    /// History lifetime in multiples of `epoch_interval * history_len`
    pub ttl_factor: u32,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            history_len: 10,
            ttl_factor: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagingConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub sidecar: HttpServiceConfig,
    pub membership: MembershipConfig,
    pub quota: QuotaConfig,
    pub scores: ScoreConfig,
    pub metrics: MetricsConfig,
}

impl Default for ManagingConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            sidecar: HttpServiceConfig::new("http://127.0.0.1:9001", 10),
            membership: MembershipConfig::default(),
            quota: QuotaConfig::default(),
            scores: ScoreConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl ManagingConfig {
    pub fn load(path_override: Option<&Path>) -> Result<Self, ConfigurationError> {
        load_config(SERVICE_NAME, ENV_PREFIX, path_override)
    }

    pub fn generate_example() -> Result<String, ConfigurationError> {
        generate_example::<Self>()
    }

    /// Lifetime of score history and averages
    pub fn score_ttl(&self) -> Duration {
        let secs = self
            .quota
            .epoch_interval_secs
            .saturating_mul(self.scores.history_len as u64)
            .saturating_mul(u64::from(self.scores.ttl_factor));
        Duration::from_secs(secs)
    }
}

impl ConfigValidation for ManagingConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        self.sidecar.validate("sidecar")?;

        let positive = [
            ("quota.epoch_interval_secs", self.quota.epoch_interval_secs),
            ("quota.refresh_interval_secs", self.quota.refresh_interval_secs),
            ("membership.cache_ttl_secs", self.membership.cache_ttl_secs),
            ("store.purge_interval_secs", self.store.purge_interval_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigurationError::InvalidValue {
                    key: key.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.quota.max_requests < 1 {
            return Err(ConfigurationError::InvalidValue {
                key: "quota.max_requests".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.quota.degraded_divisor < 1 {
            return Err(ConfigurationError::InvalidValue {
                key: "quota.degraded_divisor".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if !self.quota.min_stake.is_finite() || self.quota.min_stake < 0.0 {
            return Err(ConfigurationError::InvalidValue {
                key: "quota.min_stake".to_string(),
                reason: "must be a non-negative number".to_string(),
            });
        }
        if self.scores.history_len == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: "scores.history_len".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.membership.max_staleness_secs < self.membership.cache_ttl_secs {
            warnings.push(format!(
                "membership.max_staleness_secs ({}) is below cache_ttl_secs ({}); the ttl is used instead",
                self.membership.max_staleness_secs, self.membership.cache_ttl_secs
            ));
        }
        if self.quota.refresh_interval_secs > self.quota.epoch_interval_secs {
            warnings.push(
                "quota.refresh_interval_secs exceeds the epoch interval; allotments lag stake changes"
                    .to_string(),
            );
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ManagingConfig::default();
        assert_eq!(config.server.bind_address.port(), 8000);
        assert_eq!(config.quota.max_requests, 256);
        assert_eq!(config.scores.history_len, 10);
        assert!(config.validate().is_ok());
        assert!(config.warnings().is_empty());
    }

    #[test]
    fn test_score_ttl() {
        let config = ManagingConfig::default();
        assert_eq!(config.score_ttl(), Duration::from_secs(600 * 10 * 2));
    }

    #[test]
    fn test_rejects_zero_history() {
        let mut config = ManagingConfig::default();
        config.scores.history_len = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let text = ManagingConfig::generate_example().unwrap();
        let parsed: ManagingConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.quota.epoch_interval_secs, 600);
        assert_eq!(parsed.sidecar.base_url, "http://127.0.0.1:9001");
    }
}
