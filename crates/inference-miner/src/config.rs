//! Configuration for the miner

use inference_common::auth::DEFAULT_FRESHNESS_SECS;
use inference_common::config::{generate_example, load_config, ServerConfig, WalletConfig};
use inference_common::{ConfigValidation, ConfigurationError};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SERVICE_NAME: &str = "inference-miner";
pub const ENV_PREFIX: &str = "INFERENCE_MINER_";

/// Signed-request verification policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Maximum nonce age and forward clock skew
    pub freshness_secs: i64,
    /// Validator identities allowed to call; empty allows any signed caller
    pub allowed_validators: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            freshness_secs: DEFAULT_FRESHNESS_SECS,
            allowed_validators: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerConfig {
    pub wallet: WalletConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            wallet: WalletConfig::default(),
            server: ServerConfig::on_port(8091),
            auth: AuthConfig::default(),
        }
    }
}

impl MinerConfig {
    pub fn load(path_override: Option<&Path>) -> Result<Self, ConfigurationError> {
        load_config(SERVICE_NAME, ENV_PREFIX, path_override)
    }

    pub fn generate_example() -> Result<String, ConfigurationError> {
        generate_example::<Self>()
    }
}

impl ConfigValidation for MinerConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.auth.freshness_secs <= 0 {
            return Err(ConfigurationError::InvalidValue {
                key: "auth.freshness_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if let Some(bad) = self
            .auth
            .allowed_validators
            .iter()
            .find(|id| inference_common::identity::parse_identity(id).is_err())
        {
            return Err(ConfigurationError::InvalidValue {
                key: "auth.allowed_validators".to_string(),
                reason: format!("{bad:?} is not a valid identity"),
            });
        }
        Ok(())
    }

    fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.auth.allowed_validators.is_empty() {
            warnings.push(
                "auth.allowed_validators is empty; any correctly signed caller is accepted"
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
    fn test_defaults() {
        let config = MinerConfig::default();
        assert_eq!(config.server.bind_address.port(), 8091);
        assert_eq!(config.auth.freshness_secs, 32);
        assert!(config.validate().is_ok());
        assert_eq!(config.warnings().len(), 1);
    }

    #[test]
    fn test_rejects_malformed_allow_list() {
        let mut config = MinerConfig::default();
        config.auth.allowed_validators = vec!["not-hex".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_parses() {
        let text = MinerConfig::generate_example().unwrap();
        let parsed: MinerConfig = toml::from_str(&text).unwrap();
        assert!(parsed.auth.allowed_validators.is_empty());
    }
}
