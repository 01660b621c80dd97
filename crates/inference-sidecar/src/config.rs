//! Configuration for the membership sidecar

use inference_common::config::{
    generate_example, load_config, ServerConfig, StoreConfig, WalletConfig,
};
use inference_common::{ConfigValidation, ConfigurationError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SERVICE_NAME: &str = "inference-sidecar";
pub const ENV_PREFIX: &str = "INFERENCE_SIDECAR_";

/// Where the raw metagraph comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LedgerSourceConfig {
    /// Ledger gateway answering `GET {endpoint}/metagraph/{netuid}`
    Http {
        endpoint: String,
        request_timeout_secs: u64,
    },
    /// JSON document on disk, re-read on every sync
    File { path: PathBuf },
}

impl Default for LedgerSourceConfig {
    fn default() -> Self {
        LedgerSourceConfig::Http {
            endpoint: "http://127.0.0.1:9944".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub netuid: u16,
    pub sync_interval_secs: u64,
    pub source: LedgerSourceConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            netuid: 47,
            sync_interval_secs: 600,
            source: LedgerSourceConfig::default(),
        }
    }
}

impl LedgerConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Lifetime of a written snapshot
    pub fn snapshot_ttl(&self) -> Duration {
        self.sync_interval() * 3
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarConfig {
    pub wallet: WalletConfig,
    pub store: StoreConfig,
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            wallet: WalletConfig::default(),
            store: StoreConfig::default(),
            server: ServerConfig::on_port(9001),
            ledger: LedgerConfig::default(),
        }
    }
}

impl SidecarConfig {
    pub fn load(path_override: Option<&Path>) -> Result<Self, ConfigurationError> {
        load_config(SERVICE_NAME, ENV_PREFIX, path_override)
    }

    pub fn generate_example() -> Result<String, ConfigurationError> {
        generate_example::<Self>()
    }
}

impl ConfigValidation for SidecarConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.ledger.sync_interval_secs == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: "ledger.sync_interval_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        match &self.ledger.source {
            LedgerSourceConfig::Http {
                endpoint,
                request_timeout_secs,
            } => {
                if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                    return Err(ConfigurationError::InvalidValue {
                        key: "ledger.source.endpoint".to_string(),
                        reason: format!("{endpoint:?} is not an http(s) URL"),
                    });
                }
                if *request_timeout_secs == 0 {
                    return Err(ConfigurationError::InvalidValue {
                        key: "ledger.source.request_timeout_secs".to_string(),
                        reason: "must be greater than zero".to_string(),
                    });
                }
            }
            LedgerSourceConfig::File { path } => {
                if path.as_os_str().is_empty() {
                    return Err(ConfigurationError::MissingValue {
                        key: "ledger.source.path".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let LedgerSourceConfig::File { path } = &self.ledger.source {
            if !path.exists() {
                warnings.push(format!(
                    "ledger.source.path {} does not exist yet; syncs fail until it does",
                    path.display()
                ));
            }
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SidecarConfig::default();
        assert_eq!(config.ledger.netuid, 47);
        assert_eq!(config.ledger.snapshot_ttl(), Duration::from_secs(1800));
        assert_eq!(config.server.bind_address.port(), 9001);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_source_from_toml() {
        let text = r#"
            [ledger]
            netuid = 3
            sync_interval_secs = 60

            [ledger.source]
            kind = "file"
            path = "/tmp/metagraph.json"
        "#;
        #[derive(Deserialize)]
        struct Partial {
            ledger: LedgerConfig,
        }
        let Partial { ledger } = toml::from_str(text).unwrap();
        assert_eq!(ledger.netuid, 3);
        assert_eq!(
            ledger.source,
            LedgerSourceConfig::File {
                path: PathBuf::from("/tmp/metagraph.json")
            }
        );
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        let mut config = SidecarConfig::default();
        config.ledger.source = LedgerSourceConfig::Http {
            endpoint: "ws://ledger".to_string(),
            request_timeout_secs: 10,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_parses() {
        let text = SidecarConfig::generate_example().unwrap();
        assert!(text.contains("kind = \"http\""));
        let parsed: SidecarConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.ledger.source, LedgerSourceConfig::default());
    }
}
