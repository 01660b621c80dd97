//! Configuration loading and the sections shared by every service
//!
//! Each service config is layered with figment: serialized defaults, then an
//! optional TOML file, then `INFERENCE_<SERVICE>_` environment variables using
//! `__` as the nesting separator.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to parse configuration: {details}")]
    ParseError { details: String },

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Missing required value: {key}")]
    MissingValue { key: String },
}

/// Semantic checks run after a config has been parsed
pub trait ConfigValidation {
    /// Hard errors that must stop startup
    fn validate(&self) -> Result<(), ConfigurationError>;

    /// Soft issues worth logging
    fn warnings(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Load `T` from defaults, an optional file and the environment
///
/// When `path_override` is `None`, `<service>.toml` in the working directory
/// is used if it exists.
pub fn load_config<T>(
    service: &str,
    env_prefix: &str,
    path_override: Option<&Path>,
) -> Result<T, ConfigurationError>
where
    T: Serialize + DeserializeOwned + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    match path_override {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigurationError::ParseError {
                    details: format!("Configuration file not found: {}", path.display()),
                });
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            let default_path = PathBuf::from(format!("{service}.toml"));
            if default_path.exists() {
                figment = figment.merge(Toml::file(default_path));
            }
        }
    }

    figment = figment.merge(Env::prefixed(env_prefix).split("__"));

    figment.extract().map_err(|e| ConfigurationError::ParseError {
        details: e.to_string(),
    })
}

/// Default configuration rendered as TOML
pub fn generate_example<T>() -> Result<String, ConfigurationError>
where
    T: Serialize + Default,
{
    toml::to_string_pretty(&T::default()).map_err(|e| ConfigurationError::ParseError {
        details: format!("Failed to serialize config: {e}"),
    })
}

/// Run [`ConfigValidation`] checks and log any warnings
pub fn validate_config<T: ConfigValidation>(config: &T) -> Result<(), ConfigurationError> {
    config.validate()?;
    for warning in config.warnings() {
        tracing::warn!("Configuration warning: {}", warning);
    }
    Ok(())
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn on_port(port: u16) -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], port)),
            request_timeout_secs: 30,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::on_port(8000)
    }
}

/// Shared state store location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite URL or path, e.g. `sqlite:inference-state.db`
    pub url: String,
    pub max_connections: u32,
    /// How often expired rows are deleted
    pub purge_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:inference-state.db".to_string(),
            max_connections: 5,
            purge_interval_secs: 300,
        }
    }
}

impl StoreConfig {
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

/// A remote HTTP collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpServiceConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl HttpServiceConfig {
    pub fn new(base_url: impl Into<String>, request_timeout_secs: u64) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout_secs,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self, key: &str) -> Result<(), ConfigurationError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigurationError::InvalidValue {
                key: format!("{key}.base_url"),
                reason: format!("must be an http(s) URL, got {:?}", self.base_url),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: format!("{key}.request_timeout_secs"),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Location of the local wallet key file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    pub key_file: PathBuf,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            key_file: PathBuf::from("wallet.json"),
        }
    }
}

/// Prometheus exporter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind_address: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: SocketAddr::from(([0, 0, 0, 0], 9091)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        server: ServerConfig,
        store: StoreConfig,
    }

    impl Default for Sample {
        fn default() -> Self {
            Self {
                name: "default".to_string(),
                server: ServerConfig::default(),
                store: StoreConfig::default(),
            }
        }
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"from-file\"\n[server]\nrequest_timeout_secs = 5").unwrap();

        let loaded: Sample =
            load_config("sample", "INFERENCE_SAMPLE_TEST_", Some(file.path())).unwrap();
        assert_eq!(loaded.name, "from-file");
        assert_eq!(loaded.server.request_timeout(), Duration::from_secs(5));
        assert_eq!(loaded.server.bind_address.port(), 8000);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result: Result<Sample, _> = load_config(
            "sample",
            "INFERENCE_SAMPLE_TEST_",
            Some(Path::new("/definitely/not/here.toml")),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_generate_example_round_trips() {
        let text = generate_example::<Sample>().unwrap();
        let parsed: Sample = toml::from_str(&text).unwrap();
        assert_eq!(parsed, Sample::default());
    }

    #[test]
    fn test_http_service_validation() {
        assert!(HttpServiceConfig::new("http://localhost:1", 5)
            .validate("x")
            .is_ok());
        assert!(HttpServiceConfig::new("localhost:1", 5).validate("x").is_err());
        assert!(HttpServiceConfig::new("http://localhost:1", 0)
            .validate("x")
            .is_err());
    }
}
