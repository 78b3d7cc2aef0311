//! Proxy configuration
//!
//! Loaded from an optional TOML file (`--config` / `ATTACH_PROXY_CONFIG`);
//! command-line flags and environment variables override individual fields.
//! Every field has a default, so an empty or missing file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Origin attachment API host
    pub origin_host: String,
    pub origin_port: u16,
    pub listen_host: String,
    pub listen_port: u16,
    /// Largest payload the origin returns per call
    pub origin_max_payload: u64,
    pub origin_timeout_secs: u64,
    /// Attachments larger than this are refused instead of cached
    pub max_object_size: u64,
    /// Chunk length used when a request carries no `Length`
    pub default_chunk_size: u64,
    pub default_max_retries: u32,
    pub cache_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// Directory for the rolling log file
    pub log_dir: PathBuf,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            origin_host: "127.0.0.1".to_string(),
            origin_port: 9000,
            listen_host: "0.0.0.0".to_string(),
            listen_port: 9001,
            origin_max_payload: 64 * 1024,
            origin_timeout_secs: 30,
            max_object_size: 256 * 1024 * 1024,
            default_chunk_size: chunk_dl::DEFAULT_CHUNK_SIZE,
            default_max_retries: chunk_dl::DEFAULT_MAX_RETRIES,
            cache_ttl_secs: 3600,
            sweep_interval_secs: 60,
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl ProxyConfig {
    /// Load from `path`, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(ProxyConfig::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("origin_max_payload", self.origin_max_payload),
            ("origin_timeout_secs", self.origin_timeout_secs),
            ("max_object_size", self.max_object_size),
            ("default_chunk_size", self.default_chunk_size),
            ("cache_ttl_secs", self.cache_ttl_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if self.origin_host.trim().is_empty() {
            return Err(ConfigError::Invalid("origin_host is empty".to_string()));
        }
        Ok(())
    }

    pub fn origin_base_url(&self) -> String {
        format!("http://{}:{}", self.origin_host, self.origin_port)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    pub fn origin_timeout(&self) -> Duration {
        Duration::from_secs(self.origin_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ProxyConfig::from_toml(
            r#"
            origin_port = 9100
            cache_ttl_secs = 120
            "#,
        )
        .unwrap();
        assert_eq!(config.origin_port, 9100);
        assert_eq!(config.cache_ttl(), Duration::from_secs(120));
        assert_eq!(config.listen_port, 9001);
        assert_eq!(config.default_chunk_size, 60_000);
        assert_eq!(config.origin_base_url(), "http://127.0.0.1:9100");
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let config = ProxyConfig {
            origin_max_payload: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("origin_max_payload"));
        assert!(ProxyConfig::default().validate().is_ok());
    }

    #[test]
    fn load_reads_file_and_reports_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.toml");
        std::fs::write(&path, "listen_port = 9500\n").unwrap();
        assert_eq!(ProxyConfig::load(Some(&path)).unwrap().listen_port, 9500);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            ProxyConfig::load(Some(&missing)),
            Err(ConfigError::Io { .. })
        ));
        assert_eq!(ProxyConfig::load(None).unwrap().origin_port, 9000);
    }
}
