//! Configuration resolution for Sentra.
//!
//! Resolution order (lowest to highest priority):
//! 1. Built-in defaults
//! 2. Config file (JSON, `--config` path)
//! 3. Environment variables (`SENTRA_*`)
//! 4. CLI arguments (applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Complete Sentra configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub firmware: FirmwareConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Daemon-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// HTTP listen address.
    pub listen_addr: String,
    /// Path to the SQLite database file.
    pub database_path: Option<PathBuf>,
    pub log_level: String,
    /// Externally reachable base URL, used to absolutise relative firmware
    /// URLs in OTA push messages (e.g. `http://192.168.1.10:8080`).
    pub external_base_url: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            database_path: None,
            log_level: "info".to_string(),
            external_base_url: "http://localhost:8080".to_string(),
        }
    }
}

/// Certificate-authority and secret-store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Directory holding the root and active server key/cert PEM files.
    pub cert_dir: PathBuf,
    /// Master secret the secret-store key is derived from.
    pub master_secret: String,
    /// When true, a failed decrypt returns the stored value unchanged
    /// (compatibility with pre-encryption rows) instead of erroring.
    pub legacy_plaintext_fallback: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            cert_dir: PathBuf::from("data/certs"),
            master_secret: "dev-secret-change-me".to_string(),
            legacy_plaintext_fallback: true,
        }
    }
}

/// Firmware build pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareConfig {
    /// Directory for rendered sources, masked binaries and legacy key files.
    pub firmware_dir: PathBuf,
    /// External compiler command. When absent the compile step is skipped
    /// and the rendered source is distributed as the artifact.
    pub compiler: Option<String>,
    /// Broker hostname embedded into rendered firmware sources.
    pub broker_host: String,
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            firmware_dir: PathBuf::from("data/firmware"),
            compiler: None,
            broker_host: "localhost".to_string(),
        }
    }
}

/// Transport bridge and liveness supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Capacity of the inbound hand-off queue.
    pub queue_capacity: usize,
    /// Per-message handler timeout (seconds).
    pub handler_timeout_secs: u64,
    /// Liveness sweep period (seconds).
    pub sweep_interval_secs: u64,
    /// A device with no traffic for this long is demoted to offline.
    pub offline_after_secs: i64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            handler_timeout_secs: 30,
            sweep_interval_secs: 30,
            // heartbeat interval plus tolerance
            offline_after_secs: 90,
        }
    }
}

/// Load configuration: defaults, optional file, env overrides.
pub fn load_config(config_file: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match config_file {
        Some(path) if path.exists() => load_config_file(path)?,
        _ => Config::default(),
    };

    apply_env_overrides(&mut config);

    Ok(config)
}

fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("SENTRA_LISTEN_ADDR") {
        config.daemon.listen_addr = val;
    }
    if let Ok(val) = std::env::var("SENTRA_DATABASE_PATH") {
        config.daemon.database_path = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("SENTRA_LOG_LEVEL") {
        config.daemon.log_level = val;
    }
    if let Ok(val) = std::env::var("SENTRA_EXTERNAL_BASE_URL") {
        config.daemon.external_base_url = val;
    }
    if let Ok(val) = std::env::var("SENTRA_CERT_DIR") {
        config.identity.cert_dir = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("SENTRA_MASTER_SECRET") {
        config.identity.master_secret = val;
    }
    if let Ok(val) = std::env::var("SENTRA_FIRMWARE_DIR") {
        config.firmware.firmware_dir = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("SENTRA_BROKER_HOST") {
        config.firmware.broker_host = val;
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_offline_threshold_is_90s() {
        let config = Config::default();
        assert_eq!(config.transport.offline_after_secs, 90);
        assert_eq!(config.transport.sweep_interval_secs, 30);
    }

    #[test]
    fn default_legacy_fallback_is_on() {
        let config = Config::default();
        assert!(config.identity.legacy_plaintext_fallback);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/sentra.json"))).unwrap();
        assert_eq!(config.daemon.listen_addr, "0.0.0.0:8080");
    }

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"daemon": {"listen_addr": "127.0.0.1:9090", "database_path": null,
                "log_level": "debug", "external_base_url": "https://ota.example.com"}}"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.daemon.listen_addr, "127.0.0.1:9090");
        assert_eq!(config.daemon.external_base_url, "https://ota.example.com");
        // untouched sections keep defaults
        assert_eq!(config.transport.queue_capacity, 1024);
    }
}
