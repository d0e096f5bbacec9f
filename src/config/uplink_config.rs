use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::env_vars::expand_path;
use crate::constants::{
    DEFAULT_BASE_URL, DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONCURRENT_BATCHES, DEFAULT_MAX_TO_SEND,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_TRIGGER_INTERVAL_SECS,
};
use crate::trigger::{ConnectivityPolicy, TriggerConfig};
use crate::upload::OrchestratorConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    /// Where capture producers deposit plaintext artifacts.
    pub plaintext_dir: String,
    /// Sealed envelopes and key sidecars awaiting upload.
    pub ciphertext_dir: String,
}

impl Default for QueueSection {
    fn default() -> Self {
        QueueSection {
            plaintext_dir: "$HOME/.local/share/research-uplink/plain".to_string(),
            ciphertext_dir: "$HOME/.local/share/research-uplink/encrypt".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySection {
    pub identity_path: String,
    pub key_path: String,
}

impl Default for IdentitySection {
    fn default() -> Self {
        IdentitySection {
            identity_path: "$HOME/.config/research-uplink/identity.json".to_string(),
            key_path: "$HOME/.config/research-uplink/identity_key.pem".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub batch_size: usize,
    /// Per-cycle cap on envelopes; 0 means no cap.
    pub max_to_send: usize,
    pub max_concurrent_batches: usize,
    pub connectivity: ConnectivityPolicy,
}

impl Default for UploadSection {
    fn default() -> Self {
        UploadSection {
            batch_size: DEFAULT_BATCH_SIZE,
            max_to_send: DEFAULT_MAX_TO_SEND,
            max_concurrent_batches: DEFAULT_MAX_CONCURRENT_BATCHES,
            connectivity: ConnectivityPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSection {
    pub interval_secs: u64,
    pub run_on_start: bool,
}

impl Default for TriggerSection {
    fn default() -> Self {
        TriggerSection {
            interval_secs: DEFAULT_TRIGGER_INTERVAL_SECS,
            run_on_start: false,
        }
    }
}

/// Everything the uplink reads from its YAML configuration file.
///
/// Missing sections and fields take their defaults, so a file only needs to
/// mention what it changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    pub queue: QueueSection,
    pub identity: IdentitySection,
    pub server: ServerSection,
    pub upload: UploadSection,
    pub trigger: TriggerSection,
}

impl UplinkConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: UplinkConfig =
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
        config
            .validate()
            .context(format!("Invalid configuration in {}", path.display()))?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a YAML file, creating parent directories.
    pub fn save_to_yaml_file(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create {}", parent.display()))?;
            }
        }
        fs::write(path, yaml).context(format!("Failed to write config to {}", path.display()))?;

        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload.batch_size == 0 {
            bail!("upload.batch_size must be at least 1");
        }
        if self.upload.max_concurrent_batches == 0 {
            bail!("upload.max_concurrent_batches must be at least 1");
        }
        if self.server.request_timeout_secs == 0 {
            bail!("server.request_timeout_secs must be at least 1");
        }
        if self.trigger.interval_secs == 0 {
            bail!("trigger.interval_secs must be at least 1");
        }
        let url = reqwest::Url::parse(&self.server.base_url)
            .context(format!("server.base_url is not a URL: {}", self.server.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("server.base_url must be http or https, got {}", url.scheme());
        }
        Ok(())
    }

    pub fn plaintext_dir(&self) -> PathBuf {
        expand_path(&self.queue.plaintext_dir)
    }

    pub fn ciphertext_dir(&self) -> PathBuf {
        expand_path(&self.queue.ciphertext_dir)
    }

    pub fn identity_path(&self) -> PathBuf {
        expand_path(&self.identity.identity_path)
    }

    pub fn key_path(&self) -> PathBuf {
        expand_path(&self.identity.key_path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            batch_size: self.upload.batch_size,
            max_to_send: self.upload.max_to_send,
            max_concurrent_batches: self.upload.max_concurrent_batches,
        }
    }

    pub fn trigger_config(&self) -> TriggerConfig {
        TriggerConfig {
            interval: Duration::from_secs(self.trigger.interval_secs),
            run_on_start: self.trigger.run_on_start,
        }
    }
}

/// Load the configuration at `config_path`, writing the defaults there first
/// if the file does not exist. Without a path the built-in defaults are used.
pub fn load_or_create_config(config_path: Option<&Path>) -> Result<UplinkConfig> {
    match config_path {
        Some(path) if path.exists() => UplinkConfig::from_yaml_file(path),
        Some(path) => {
            info!("No configuration at {}, creating defaults", path.display());
            let config = UplinkConfig::default();
            config.save_to_yaml_file(path)?;
            Ok(config)
        }
        None => {
            debug!("No configuration path given, using defaults");
            Ok(UplinkConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = UplinkConfig::default();
        assert_eq!(config.upload.batch_size, 10);
        assert_eq!(config.upload.max_to_send, 0);
        assert_eq!(config.upload.max_concurrent_batches, 10);
        assert_eq!(config.server.request_timeout_secs, 1200);
        assert_eq!(config.trigger.interval_secs, 12 * 3600);
        assert_eq!(config.upload.connectivity, ConnectivityPolicy::WifiOnly);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("uplink.yaml");
        fs::write(
            &path,
            "upload:\n  batch_size: 4\n  connectivity: allow_metered\nserver:\n  base_url: http://localhost:8080\n",
        )
        .unwrap();

        let config = UplinkConfig::from_yaml_file(&path).unwrap();

        assert_eq!(config.upload.batch_size, 4);
        assert_eq!(config.upload.max_concurrent_batches, 10);
        assert_eq!(config.upload.connectivity, ConnectivityPolicy::AllowMetered);
        assert_eq!(config.server.base_url, "http://localhost:8080");
        assert_eq!(config.server.request_timeout_secs, 1200);
        assert_eq!(config.trigger, TriggerSection::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("uplink.yaml");

        fs::write(&path, "upload:\n  batch_size: 0\n").unwrap();
        let err = UplinkConfig::from_yaml_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("batch_size"));

        fs::write(&path, "server:\n  base_url: ftp://example.org\n").unwrap();
        assert!(UplinkConfig::from_yaml_file(&path).is_err());
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/uplink.yaml");

        let created = load_or_create_config(Some(&path)).unwrap();
        assert!(path.exists());

        let loaded = load_or_create_config(Some(&path)).unwrap();
        assert_eq!(created, loaded);
    }

    #[test]
    fn test_paths_expand_environment() {
        std::env::set_var("UPLINK_CFG_TEST_ROOT", "/data/uplink");
        let mut config = UplinkConfig::default();
        config.queue.ciphertext_dir = "${UPLINK_CFG_TEST_ROOT}/encrypt".into();

        assert_eq!(config.ciphertext_dir(), PathBuf::from("/data/uplink/encrypt"));
        std::env::remove_var("UPLINK_CFG_TEST_ROOT");
    }

    #[test]
    fn test_derived_runtime_configs() {
        let mut config = UplinkConfig::default();
        config.upload.batch_size = 3;
        config.trigger.run_on_start = true;

        assert_eq!(config.orchestrator_config().batch_size, 3);
        assert!(config.trigger_config().run_on_start);
        assert_eq!(config.request_timeout(), Duration::from_secs(1200));
    }
}
