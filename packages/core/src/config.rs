// keyvault-sync Configuration Module
//
// This module handles loading and validating the optional keyvault-sync.yaml

use crate::fanout::DEFAULT_MAX_CONCURRENCY;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-directory configuration file
pub const CONFIG_FILE_NAME: &str = "keyvault-sync.yaml";

/// Azure cloud endpoints (public cloud by default)
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CloudConfig {
    /// Azure Resource Manager endpoint
    pub management_endpoint: String,

    /// Token scope for the Key Vault data plane
    pub vault_scope: String,

    /// Microsoft Entra ID authority host
    pub login_endpoint: String,

    /// DNS suffix appended to bare vault names
    pub vault_dns_suffix: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            management_endpoint: "https://management.azure.com".to_string(),
            vault_scope: "https://vault.azure.net".to_string(),
            login_endpoint: "https://login.microsoftonline.com".to_string(),
            vault_dns_suffix: "vault.azure.net".to_string(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Upper bound on concurrent remote operations
    pub max_concurrency: usize,

    /// Per-request HTTP timeout in seconds
    pub request_timeout_secs: u64,

    /// Cloud endpoints
    pub cloud: CloudConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            request_timeout_secs: 30,
            cloud: CloudConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;

        Ok(config)
    }

    /// Load configuration.
    ///
    /// # Lookup Order
    ///
    /// 1. `explicit` path (must exist)
    /// 2. `keyvault-sync.yaml` in the current directory
    /// 3. `~/.config/keyvault-sync/config.yaml`
    /// 4. Built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        match Self::discover() {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Find the first configuration file that exists.
    pub fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }

        global_config_path().filter(|path| path.exists())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            anyhow::bail!("max_concurrency must be at least 1");
        }

        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be at least 1");
        }

        let endpoints = [
            ("management_endpoint", &self.cloud.management_endpoint),
            ("vault_scope", &self.cloud.vault_scope),
            ("login_endpoint", &self.cloud.login_endpoint),
        ];
        for (name, value) in endpoints {
            if !value.starts_with("https://") {
                anyhow::bail!("cloud.{} must be an https URL, got '{}'", name, value);
            }
        }

        if self.cloud.vault_dns_suffix.trim_matches('.').is_empty() {
            anyhow::bail!("cloud.vault_dns_suffix cannot be empty");
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// `~/.config/keyvault-sync/config.yaml`
pub fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("keyvault-sync").join("config.yaml"))
}
