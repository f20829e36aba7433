//! Client configuration management.
//!
//! This module handles loading and saving the client configuration: backend
//! origin, application surface, credential storage medium, and timeouts.
//!
//! Configuration is stored at `~/.config/authline/config.json`. Environment
//! variables (`AUTHLINE_BASE_URL`, `AUTHLINE_SURFACE`, `AUTHLINE_STORAGE`,
//! `AUTHLINE_STORAGE_DIR`) override the file.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::pipeline::{PipelineConfig, DEFAULT_RENEW_TIMEOUT_SECS};
use crate::api::transport::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::storage::{
    EncryptedFileBackend, FileBackend, KeyringBackend, MemoryBackend, StorageBackend, Surface,
};

/// Application name used for config/storage directory paths
const APP_NAME: &str = "authline";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Passphrase for the encrypted backend. Only ever read from the environment.
pub const PASSPHRASE_ENV: &str = "AUTHLINE_STORAGE_PASSPHRASE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    File,
    Keyring,
    Encrypted,
    Memory,
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(StorageKind::File),
            "keyring" | "keychain" => Ok(StorageKind::Keyring),
            "encrypted" => Ok(StorageKind::Encrypted),
            "memory" => Ok(StorageKind::Memory),
            other => Err(format!("Unknown storage kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub surface: Surface,
    pub storage: Option<StorageKind>,
    pub storage_dir: Option<PathBuf>,
    pub request_timeout_secs: u64,
    pub renew_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            surface: Surface::default(),
            storage: None,
            storage_dir: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            renew_timeout_secs: DEFAULT_RENEW_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load the config file (defaults if absent), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        debug!(surface = %config.surface, base_url = %config.base_url, "Config loaded");
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("AUTHLINE_BASE_URL") {
            self.base_url = url;
        }
        if let Some(surface) = lookup("AUTHLINE_SURFACE") {
            self.surface = surface.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(storage) = lookup("AUTHLINE_STORAGE") {
            self.storage = Some(storage.parse().map_err(anyhow::Error::msg)?);
        }
        if let Some(dir) = lookup("AUTHLINE_STORAGE_DIR") {
            self.storage_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Reject settings the client cannot run with. A zero timeout would
    /// fail every request and renewal immediately.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }
        if self.renew_timeout_secs == 0 {
            anyhow::bail!("renew_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Storage medium for the configured surface. The mobile app keeps its
    /// credentials in the device keychain; web and admin use a file.
    pub fn storage_kind(&self) -> StorageKind {
        self.storage.unwrap_or(match self.surface {
            Surface::Mobile => StorageKind::Keyring,
            Surface::Web | Surface::Admin => StorageKind::File,
        })
    }

    pub fn storage_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.storage_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            renew_timeout: Duration::from_secs(self.renew_timeout_secs),
        }
    }

    /// Construct the storage backend for the configured surface.
    pub fn open_backend(&self) -> Result<Box<dyn StorageBackend>> {
        let surface = self.surface;
        let backend: Box<dyn StorageBackend> = match self.storage_kind() {
            StorageKind::File => Box::new(FileBackend::new(self.storage_dir()?, surface)),
            StorageKind::Keyring => Box::new(
                KeyringBackend::new(surface).context("Failed to open keychain storage")?,
            ),
            StorageKind::Encrypted => {
                let passphrase = std::env::var(PASSPHRASE_ENV).with_context(|| {
                    format!("{} must be set for encrypted storage", PASSPHRASE_ENV)
                })?;
                Box::new(EncryptedFileBackend::new(self.storage_dir()?, surface, passphrase))
            }
            StorageKind::Memory => Box::new(MemoryBackend::new(surface)),
        };
        debug!(backend = %backend.describe(), "Storage backend opened");
        Ok(backend)
    }
}
