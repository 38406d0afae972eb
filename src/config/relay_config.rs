//! Relay configuration file handling
//!
//! Loads and manages the ~/.config/linkrelay/config.yaml file.

use crate::communicator::retry::RetryConfig;
use crate::dispatch::DispatchSettings;
use crate::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// ~/.config/linkrelay/<name>
fn config_dir_file(name: &str) -> PathBuf {
    // Always use ~/.config for consistency across platforms (macOS, Linux)
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".config");
    path.push("linkrelay");
    path.push(name);
    path
}

/// Where the two connection logs live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_desired_path")]
    pub desired_path: PathBuf,

    #[serde(default = "default_current_path")]
    pub current_path: PathBuf,
}

fn default_desired_path() -> PathBuf {
    config_dir_file("desired_connections.log")
}

fn default_current_path() -> PathBuf {
    config_dir_file("current_connections.log")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            desired_path: default_desired_path(),
            current_path: default_current_path(),
        }
    }
}

/// Email settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Verified address mail is sent from
    #[serde(default = "default_email_source")]
    pub source: String,

    /// Site name shown in subjects
    #[serde(default = "default_site_label")]
    pub site_label: String,

    /// Reply-to when a sender's address does not parse
    #[serde(default = "default_reply_to")]
    pub default_reply_to: String,
}

fn default_email_source() -> String {
    "relay@localhost".to_string()
}

fn default_site_label() -> String {
    "localhost".to_string()
}

fn default_reply_to() -> String {
    format!("{}@localhost", crate::connection::ANON_TOKEN)
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            source: default_email_source(),
            site_label: default_site_label(),
            default_reply_to: default_reply_to(),
        }
    }
}

/// SMS settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsConfig {
    /// E.164 number texts are sent from
    #[serde(default = "default_from_number")]
    pub from_number: String,
}

fn default_from_number() -> String {
    "+10000000000".to_string()
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            from_number: default_from_number(),
        }
    }
}

/// Filesystem outbox used by the CLI transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxConfig {
    #[serde(default = "default_outbox_path")]
    pub path: PathBuf,
}

fn default_outbox_path() -> PathBuf {
    config_dir_file("outbox")
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            path: default_outbox_path(),
        }
    }
}

/// Reconcile loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Seconds between sweeper passes
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Concurrent deliveries per pass
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// In-place retries for a transient delivery failure (0 = wait for next pass)
    #[serde(default)]
    pub link_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_max_in_flight() -> usize {
    crate::communicator::DEFAULT_MAX_IN_FLIGHT
}

fn default_initial_backoff_ms() -> u64 {
    500
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_in_flight: default_max_in_flight(),
            link_retries: 0,
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::bounded(
            self.link_retries,
            Duration::from_millis(self.initial_backoff_ms),
        )
    }
}

/// Relay configuration
///
/// Represents the complete ~/.config/linkrelay/config.yaml file. Every
/// section is optional; missing values take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub email: EmailConfig,

    #[serde(default)]
    pub sms: SmsConfig,

    #[serde(default)]
    pub outbox: OutboxConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the default path (~/.config/linkrelay/config.yaml)
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(RelayError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading relay configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            desired = %config.storage.desired_path.display(),
            current = %config.storage.current_path.display(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Load from `path` if it exists, defaults otherwise
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving relay configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/linkrelay/config.yaml)
    pub fn default_path() -> PathBuf {
        config_dir_file("config.yaml")
    }

    /// Values the translator stamps on every message
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            email_source: self.email.source.clone(),
            site_label: self.email.site_label.clone(),
            default_reply_to: self.email.default_reply_to.clone(),
            sms_from: self.sms.from_number.clone(),
        }
    }
}
