//! Service configuration.
//!
//! Stored as JSON. Every field except the watched root has a default, so a
//! minimal file is `{"root": "/srv/www"}`; the root itself may also come from
//! the command line.

use crate::digest::{HashAlgorithm, DEFAULT_CHUNK_SIZE};
use crate::error::{Result, WardenError};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "warden";
pub const APP_NAME: &str = "warden";

const CONFIG_ENV: &str = "WARDEN_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSettings {
    #[serde(default = "default_true")]
    pub log: bool,
    #[serde(default)]
    pub journal: Option<PathBuf>,
    #[serde(default = "default_journal_max_bytes")]
    pub journal_max_bytes: u64,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            log: true,
            journal: None,
            journal_max_bytes: default_journal_max_bytes(),
            webhook: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub algorithm: HashAlgorithm,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub audit_interval_secs: Option<u64>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub alerts: AlertSettings,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            root: None,
            algorithm: HashAlgorithm::default(),
            chunk_size: default_chunk_size(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            audit_interval_secs: None,
            log_level: default_log_level(),
            alerts: AlertSettings::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_journal_max_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".into()
}

pub fn data_dir() -> anyhow::Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

/// `$WARDEN_CONFIG` when set, else `config.json` in the data directory.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var(CONFIG_ENV) {
        if !override_path.is_empty() {
            return Ok(PathBuf::from(override_path));
        }
    }
    Ok(data_dir()?.join("config.json"))
}

impl WardenConfig {
    /// Read, parse and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|source| WardenError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|source| WardenError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`WardenConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Range checks that need nothing but the config itself.
    pub fn validate(&self) -> Result<()> {
        if !(512..=1024 * 1024).contains(&self.chunk_size) {
            return Err(invalid("chunk_size must be between 512 bytes and 1 MiB"));
        }
        if !(1..=64).contains(&self.workers) {
            return Err(invalid("workers must be between 1 and 64"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be at least 1"));
        }
        if self.audit_interval_secs == Some(0) {
            return Err(invalid("audit_interval_secs must be at least 1"));
        }
        if let Some(webhook) = &self.alerts.webhook {
            if !(webhook.url.starts_with("http://") || webhook.url.starts_with("https://")) {
                return Err(invalid("webhook url must be http or https"));
            }
            if webhook.timeout_secs == 0 {
                return Err(invalid("webhook timeout_secs must be at least 1"));
            }
        }
        Ok(())
    }

    /// Reject an alert journal inside the watched root: every append would
    /// be a change under the root and raise another alert.
    ///
    /// `root` must be canonical. Checked at startup, once the root is
    /// resolved, rather than in [`WardenConfig::validate`].
    pub fn check_journal_placement(&self, root: &Path) -> Result<()> {
        let Some(journal) = &self.alerts.journal else {
            return Ok(());
        };
        let absolute = if journal.is_absolute() {
            journal.clone()
        } else {
            std::env::current_dir()?.join(journal)
        };
        // the journal itself may not exist yet; resolve its directory
        let resolved = absolute
            .parent()
            .and_then(|dir| dir.canonicalize().ok())
            .zip(absolute.file_name())
            .map(|(dir, name)| dir.join(name))
            .unwrap_or(absolute);
        if resolved.starts_with(root) {
            return Err(WardenError::InvalidConfig(format!(
                "alert journal {} is inside the watched root {}",
                resolved.display(),
                root.display()
            )));
        }
        Ok(())
    }

    /// A root given on the command line wins over the file.
    pub fn with_root_override(mut self, root: Option<PathBuf>) -> Self {
        if root.is_some() {
            self.root = root;
        }
        self
    }

    /// The watched root, or an error telling the user how to set one.
    pub fn require_root(&self) -> Result<&Path> {
        self.root
            .as_deref()
            .ok_or_else(|| invalid("no watched root configured; pass --root or set \"root\""))
    }
}

fn invalid(msg: &str) -> WardenError {
    WardenError::InvalidConfig(msg.to_string())
}
