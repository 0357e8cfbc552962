// cwp-backup/src/config.rs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_API_VERSION: &str = "v1";
pub const DEFAULT_ARCHIVE_COMMAND: &str = "/scripts/user_backup";
pub const DEFAULT_HOME_ROOT: &str = "/home";
pub const DEFAULT_BACKUPS_DIR_NAME: &str = "backups";
pub const DEFAULT_ARCHIVE_TIMEOUT_SECS: u64 = 6 * 60 * 60;

/// Process-wide configuration, built once by [`crate::load_config::load_config`]
/// and handed to each collaborator's constructor.
#[derive(Debug, Clone)]
pub struct Config {
    pub panel: PanelConfig,
    pub archive: ArchiveConfig,
    pub upload: UploadConfig,
}

impl Config {
    pub fn trace_loaded(&self) {
        info!(
            api_url = %self.panel.api_url,
            api_version = %self.panel.api_version,
            bucket = %self.upload.bucket,
            key_prefix = %self.upload.key_prefix,
            archive_command = %self.archive.command.display(),
            "Loaded Config"
        );
        debug!(
            hostname = ?self.panel.hostname,
            home_root = %self.archive.home_root.display(),
            timeout_secs = self.archive.timeout_secs,
            "Config loaded (full debug)"
        );
    }
}

#[derive(Clone)]
pub struct PanelConfig {
    pub api_url: String,
    pub api_version: String,
    pub api_key: String,
    pub hostname: Option<String>,
}

// Hand-written so the credential never reaches the logs.
impl std::fmt::Debug for PanelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelConfig")
            .field("api_url", &self.api_url)
            .field("api_version", &self.api_version)
            .field("api_key", &"<redacted>")
            .field("hostname", &self.hostname)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Executable invoked as `<command> <username>`.
    #[serde(default = "default_archive_command")]
    pub command: PathBuf,
    #[serde(default = "default_home_root")]
    pub home_root: PathBuf,
    #[serde(default = "default_backups_dir_name")]
    pub backups_dir_name: String,
    #[serde(default = "default_archive_timeout_secs")]
    pub timeout_secs: u64,
}

impl ArchiveConfig {
    /// Directory the archival command populates for `username`.
    pub fn source_directory(&self, username: &str) -> PathBuf {
        self.home_root.join(username).join(&self.backups_dir_name)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            command: default_archive_command(),
            home_root: default_home_root(),
            backups_dir_name: default_backups_dir_name(),
            timeout_secs: default_archive_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub bucket: String,
    pub key_prefix: String,
}

fn default_archive_command() -> PathBuf {
    PathBuf::from(DEFAULT_ARCHIVE_COMMAND)
}

fn default_home_root() -> PathBuf {
    PathBuf::from(DEFAULT_HOME_ROOT)
}

fn default_backups_dir_name() -> String {
    DEFAULT_BACKUPS_DIR_NAME.to_string()
}

fn default_archive_timeout_secs() -> u64 {
    DEFAULT_ARCHIVE_TIMEOUT_SECS
}
