use crate::config::{ArchiveConfig, Config, PanelConfig, UploadConfig, DEFAULT_API_VERSION};
use crate::error::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub const ENV_API_KEY: &str = "CWP_API_KEY";
pub const ENV_API_URL: &str = "CWP_API_URL";
pub const ENV_BUCKET: &str = "AWS_S3_BUCKET";
pub const ENV_KEY_PREFIX: &str = "AWS_S3_KEY";

pub const DEFAULT_API_URL: &str = "https://localhost:2304";

#[derive(Deserialize)]
struct StaticConfig {
    #[serde(default)]
    panel: PanelSection,
    #[serde(default)]
    archive: ArchiveConfig,
    #[serde(default)]
    upload: UploadSection,
}

#[derive(Deserialize, Default)]
struct PanelSection {
    api_url: Option<String>,
    api_version: Option<String>,
    hostname: Option<String>,
}

#[derive(Deserialize, Default)]
struct UploadSection {
    bucket: Option<String>,
    key_prefix: Option<String>,
}

/// Loads a static YAML config file (no secrets) and injects the panel API key
/// from the environment. `CWP_API_URL`, `AWS_S3_BUCKET` and `AWS_S3_KEY`
/// override their file counterparts when set.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let static_conf = read_static(path.as_ref())?;
    let panel = merge_panel(static_conf.panel)?;
    let upload = merge_upload(static_conf.upload, panel.hostname.as_deref())?;

    info!(
        bucket = %upload.bucket,
        key_prefix = %upload.key_prefix,
        "Config loaded and merged successfully"
    );
    Ok(Config {
        panel,
        archive: static_conf.archive,
        upload,
    })
}

/// Panel section only, for commands that never touch object storage.
/// The `upload` section may be absent.
pub fn load_panel_config<P: AsRef<Path>>(path: P) -> Result<PanelConfig, ConfigError> {
    let static_conf = read_static(path.as_ref())?;
    let panel = merge_panel(static_conf.panel)?;
    info!(api_url = %panel.api_url, "Panel config loaded");
    Ok(panel)
}

fn read_static(path: &Path) -> Result<StaticConfig, ConfigError> {
    info!(config_path = ?path, "Loading configuration from file");

    let config_content = match fs::read_to_string(path) {
        Ok(content) => {
            info!(config_path = ?path, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to read config file");
            return Err(ConfigError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    parse_static(&config_content)
}

fn parse_static(content: &str) -> Result<StaticConfig, ConfigError> {
    // An empty file is a valid "everything from env/defaults" config.
    if content.trim().is_empty() {
        return Ok(StaticConfig {
            panel: PanelSection::default(),
            archive: ArchiveConfig::default(),
            upload: UploadSection::default(),
        });
    }
    serde_yaml::from_str(content).map_err(|e| {
        error!(error = ?e, "Failed to parse config YAML");
        ConfigError::ParseYaml(e)
    })
}

fn env_override(name: &str, file_value: Option<String>) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            info!(var = name, "Using value from environment");
            Some(value)
        }
        _ => file_value,
    }
}

/// `None` for values that are empty once surrounding slashes are removed.
fn key_segment(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.trim().trim_matches('/'))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn merge_panel(section: PanelSection) -> Result<PanelConfig, ConfigError> {
    let api_key = match std::env::var(ENV_API_KEY) {
        Ok(key) if !key.is_empty() => {
            info!("{} found in env", ENV_API_KEY);
            key
        }
        _ => {
            error!("{} environment variable not set", ENV_API_KEY);
            return Err(ConfigError::MissingEnv { name: ENV_API_KEY });
        }
    };

    let api_url = env_override(ENV_API_URL, section.api_url)
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    if reqwest::Url::parse(&api_url).is_err() {
        error!(api_url = %api_url, "Panel API URL is not a valid URL");
        return Err(ConfigError::Validation {
            message: format!("panel api_url '{api_url}' is not a valid URL"),
        });
    }

    Ok(PanelConfig {
        api_url,
        api_version: section
            .api_version
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
        api_key,
        hostname: section.hostname.filter(|h| !h.trim().is_empty()),
    })
}

fn merge_upload(
    section: UploadSection,
    hostname: Option<&str>,
) -> Result<UploadConfig, ConfigError> {
    let bucket = match env_override(ENV_BUCKET, section.bucket).filter(|b| !b.trim().is_empty()) {
        Some(bucket) => bucket,
        None => {
            error!("No upload bucket configured");
            return Err(ConfigError::Validation {
                message: format!("upload.bucket (or {ENV_BUCKET}) is required"),
            });
        }
    };

    // Keys are partitioned per panel host when no explicit prefix is given.
    let key_prefix = match key_segment(env_override(ENV_KEY_PREFIX, section.key_prefix).as_deref())
        .or_else(|| key_segment(hostname))
    {
        Some(prefix) => prefix,
        None => {
            error!("Neither upload.key_prefix nor panel.hostname configured");
            return Err(ConfigError::Validation {
                message: format!(
                    "upload.key_prefix (or {ENV_KEY_PREFIX}) or panel.hostname is required"
                ),
            });
        }
    };

    Ok(UploadConfig { bucket, key_prefix })
}
