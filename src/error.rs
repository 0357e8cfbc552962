//! Error taxonomy for the backup pipeline.
//!
//! Enumeration errors ([`PanelError`]) are fatal to a run. Archive and upload
//! errors are per-account and are caught at the orchestrator boundary.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Panel API error: {0}")]
    Panel(#[from] PanelError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Environment variable {name} not set")]
    MissingEnv { name: &'static str },

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum PanelError {
    /// Timeout, DNS failure, refused connection, TLS handshake failure.
    #[error("Network error calling {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Panel rejected the API credential (HTTP {status})")]
    Auth { status: u16 },

    #[error("Panel returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// 2xx response whose `status` field is not `OK`.
    #[error("Panel reported an error: {message}")]
    Rejected { message: String },

    #[error("Malformed panel response: {reason}")]
    MalformedResponse { reason: String },

    /// The local HTTP client (TLS backend, proxy settings) could not be built.
    #[error("Failed to build HTTP client for {url}: {source}")]
    ClientSetup {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Invalid panel URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archival command failed for '{username}': {reason}")]
    ArchivalFailed { username: String, reason: String },

    #[error("Failed to build archive from '{path}': {source}")]
    CompressionError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload to s3://{bucket}/{key} failed: {reason}")]
    UploadFailed {
        bucket: String,
        key: String,
        reason: String,
    },
}
