//! Archival trigger and artifact builder.
//!
//! [`CommandArchiver`] runs the panel's per-account backup script, which
//! stages the account's files under `<home>/<username>/backups`.
//! [`build_archive`] then zips that directory into a single artifact named
//! `<username>:<YYYY-MM-DD-HH-MM-SS>.zip`.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::ArchiveConfig;
use crate::contract::Archiver;
use crate::error::ArchiveError;

pub const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Invokes `<command> <username>` as a child process and waits for it.
#[derive(Debug, Clone)]
pub struct CommandArchiver {
    command: PathBuf,
    timeout: Duration,
}

impl CommandArchiver {
    pub fn new(command: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ArchiveConfig) -> Self {
        Self::new(config.command.clone(), config.timeout())
    }
}

#[async_trait]
impl Archiver for CommandArchiver {
    async fn trigger_archive(&self, username: &str) -> Result<(), ArchiveError> {
        check_username(username)?;
        tracing::info!(
            username,
            command = %self.command.display(),
            "Running panel backup script for user"
        );

        // No shell: the username is passed as a single argument.
        let mut child = Command::new(&self.command);
        child.arg(username).kill_on_drop(true);

        let status = match tokio::time::timeout(self.timeout, child.status()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                tracing::warn!(
                    error = ?e,
                    username,
                    command = %self.command.display(),
                    "Failed to launch backup script"
                );
                return Err(ArchiveError::ArchivalFailed {
                    username: username.to_string(),
                    reason: format!("failed to launch {}: {e}", self.command.display()),
                });
            }
            Err(_) => {
                tracing::warn!(
                    username,
                    timeout_secs = self.timeout.as_secs(),
                    "Backup script timed out"
                );
                return Err(ArchiveError::ArchivalFailed {
                    username: username.to_string(),
                    reason: format!("timed out after {}s", self.timeout.as_secs()),
                });
            }
        };

        if !status.success() {
            tracing::warn!(username, status = ?status, "Backup script exited with non-zero code");
            return Err(ArchiveError::ArchivalFailed {
                username: username.to_string(),
                reason: format!("exited with {status}"),
            });
        }

        tracing::info!(username, "Backup script completed");
        Ok(())
    }
}

/// Rejects usernames that would escape `<home>/<username>` once joined onto
/// a path, or that the backup script would read as an option.
pub fn check_username(username: &str) -> Result<(), ArchiveError> {
    let reason = if username.is_empty() {
        Some("username is empty")
    } else if username == "." || username == ".." {
        Some("username is a relative path component")
    } else if username.contains(['/', '\\', '\0']) {
        Some("username contains a path separator or NUL")
    } else if username.starts_with('-') {
        Some("username starts with '-'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ArchiveError::ArchivalFailed {
            username: username.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// `<username>:<timestamp>`, the artifact name without extension.
pub fn archive_name(username: &str, timestamp: NaiveDateTime) -> String {
    format!("{}:{}", username, timestamp.format(ARCHIVE_TIMESTAMP_FORMAT))
}

/// Zips the tree under `source_directory` into
/// `<destination_directory>/<archive_name>.zip` and returns its absolute path.
///
/// Entries are stored relative to `source_directory`. An empty source
/// directory produces a valid, empty archive.
pub fn build_archive(
    source_directory: &Path,
    destination_directory: &Path,
    username: &str,
    timestamp: NaiveDateTime,
) -> Result<PathBuf, ArchiveError> {
    let compression_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| ArchiveError::CompressionError { path, source }
    };

    let destination_directory =
        fs::canonicalize(destination_directory).map_err(compression_error(destination_directory))?;
    let archive_path = destination_directory.join(format!(
        "{}.{}",
        archive_name(username, timestamp),
        ARCHIVE_EXTENSION
    ));

    tracing::info!(
        username,
        source = %source_directory.display(),
        archive = %archive_path.display(),
        "Compressing backup directory"
    );

    let metadata = fs::metadata(source_directory).map_err(compression_error(source_directory))?;
    if !metadata.is_dir() {
        return Err(ArchiveError::CompressionError {
            path: source_directory.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "source is not a directory"),
        });
    }

    let file = File::create(&archive_path).map_err(compression_error(&archive_path))?;
    let entries = write_zip(source_directory, BufWriter::new(file))
        .map_err(compression_error(source_directory))?;

    tracing::info!(
        username,
        entries,
        archive = %archive_path.display(),
        "Archive written"
    );
    Ok(archive_path)
}

fn write_zip<W: io::Write + io::Seek>(source: &Path, writer: W) -> io::Result<usize> {
    let mut zip = ZipWriter::new(writer);
    let base_options =
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut entries = 0;

    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let name = zip_entry_name(relative);

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), base_options)?;
            entries += 1;
            continue;
        }

        // Follows file symlinks; anything that is not a regular file is skipped.
        let metadata = match fs::metadata(entry.path()) {
            Ok(m) if m.is_file() => m,
            _ => {
                tracing::warn!(path = %entry.path().display(), "Skipping non-regular file");
                continue;
            }
        };

        let options = file_options(base_options, &metadata);
        zip.start_file(name, options)?;
        let mut input = File::open(entry.path())?;
        io::copy(&mut input, &mut zip)?;
        entries += 1;
    }

    zip.finish()?;
    Ok(entries)
}

fn file_options(base: SimpleFileOptions, metadata: &fs::Metadata) -> SimpleFileOptions {
    let options = base.large_file(metadata.len() >= u32::MAX as u64);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        options.unix_permissions(metadata.permissions().mode())
    }
    #[cfg(not(unix))]
    {
        options
    }
}

/// Forward-slash separated, as the zip format requires.
fn zip_entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn archive_name_uses_username_and_timestamp() {
        let ts = NaiveDate::from_ymd_opt(2021, 6, 22)
            .unwrap()
            .and_hms_opt(18, 7, 33)
            .unwrap();
        assert_eq!(archive_name("macnated", ts), "macnated:2021-06-22-18-07-33");
    }

    #[test]
    fn check_username_rejects_path_escapes() {
        for bad in ["", ".", "..", "/srv", "a/b", "a\\b", "nul\0", "-rf"] {
            assert!(check_username(bad).is_err(), "{bad:?} should be rejected");
        }
        for good in ["macnated", "alice2", "web_user", "a.b"] {
            assert!(check_username(good).is_ok(), "{good:?} should be accepted");
        }
    }

    #[test]
    fn zip_entry_name_uses_forward_slashes() {
        let rel = Path::new("db").join("mysql").join("dump.sql");
        assert_eq!(zip_entry_name(&rel), "db/mysql/dump.sql");
    }
}
