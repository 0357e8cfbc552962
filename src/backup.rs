//! High-level pipeline: archive → compress → upload → clean, once per account.
//!
//! Accounts are processed strictly one after another in the order the panel
//! listed them. Each account runs through a small state machine:
//!
//! ```text
//! PENDING → ARCHIVED → COMPRESSED → UPLOADED → CLEANED
//!     └─────────┴───────────┴──→ FAILED(stage)
//! ```
//!
//! # Error Handling
//! - Failing to enumerate accounts aborts the run before any account is touched.
//! - Any failure (or panic) inside one account's pipeline is logged once with
//!   the account and the stage, recorded in the [`BackupReport`], and the run
//!   moves on to the next account.
//! - A username that is not a single plain path segment fails at `ARCHIVED`
//!   before the archiver, the store or the cleaner sees it.
//! - The account's source directory is deleted only after a successful upload.
//!   A failed delete is a warning and leaves the job at `UPLOADED`.
//! - The artifact lives in a per-account temporary directory that is removed
//!   whatever the outcome.

use futures::FutureExt;
use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::archive::{build_archive, check_username};
use crate::config::Config;
use crate::contract::{AccountSource, Archiver, ObjectStore, SourceCleaner};
use crate::error::{ArchiveError, BackupError, PanelError};
use crate::upload::upload;

/// Pipeline transition at which a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Archived,
    Compressed,
    Uploaded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Archived => "ARCHIVED",
            Stage::Compressed => "COMPRESSED",
            Stage::Uploaded => "UPLOADED",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Archived,
    Compressed,
    Uploaded,
    Cleaned,
    Failed(Stage),
}

impl JobStatus {
    /// `UPLOADED` counts as success: only the local cleanup is outstanding.
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Uploaded | JobStatus::Cleaned)
    }

    /// Stage a failure would be attributed to from this status.
    fn next_stage(&self) -> Option<Stage> {
        match self {
            JobStatus::Pending => Some(Stage::Archived),
            JobStatus::Archived => Some(Stage::Compressed),
            JobStatus::Compressed => Some(Stage::Uploaded),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => f.write_str("PENDING"),
            JobStatus::Archived => f.write_str("ARCHIVED"),
            JobStatus::Compressed => f.write_str("COMPRESSED"),
            JobStatus::Uploaded => f.write_str("UPLOADED"),
            JobStatus::Cleaned => f.write_str("CLEANED"),
            JobStatus::Failed(stage) => write!(f, "FAILED({stage})"),
        }
    }
}

/// One account's unit of work for the current run.
#[derive(Debug)]
pub struct BackupJob {
    pub username: String,
    pub source_directory: PathBuf,
    pub archive_path: Option<PathBuf>,
    pub remote_key: Option<String>,
    pub status: JobStatus,
    error: Option<String>,
    cleanup_warning: Option<String>,
}

impl BackupJob {
    pub fn new(username: &str, source_directory: PathBuf) -> Self {
        Self {
            username: username.to_string(),
            source_directory,
            archive_path: None,
            remote_key: None,
            status: JobStatus::Pending,
            error: None,
            cleanup_warning: None,
        }
    }

    fn fail(&mut self, stage: Stage, reason: String) {
        error!(
            username = %self.username,
            %stage,
            error = %reason,
            "[RUN][ERROR] Backup failed for account"
        );
        self.status = JobStatus::Failed(stage);
        self.error = Some(reason);
    }

    fn into_outcome(self) -> JobOutcome {
        JobOutcome {
            username: self.username,
            status: self.status,
            remote_key: self.remote_key,
            error: self.error,
            cleanup_warning: self.cleanup_warning,
        }
    }
}

/// Terminal state of one account.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub username: String,
    pub status: JobStatus,
    pub remote_key: Option<String>,
    pub error: Option<String>,
    pub cleanup_warning: Option<String>,
}

#[derive(Debug, Default)]
pub struct BackupReport {
    pub jobs: Vec<JobOutcome>,
}

impl BackupReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &JobOutcome> {
        self.jobs.iter().filter(|job| job.status.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &JobOutcome> {
        self.jobs.iter().filter(|job| !job.status.is_success())
    }
}

/// Side-effecting collaborators of a run.
pub struct Collaborators<'a> {
    pub archiver: &'a dyn Archiver,
    pub store: &'a dyn ObjectStore,
    pub cleaner: &'a dyn SourceCleaner,
}

/// Enumerates accounts and backs each one up in turn.
///
/// Only enumeration errors are returned; per-account failures end up in the
/// report.
pub async fn run_backups(
    config: &Config,
    accounts: &dyn AccountSource,
    deps: &Collaborators<'_>,
) -> Result<BackupReport, PanelError> {
    info!("[RUN] Starting backup run");

    let usernames = match accounts.list_accounts().await {
        Ok(usernames) => usernames,
        Err(e) => {
            error!(error = %e, "[RUN][ERROR] Failed to enumerate panel accounts");
            return Err(e);
        }
    };
    info!(count = usernames.len(), "[RUN] Enumerated accounts");

    let mut seen = HashSet::new();
    let mut report = BackupReport::default();

    for username in usernames {
        if !seen.insert(username.clone()) {
            warn!(username = %username, "[RUN] Skipping duplicate account");
            continue;
        }
        report.jobs.push(process_account(config, &username, deps).await);
    }

    info!(
        succeeded = report.succeeded().count(),
        failed = report.failed().count(),
        "[RUN] Backup run complete"
    );
    Ok(report)
}

/// Runs one account's pipeline to a terminal state, containing panics.
pub async fn process_account(
    config: &Config,
    username: &str,
    deps: &Collaborators<'_>,
) -> JobOutcome {
    let mut job = BackupJob::new(username, config.archive.source_directory(username));
    info!(
        username,
        source = %job.source_directory.display(),
        "[RUN] Attempting backup for account"
    );

    let outcome = AssertUnwindSafe(backup_account(&mut job, config, deps))
        .catch_unwind()
        .await;

    if let Err(panic) = outcome {
        let reason = panic_message(panic.as_ref());
        match job.status.next_stage() {
            Some(stage) => job.fail(stage, format!("panicked: {reason}")),
            None => {
                warn!(username, error = %reason, "[RUN] Cleanup panicked after upload");
                job.cleanup_warning = Some(format!("panicked: {reason}"));
            }
        }
    }

    info!(username, status = %job.status, "[RUN] Account finished");
    job.into_outcome()
}

async fn backup_account(job: &mut BackupJob, config: &Config, deps: &Collaborators<'_>) {
    let username = job.username.clone();

    // The username becomes a path segment and a script argument.
    if let Err(e) = check_username(&username) {
        job.fail(Stage::Archived, BackupError::from(e).to_string());
        return;
    }

    // PENDING → ARCHIVED
    if let Err(e) = deps.archiver.trigger_archive(&username).await {
        job.fail(Stage::Archived, BackupError::from(e).to_string());
        return;
    }
    job.status = JobStatus::Archived;

    // ARCHIVED → COMPRESSED → UPLOADED, inside a scoped staging directory.
    let staging = match tempfile::Builder::new().prefix("cwp-backup-").tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            let err = ArchiveError::CompressionError {
                path: std::env::temp_dir(),
                source: e,
            };
            job.fail(Stage::Compressed, BackupError::from(err).to_string());
            return;
        }
    };

    let timestamp = chrono::Local::now().naive_local();
    let archive_path = match build_archive(&job.source_directory, staging.path(), &username, timestamp)
    {
        Ok(path) => path,
        Err(e) => {
            job.fail(Stage::Compressed, BackupError::from(e).to_string());
            return;
        }
    };
    job.archive_path = Some(archive_path.clone());
    job.status = JobStatus::Compressed;

    let uploaded = upload(
        deps.store,
        &archive_path,
        &config.upload.bucket,
        &config.upload.key_prefix,
        None,
    )
    .await;
    drop(staging);

    match uploaded {
        Ok(key) => {
            job.remote_key = Some(key);
            job.status = JobStatus::Uploaded;
        }
        Err(e) => {
            // Source directory is kept for manual recovery.
            job.fail(Stage::Uploaded, BackupError::from(e).to_string());
            return;
        }
    }

    // UPLOADED → CLEANED
    match deps.cleaner.remove_source(&job.source_directory).await {
        Ok(()) => {
            info!(
                username = %username,
                path = %job.source_directory.display(),
                "[RUN] Removed local backup directory"
            );
            job.status = JobStatus::Cleaned;
        }
        Err(e) => {
            warn!(
                username = %username,
                path = %job.source_directory.display(),
                error = %e,
                "[RUN] Failed to remove local backup directory after upload"
            );
            job.cleanup_warning = Some(e.to_string());
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
