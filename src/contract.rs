//! # contract: seams of the backup pipeline
//!
//! Each side-effecting collaborator of the orchestrator is an async trait so
//! that the real implementation (panel HTTP client, external archival command,
//! S3, recursive delete) can be swapped for a `mockall` mock in tests.
//!
//! Mocks (`MockAccountSource`, `MockArchiver`, `MockObjectStore`,
//! `MockSourceCleaner`) are exported under `cfg(test)` and the
//! `test-export-mocks` feature so integration tests can use them.

use async_trait::async_trait;
use std::path::Path;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::{ArchiveError, PanelError, UploadError};

/// Supplies the usernames of the accounts to back up.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait AccountSource: Send + Sync {
    /// Usernames in the order the panel returned them.
    async fn list_accounts(&self) -> Result<Vec<String>, PanelError>;
}

/// Runs the panel's archival routine for one account.
///
/// The routine is a black box: success means it exited zero and left the
/// account's backup files in its source directory.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Archiver: Send + Sync {
    async fn trigger_archive(&self, username: &str) -> Result<(), ArchiveError>;
}

/// Put-object against a bucket. Credentials and region are the
/// implementor's concern.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_file(&self, bucket: &str, key: &str, local_path: &Path)
        -> Result<(), UploadError>;
}

/// Removes an account's source backup directory after a successful upload.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SourceCleaner: Send + Sync {
    async fn remove_source(&self, path: &Path) -> std::io::Result<()>;
}

/// Recursive delete on the local filesystem.
pub struct RemoveDirAll;

#[async_trait]
impl SourceCleaner for RemoveDirAll {
    async fn remove_source(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::remove_dir_all(path).await
    }
}
