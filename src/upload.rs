//! # Remote uploader
//!
//! Pushes a finished artifact to object storage under
//! `<key_prefix>/<YYYY-MM-DD>/<object_name>`, the date being the day the
//! upload happens. With the key prefix set to the panel's hostname, artifacts
//! from several panels share one bucket without colliding:
//!
//! ```text
//! <bucket>/cwp1.example.com/2022-01-01/alice:2022-01-01-00-00-04.zip
//! <bucket>/cwp2.example.com/2022-01-01/bob:2022-01-01-00-02-17.zip
//! ```
//!
//! [`S3Store`] is the production [`ObjectStore`]; its credentials and region
//! come from the ambient AWS configuration (environment, profile, instance
//! role), never from this crate's config.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use chrono::NaiveDate;
use std::path::Path;

use crate::contract::ObjectStore;
use crate::error::UploadError;

pub const KEY_DATE_FORMAT: &str = "%Y-%m-%d";

/// `<key_prefix>/<date>/<object_name>`. Empty segments and stray slashes are
/// dropped so an empty prefix yields `<date>/<object_name>`.
pub fn remote_key(key_prefix: &str, date: NaiveDate, object_name: &str) -> String {
    let date = date.format(KEY_DATE_FORMAT).to_string();
    [key_prefix.trim_matches('/'), date.as_str(), object_name.trim_start_matches('/')]
        .iter()
        .filter(|segment| !segment.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}

/// Uploads `local_path` using today's local date. Returns the remote key.
///
/// `object_name` defaults to the file name of `local_path`.
pub async fn upload<S>(
    store: &S,
    local_path: &Path,
    bucket: &str,
    key_prefix: &str,
    object_name: Option<&str>,
) -> Result<String, UploadError>
where
    S: ObjectStore + ?Sized,
{
    let today = chrono::Local::now().date_naive();
    upload_on(store, local_path, bucket, key_prefix, object_name, today).await
}

/// [`upload`] with an explicit date partition.
pub async fn upload_on<S>(
    store: &S,
    local_path: &Path,
    bucket: &str,
    key_prefix: &str,
    object_name: Option<&str>,
    date: NaiveDate,
) -> Result<String, UploadError>
where
    S: ObjectStore + ?Sized,
{
    let derived_name;
    let object_name = match object_name {
        Some(name) => name,
        None => {
            derived_name = local_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| UploadError::UploadFailed {
                    bucket: bucket.to_string(),
                    key: key_prefix.to_string(),
                    reason: format!("{} has no file name", local_path.display()),
                })?;
            derived_name.as_str()
        }
    };

    let key = remote_key(key_prefix, date, object_name);
    tracing::info!(
        file = %local_path.display(),
        bucket,
        key = %key,
        "Uploading artifact"
    );

    match store.put_file(bucket, &key, local_path).await {
        Ok(()) => {
            tracing::info!(bucket, key = %key, "Upload successful");
            Ok(key)
        }
        Err(e) => {
            tracing::warn!(error = %e, bucket, key = %key, "Upload failed");
            Err(e)
        }
    }
}

/// Amazon S3 (or S3-compatible) object store.
pub struct S3Store {
    client: aws_sdk_s3::Client,
}

impl S3Store {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// Client from the default AWS provider chain.
    pub async fn from_env() -> Self {
        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        tracing::info!(region = ?sdk_config.region(), "Initialized S3 client from environment");
        Self::new(aws_sdk_s3::Client::new(&sdk_config))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
    ) -> Result<(), UploadError> {
        let failed = |reason: String| UploadError::UploadFailed {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason,
        };

        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| failed(format!("cannot read {}: {e}", local_path.display())))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type("application/zip")
            .send()
            .await
            .map_err(|e| failed(aws_sdk_s3::error::DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn remote_key_is_prefix_date_name() {
        assert_eq!(
            remote_key("acme", date(2024, 3, 2), "x.zip"),
            "acme/2024-03-02/x.zip"
        );
    }

    #[test]
    fn remote_key_trims_slashes_and_empty_prefix() {
        assert_eq!(
            remote_key("/cwp1.example.com/", date(2022, 1, 1), "a.zip"),
            "cwp1.example.com/2022-01-01/a.zip"
        );
        assert_eq!(remote_key("", date(2022, 1, 1), "a.zip"), "2022-01-01/a.zip");
    }
}
