//! S3-compatible backend for [`bucketkv_sdk::KeyValueStore`].
//!
//! Authentication, signing, retries and transport are the AWS SDK's; this
//! crate only maps the [`Storage`](bucketkv_sdk::Storage) operations onto
//! single S3 requests.

mod config;
mod s3;

pub use config::{S3Config, DEFAULT_REGION};
pub use s3::{S3Error, S3Storage};

use bucketkv_sdk::KeyValueStore;

/// Key-value store over an S3 bucket.
pub type S3KeyValueStore = KeyValueStore<S3Storage>;

/// Build a key-value store bound to `bucket`.
///
/// See [`S3Storage::connect`] for what is and is not checked here.
pub async fn connect(bucket: impl Into<String>, config: S3Config) -> Result<S3KeyValueStore, S3Error> {
    Ok(KeyValueStore::new(S3Storage::connect(bucket, config).await?))
}
