use aws_config::{meta::region::RegionProviderChain, BehaviorVersion};
use aws_sdk_s3::{
    config::Region,
    error::{BuildError, ProvideErrorMetadata, SdkError},
    operation::{
        delete_object::DeleteObjectError, delete_objects::DeleteObjectsError,
        get_object::GetObjectError, head_bucket::HeadBucketError, head_object::HeadObjectError,
        list_objects_v2::ListObjectsV2Error, put_object::PutObjectError,
    },
    presigning::{PresigningConfig, PresigningConfigError},
    primitives::{ByteStream, ByteStreamError},
    types::{Delete, ObjectCannedAcl, ObjectIdentifier, ServerSideEncryption, StorageClass},
    Client,
};
use bucketkv_sdk::{
    key_url_path, BackendError, Bytes, ErrorKind, LinkOptions, ListPage, PutOptions, Storage,
    StorageFuture, Verb,
};
use log::{debug, trace};
use thiserror::Error;

use crate::config::{S3Config, DEFAULT_REGION};

/// Failure of one S3 request. The SDK's own error is kept as the source.
#[derive(Debug, Error)]
pub enum S3Error {
    #[error("invalid S3 configuration: {0}")]
    Config(String),
    #[error("put object failed: {0}")]
    PutObject(#[source] SdkError<PutObjectError>),
    #[error("get object failed: {0}")]
    GetObject(#[source] SdkError<GetObjectError>),
    #[error("head object failed: {0}")]
    HeadObject(#[source] SdkError<HeadObjectError>),
    #[error("delete object failed: {0}")]
    DeleteObject(#[source] SdkError<DeleteObjectError>),
    #[error("head bucket failed: {0}")]
    HeadBucket(#[source] SdkError<HeadBucketError>),
    #[error("bucket {0} does not exist")]
    NoSuchBucket(String),
    #[error("list objects failed: {0}")]
    ListObjects(#[source] SdkError<ListObjectsV2Error>),
    #[error("delete objects failed: {0}")]
    DeleteObjects(#[source] SdkError<DeleteObjectsError>),
    /// The batch request succeeded but the backend refused some of its keys.
    #[error("{} keys were not deleted (first error: {})", .failed.len(), .code.as_deref().unwrap_or("unknown"))]
    PartialDelete {
        failed: Vec<String>,
        code: Option<String>,
        message: Option<String>,
    },
    #[error("reading object body failed: {0}")]
    ReadBody(#[source] ByteStreamError),
    #[error("building request failed: {0}")]
    Build(#[source] BuildError),
    #[error("invalid presigning settings: {0}")]
    Presign(#[source] PresigningConfigError),
}

impl S3Error {
    /// Error code reported by the backend, e.g. `NoSuchBucket`.
    pub fn code(&self) -> Option<&str> {
        match self {
            S3Error::PutObject(err) => err.code(),
            S3Error::GetObject(err) => err.code(),
            S3Error::HeadObject(err) => err.code(),
            S3Error::HeadBucket(err) => err.code(),
            S3Error::NoSuchBucket(_) => Some("NoSuchBucket"),
            S3Error::DeleteObject(err) => err.code(),
            S3Error::ListObjects(err) => err.code(),
            S3Error::DeleteObjects(err) => err.code(),
            S3Error::PartialDelete { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Message reported by the backend alongside the code.
    pub fn message(&self) -> Option<&str> {
        match self {
            S3Error::PutObject(err) => err.message(),
            S3Error::GetObject(err) => err.message(),
            S3Error::HeadObject(err) => err.message(),
            S3Error::HeadBucket(err) => err.message(),
            S3Error::DeleteObject(err) => err.message(),
            S3Error::ListObjects(err) => err.message(),
            S3Error::DeleteObjects(err) => err.message(),
            S3Error::PartialDelete { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

impl BackendError for S3Error {
    fn kind(&self) -> ErrorKind {
        match self {
            S3Error::GetObject(err)
                if err
                    .as_service_error()
                    .is_some_and(GetObjectError::is_no_such_key) =>
            {
                ErrorKind::NotFound
            }
            S3Error::HeadObject(err)
                if err
                    .as_service_error()
                    .is_some_and(HeadObjectError::is_not_found) =>
            {
                ErrorKind::NotFound
            }
            S3Error::ListObjects(err)
                if err
                    .as_service_error()
                    .is_some_and(ListObjectsV2Error::is_no_such_bucket) =>
            {
                ErrorKind::BucketMissing
            }
            S3Error::PutObject(err) => classify_sdk(err),
            S3Error::GetObject(err) => classify_sdk(err),
            S3Error::HeadObject(err) => classify_sdk(err),
            S3Error::HeadBucket(err) => classify_sdk(err),
            S3Error::NoSuchBucket(_) => ErrorKind::BucketMissing,
            S3Error::DeleteObject(err) => classify_sdk(err),
            S3Error::ListObjects(err) => classify_sdk(err),
            S3Error::DeleteObjects(err) => classify_sdk(err),
            S3Error::PartialDelete { code, .. } => classify(code.as_deref(), None),
            S3Error::ReadBody(_) => ErrorKind::Backend,
            S3Error::Config(_) | S3Error::Build(_) | S3Error::Presign(_) => {
                ErrorKind::InvalidInput
            }
        }
    }
}

fn classify_sdk<E>(err: &SdkError<E>) -> ErrorKind
where
    E: ProvideErrorMetadata,
{
    let status = err.raw_response().map(|response| response.status().as_u16());
    classify(err.code(), status)
}

/// Map a backend error code, or failing that an HTTP status, to an error kind.
pub(crate) fn classify(code: Option<&str>, status: Option<u16>) -> ErrorKind {
    match (code, status) {
        (Some("NoSuchBucket"), _) => ErrorKind::BucketMissing,
        (Some("NoSuchKey" | "NotFound"), _) => ErrorKind::NotFound,
        (None, Some(404)) => ErrorKind::NotFound,
        _ => ErrorKind::Backend,
    }
}

/// [`Storage`] over one bucket of an S3-compatible service.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    endpoint: Option<String>,
    max_keys: Option<i32>,
}

impl S3Storage {
    /// Build a client for `bucket`.
    ///
    /// Fails only on settings no client can be built from. The bucket's
    /// existence is not checked; a missing bucket surfaces on first use.
    pub async fn connect(bucket: impl Into<String>, config: S3Config) -> Result<Self, S3Error> {
        let bucket = bucket.into();
        config.validate(&bucket)?;

        let region = RegionProviderChain::first_try(config.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(DEFAULT_REGION);

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some(credentials) = config.credentials() {
            loader = loader.credentials_provider(credentials);
        }
        let shared = loader.load().await;

        let endpoint = config
            .endpoint
            .clone()
            .or_else(|| shared.endpoint_url().map(str::to_owned));
        let force_path_style = config.force_path_style.unwrap_or(endpoint.is_some());

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(force_path_style)
            .build();

        debug!(
            "S3 storage for bucket {} (endpoint {:?}, region {:?}, path style {})",
            bucket,
            endpoint,
            shared.region(),
            force_path_style
        );

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket,
            endpoint,
            max_keys: config.max_keys,
        })
    }

    /// Wrap an already configured client.
    pub fn from_client(client: Client, bucket: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            endpoint,
            max_keys: None,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}

impl Storage for S3Storage {
    type Error = S3Error;

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn put_object<'a>(
        &'a self,
        key: &'a str,
        body: Bytes,
        options: &'a PutOptions,
    ) -> StorageFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let metadata = (!options.metadata.is_empty()).then(|| options.metadata.clone());

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(body))
                .set_content_type(options.content_type.clone())
                .set_cache_control(options.cache_control.clone())
                .set_content_disposition(options.content_disposition.clone())
                .set_content_encoding(options.content_encoding.clone())
                .set_content_language(options.content_language.clone())
                .set_storage_class(options.storage_class.as_deref().map(StorageClass::from))
                .set_acl(options.acl.as_deref().map(ObjectCannedAcl::from))
                .set_server_side_encryption(
                    options
                        .server_side_encryption
                        .as_deref()
                        .map(ServerSideEncryption::from),
                )
                .set_ssekms_key_id(options.sse_kms_key_id.clone())
                .set_tagging(options.tagging())
                .set_metadata(metadata)
                .send()
                .await
                .map_err(S3Error::PutObject)?;

            Ok(())
        })
    }

    fn get_object<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Bytes, Self::Error> {
        Box::pin(async move {
            let object = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(S3Error::GetObject)?;

            let body = object.body.collect().await.map_err(S3Error::ReadBody)?;

            Ok(body.into_bytes())
        })
    }

    /// A HEAD answers a missing bucket with the same bare 404 as a missing
    /// key, so a 404 is followed by a HEAD of the bucket to tell them apart.
    fn head_object<'a>(&'a self, key: &'a str) -> StorageFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let err = match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(_) => return Ok(()),
                Err(err) => S3Error::HeadObject(err),
            };

            if !err.is_not_found() {
                return Err(err);
            }

            match self.client.head_bucket().bucket(&self.bucket).send().await {
                Ok(_) => Err(err),
                Err(bucket_err)
                    if bucket_err
                        .as_service_error()
                        .is_some_and(HeadBucketError::is_not_found) =>
                {
                    Err(S3Error::NoSuchBucket(self.bucket.clone()))
                }
                Err(bucket_err) => Err(S3Error::HeadBucket(bucket_err)),
            }
        })
    }

    fn delete_object<'a>(&'a self, key: &'a str) -> StorageFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(S3Error::DeleteObject)?;

            Ok(())
        })
    }

    fn list_page<'a>(
        &'a self,
        cursor: Option<&'a str>,
    ) -> StorageFuture<'a, ListPage, Self::Error> {
        Box::pin(async move {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(cursor.map(str::to_owned))
                .set_max_keys(self.max_keys)
                .send()
                .await
                .map_err(S3Error::ListObjects)?;

            let keys = output
                .contents()
                .iter()
                .filter_map(|object| object.key())
                .map(str::to_owned)
                .collect();

            Ok(ListPage {
                keys,
                truncated: output.is_truncated().unwrap_or(false),
                next_cursor: output.next_continuation_token().map(str::to_owned),
            })
        })
    }

    fn delete_objects<'a>(&'a self, keys: Vec<String>) -> StorageFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let objects = keys
                .into_iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(S3Error::Build)?;
            let batch = objects.len();

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(S3Error::Build)?;

            let output = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(S3Error::DeleteObjects)?;

            // Keys that are already gone count as deleted.
            let refused: Vec<_> = output
                .errors()
                .iter()
                .filter(|error| error.code() != Some("NoSuchKey"))
                .collect();

            if let Some(first) = refused.first() {
                return Err(S3Error::PartialDelete {
                    failed: refused
                        .iter()
                        .filter_map(|error| error.key())
                        .map(str::to_owned)
                        .collect(),
                    code: first.code().map(str::to_owned),
                    message: first.message().map(str::to_owned),
                });
            }

            trace!("deleted batch of {} keys from {}", batch, self.bucket);
            Ok(())
        })
    }

    fn presign<'a>(
        &'a self,
        key: &'a str,
        verb: Verb,
        options: &'a LinkOptions,
    ) -> StorageFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let presigning = PresigningConfig::expires_in(options.expires_in)
                .map_err(S3Error::Presign)?;

            let request = match verb {
                Verb::Read => self
                    .client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .presigned(presigning)
                    .await
                    .map_err(S3Error::GetObject)?,
                Verb::Write => self
                    .client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .set_content_type(options.content_type.clone())
                    .presigned(presigning)
                    .await
                    .map_err(S3Error::PutObject)?,
                Verb::Delete => self
                    .client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .presigned(presigning)
                    .await
                    .map_err(S3Error::DeleteObject)?,
            };

            Ok(request.uri().to_string())
        })
    }

    fn public_url(&self, key: &str) -> Option<String> {
        self.endpoint.as_ref().map(|endpoint| {
            format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.bucket,
                key_url_path(key)
            )
        })
    }
}
