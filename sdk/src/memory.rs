//! In-process [`Storage`] backend.
//!
//! Keeps objects in an ordered map and pages the listing with a fixed page
//! size, so the pagination paths can be driven without a network. Request
//! counters make the number of listing and batch-delete calls observable.

use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use bytes::Bytes;
use thiserror::Error;

use crate::options::{key_url_path, LinkOptions, PutOptions, Verb};
use crate::storage::{BackendError, ErrorKind, ListPage, Storage, StorageFuture};

pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("no such key: {0}")]
    NoSuchKey(String),
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),
}

impl BackendError for MemoryError {
    fn kind(&self) -> ErrorKind {
        match self {
            MemoryError::NoSuchKey(_) => ErrorKind::NotFound,
            MemoryError::NoSuchBucket(_) => ErrorKind::BucketMissing,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    options: PutOptions,
}

pub struct MemoryStorage {
    bucket: String,
    page_size: usize,
    public_endpoint: Option<String>,
    bucket_exists: AtomicBool,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    list_calls: AtomicUsize,
    batch_delete_calls: AtomicUsize,
}

impl MemoryStorage {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            page_size: DEFAULT_PAGE_SIZE,
            public_endpoint: None,
            bucket_exists: AtomicBool::new(true),
            objects: Mutex::new(BTreeMap::new()),
            list_calls: AtomicUsize::new(0),
            batch_delete_calls: AtomicUsize::new(0),
        }
    }

    /// Maximum number of keys per listing page. Zero is treated as one.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Endpoint used to compose public links.
    pub fn with_public_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.public_endpoint = Some(endpoint.into());
        self
    }

    /// Make every request fail as if the bucket did not exist.
    pub fn set_bucket_exists(&self, exists: bool) {
        self.bucket_exists.store(exists, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }

    /// Attributes the object at `key` was last written with.
    pub fn put_options(&self, key: &str) -> Option<PutOptions> {
        self.objects().get(key).map(|object| object.options.clone())
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn batch_delete_calls(&self) -> usize {
        self.batch_delete_calls.load(Ordering::SeqCst)
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_bucket(&self) -> Result<(), MemoryError> {
        if self.bucket_exists.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MemoryError::NoSuchBucket(self.bucket.clone()))
        }
    }

    fn page_after(&self, cursor: Option<&str>) -> ListPage {
        let objects = self.objects();
        let lower = match cursor {
            Some(cursor) => Bound::Excluded(cursor),
            None => Bound::Unbounded,
        };

        let mut remaining = objects
            .range::<str, _>((lower, Bound::Unbounded))
            .map(|(key, _)| key.clone());
        let keys: Vec<String> = remaining.by_ref().take(self.page_size).collect();

        if remaining.next().is_some() {
            let cursor = keys.last().cloned().unwrap_or_default();
            ListPage::more(keys, cursor)
        } else {
            ListPage::last(keys)
        }
    }
}

impl Storage for MemoryStorage {
    type Error = MemoryError;

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
            self.check_bucket()?;
            self.objects().insert(
                key.to_string(),
                StoredObject {
                    body,
                    options: options.clone(),
                },
            );
            Ok(())
        })
    }

    fn get_object<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Bytes, Self::Error> {
        Box::pin(async move {
            self.check_bucket()?;
            match self.objects().get(key) {
                Some(object) => Ok(object.body.clone()),
                None => Err(MemoryError::NoSuchKey(key.to_string())),
            }
        })
    }

    fn head_object<'a>(&'a self, key: &'a str) -> StorageFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.check_bucket()?;
            if self.objects().contains_key(key) {
                Ok(())
            } else {
                Err(MemoryError::NoSuchKey(key.to_string()))
            }
        })
    }

    fn delete_object<'a>(&'a self, key: &'a str) -> StorageFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.check_bucket()?;
            match self.objects().remove(key) {
                Some(_) => Ok(()),
                None => Err(MemoryError::NoSuchKey(key.to_string())),
            }
        })
    }

    fn list_page<'a>(
        &'a self,
        cursor: Option<&'a str>,
    ) -> StorageFuture<'a, ListPage, Self::Error> {
        Box::pin(async move {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.check_bucket()?;
            Ok(self.page_after(cursor))
        })
    }

    fn delete_objects<'a>(&'a self, keys: Vec<String>) -> StorageFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.batch_delete_calls.fetch_add(1, Ordering::SeqCst);
            self.check_bucket()?;
            let mut objects = self.objects();
            for key in &keys {
                objects.remove(key);
            }
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
            self.check_bucket()?;
            Ok(format!(
                "memory://{}/{}?method={}&expires={}",
                self.bucket,
                key,
                verb.http_method(),
                options.expires_in.as_secs()
            ))
        })
    }

    fn public_url(&self, key: &str) -> Option<String> {
        self.public_endpoint
            .as_ref()
            .map(|endpoint| {
                format!(
                    "{}/{}/{}",
                    endpoint.trim_end_matches('/'),
                    self.bucket,
                    key_url_path(key)
                )
            })
    }
}
