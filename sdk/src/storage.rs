use std::{fmt, future::Future, pin::Pin};

use bytes::Bytes;

use crate::options::{LinkOptions, PutOptions, Verb};

/// Boxed future returned by every [`Storage`] operation.
pub type StorageFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Coarse classification of a failure, shared by backends and the adaptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The key does not exist.
    NotFound,
    /// The bucket the store is bound to does not exist.
    BucketMissing,
    /// The backend has no facility for the requested operation.
    Unsupported,
    /// The caller passed an argument the operation cannot accept.
    InvalidInput,
    /// The backend answered in a way that breaks its own protocol.
    ContractViolation,
    /// A stored value could not be decoded with the requested encoding.
    Decode,
    /// Any other backend failure: network, auth, throttling, malformed response.
    Backend,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::BucketMissing => "bucket missing",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::ContractViolation => "contract violation",
            ErrorKind::Decode => "decode",
            ErrorKind::Backend => "backend",
        };
        f.write_str(name)
    }
}

/// Error type of a [`Storage`] backend.
///
/// The adaptor never inspects message text; it only asks for the kind.
pub trait BackendError: std::error::Error + Send + Sync + 'static {
    fn kind(&self) -> ErrorKind;

    fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// One response of the listing endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Keys in the order the backend returned them.
    pub keys: Vec<String>,
    /// More pages remain after this one.
    pub truncated: bool,
    /// Where the next request resumes. Present iff `truncated` for a well-behaved backend.
    pub next_cursor: Option<String>,
}

impl ListPage {
    /// Final page: nothing remains after it.
    pub fn last(keys: Vec<String>) -> Self {
        Self {
            keys,
            truncated: false,
            next_cursor: None,
        }
    }

    /// Intermediate page resuming at `cursor`.
    pub fn more(keys: Vec<String>, cursor: impl Into<String>) -> Self {
        Self {
            keys,
            truncated: true,
            next_cursor: Some(cursor.into()),
        }
    }
}

/// A bucket-scoped object store.
///
/// Implementations are bound to exactly one bucket for their lifetime and
/// address keys within it only. Retries, signing and transport belong to the
/// implementation; nothing above this trait retries.
pub trait Storage: Send + Sync {
    type Error: BackendError;

    /// Name of the bucket every request addresses.
    fn bucket(&self) -> &str;

    /// Create or overwrite the object at `key`.
    fn put_object<'a>(
        &'a self,
        key: &'a str,
        body: Bytes,
        options: &'a PutOptions,
    ) -> StorageFuture<'a, (), Self::Error>;

    /// Fetch the whole object at `key` into memory.
    fn get_object<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Bytes, Self::Error>;

    /// Metadata-only existence check for `key`.
    fn head_object<'a>(&'a self, key: &'a str) -> StorageFuture<'a, (), Self::Error>;

    fn delete_object<'a>(&'a self, key: &'a str) -> StorageFuture<'a, (), Self::Error>;

    /// Request one page of the bucket listing, resuming at `cursor` when given.
    fn list_page<'a>(&'a self, cursor: Option<&'a str>)
        -> StorageFuture<'a, ListPage, Self::Error>;

    /// Delete every key of `keys` in a single request.
    fn delete_objects<'a>(&'a self, keys: Vec<String>) -> StorageFuture<'a, (), Self::Error>;

    /// Produce a time-bounded URL granting `verb` on `key`.
    fn presign<'a>(
        &'a self,
        key: &'a str,
        verb: Verb,
        options: &'a LinkOptions,
    ) -> StorageFuture<'a, String, Self::Error>;

    /// Deterministic public URL for `key`, when the backend has a fixed endpoint.
    fn public_url(&self, key: &str) -> Option<String>;
}
