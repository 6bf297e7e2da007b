//! Key-value view over a bucket-oriented object store.
//!
//! [`KeyValueStore`] turns any [`Storage`] backend into a flat namespace of
//! string keys with `get`/`set`/`remove`/`list`/`clear`. Backends live in
//! their own crates; [`MemoryStorage`] is an in-process one.

mod drain;
mod error;
pub mod memory;
mod options;
mod storage;
mod store;
mod value;

pub use drain::{DrainSummary, PaginatedDrain};
pub use error::{Error, StoreResult};
pub use memory::MemoryStorage;
pub use options::{
    key_url_path, LinkOptions, PutOptions, Verb, DEFAULT_LINK_EXPIRY, TEXT_CONTENT_TYPE,
};
pub use storage::{BackendError, ErrorKind, ListPage, Storage, StorageFuture};
pub use store::KeyValueStore;
pub use value::{Encoding, Value};

pub use bytes::Bytes;
