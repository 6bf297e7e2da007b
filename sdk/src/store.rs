use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use log::{debug, trace};

use crate::drain::PaginatedDrain;
use crate::error::{Error, StoreResult};
use crate::options::{LinkOptions, PutOptions, Verb, TEXT_CONTENT_TYPE};
use crate::storage::{BackendError, Storage};
use crate::value::{Encoding, Value};

/// Flat string-keyed view over one bucket of a [`Storage`] backend.
///
/// Every operation is a single backend request, except [`list`](Self::list)
/// and [`clear`](Self::clear) which walk the paginated listing. Nothing is
/// cached and nothing is retried; concurrent operations are not serialized.
pub struct KeyValueStore<S>
where
    S: Storage,
{
    storage: S,
}

impl<S> KeyValueStore<S>
where
    S: Storage,
{
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn bucket(&self) -> &str {
        self.storage.bucket()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Release the backend. Dropping the store has the same effect.
    pub fn close(self) -> S {
        debug!("closing store for bucket {}", self.bucket());
        self.storage
    }

    /// Create or overwrite `key`. Text values are stored as utf-8 plain text.
    pub async fn set_item(&self, key: &str, value: impl Into<Value>) -> StoreResult<(), S::Error> {
        self.set_item_with(key, value, PutOptions::default()).await
    }

    /// Create or overwrite `key` with explicit request attributes.
    ///
    /// A text value without a content type in `options` is sent as
    /// [`TEXT_CONTENT_TYPE`]; any content type in `options` wins.
    pub async fn set_item_with(
        &self,
        key: &str,
        value: impl Into<Value>,
        mut options: PutOptions,
    ) -> StoreResult<(), S::Error> {
        Self::check_key(key)?;
        let value = value.into();

        if value.is_text() && options.content_type.is_none() {
            options.content_type = Some(TEXT_CONTENT_TYPE.to_string());
        }

        let body = value.into_bytes();
        trace!("put {}/{} ({} bytes)", self.bucket(), key, body.len());

        self.storage
            .put_object(key, body, &options)
            .await
            .map_err(Error::Storage)
    }

    /// Value at `key` decoded as utf-8, or `None` if the key does not exist.
    pub async fn get_item(&self, key: &str) -> StoreResult<Option<String>, S::Error> {
        match self.get_item_as(key, Some(Encoding::Utf8)).await? {
            Some(Value::Text(text)) => Ok(Some(text)),
            Some(Value::Bytes(_)) | None => Ok(None),
        }
    }

    /// Value at `key` decoded with `encoding`; `None` returns the exact stored bytes.
    pub async fn get_item_as(
        &self,
        key: &str,
        encoding: Option<Encoding>,
    ) -> StoreResult<Option<Value>, S::Error> {
        let Some(body) = self.fetch(key).await? else {
            return Ok(None);
        };

        let Some(encoding) = encoding else {
            return Ok(Some(Value::Bytes(body)));
        };

        match encoding.decode(&body) {
            Some(text) => Ok(Some(Value::Text(text))),
            None => Err(Error::Decode {
                key: key.to_string(),
                encoding,
            }),
        }
    }

    /// Exact stored bytes of `key`.
    pub async fn get_item_raw(&self, key: &str) -> StoreResult<Option<Bytes>, S::Error> {
        self.fetch(key).await
    }

    pub async fn has_item(&self, key: &str) -> StoreResult<bool, S::Error> {
        Self::check_key(key)?;

        match self.storage.head_object(key).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(Error::Storage(err)),
        }
    }

    /// Delete `key`. Deleting a key that does not exist succeeds.
    pub async fn remove_item(&self, key: &str) -> StoreResult<(), S::Error> {
        Self::check_key(key)?;
        trace!("delete {}/{}", self.bucket(), key);

        match self.storage.delete_object(key).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(Error::Storage(err)),
        }
    }

    /// Lazily yield every key in the bucket.
    ///
    /// Each call starts a new walk from the first page. Dropping the stream
    /// early stops further page requests.
    pub fn list(&self) -> impl Stream<Item = StoreResult<String, S::Error>> + Send + '_ {
        PaginatedDrain::new(&self.storage).into_keys()
    }

    /// Every key in the bucket, collected.
    pub async fn keys(&self) -> StoreResult<Vec<String>, S::Error> {
        self.list().try_collect().await
    }

    /// Delete every object in the bucket, one batch request per listing page.
    ///
    /// Not transactional: a failure leaves the pages already processed
    /// deleted. Calling it again restarts from the first page.
    pub async fn clear(&self) -> StoreResult<(), S::Error> {
        let summary = PaginatedDrain::new(&self.storage).delete_all().await?;

        debug!(
            "cleared bucket {}: {} keys over {} pages",
            self.bucket(),
            summary.deleted,
            summary.pages
        );
        Ok(())
    }

    /// Signed, time-bounded URL granting `verb` on `key`. The key need not exist.
    pub async fn get_item_link(
        &self,
        key: &str,
        verb: Verb,
        options: Option<LinkOptions>,
    ) -> StoreResult<String, S::Error> {
        Self::check_key(key)?;
        let options = options.unwrap_or_default();

        self.storage
            .presign(key, verb, &options)
            .await
            .map_err(Error::Storage)
    }

    /// Unsigned URL of `key`, when the backend has a fixed public endpoint.
    pub fn get_item_public_link(&self, key: &str) -> Option<String> {
        self.storage.public_url(key)
    }

    fn check_key(key: &str) -> StoreResult<(), S::Error> {
        if key.is_empty() {
            Err(Error::EmptyKey)
        } else {
            Ok(())
        }
    }

    async fn fetch(&self, key: &str) -> StoreResult<Option<Bytes>, S::Error> {
        Self::check_key(key)?;
        trace!("get {}/{}", self.bucket(), key);

        match self.storage.get_object(key).await {
            Ok(body) => Ok(Some(body)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(Error::Storage(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;
    use crate::memory::MemoryStorage;
    use crate::storage::ErrorKind;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn store(page_size: usize) -> KeyValueStore<MemoryStorage> {
        init_logger();
        KeyValueStore::new(MemoryStorage::new("kv").with_page_size(page_size))
    }

    #[tokio::test]
    async fn test_set_then_get_round_trip() {
        let store = store(10);

        store
            .set_item("user", r#"{"id":3923,"name":"nezort11"}"#)
            .await
            .unwrap();

        assert_eq!(
            store.get_item("user").await.unwrap().as_deref(),
            Some(r#"{"id":3923,"name":"nezort11"}"#)
        );
    }

    #[tokio::test]
    async fn test_overwrite_keeps_last_value() {
        let store = store(10);

        store.set_item("k", "first").await.unwrap();
        store.set_item("k", "second").await.unwrap();

        assert_eq!(store.get_item("k").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = store(10);

        assert_eq!(store.get_item("never-written").await.unwrap(), None);
        assert_eq!(store.get_item_as("never-written", None).await.unwrap(), None);

        store.set_item("gone", "x").await.unwrap();
        store.remove_item("gone").await.unwrap();
        assert_eq!(store.get_item("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_raw_bytes_are_exact() {
        let store = store(10);
        let payload = vec![0x00, 0xff, 0xc3, 0x28, 0x80, 0x7f];

        store.set_item("blob", payload.clone()).await.unwrap();

        let raw = store.get_item_as("blob", None).await.unwrap();
        assert_eq!(raw, Some(Value::Bytes(Bytes::from(payload.clone()))));
        assert_eq!(store.get_item_raw("blob").await.unwrap().unwrap(), payload);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_a_decode_error() {
        let store = store(10);
        store.set_item("blob", vec![0xff, 0xfe]).await.unwrap();

        let err = store.get_item("blob").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert!(matches!(err, Error::Decode { ref key, encoding: Encoding::Utf8 } if key == "blob"));

        let lossy = store
            .get_item_as("blob", Some(Encoding::Utf8Lossy))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lossy.as_text(), Some("\u{FFFD}\u{FFFD}"));
    }

    #[tokio::test]
    async fn test_text_defaults_content_type() {
        let store = store(10);

        store.set_item("text", "hello").await.unwrap();
        store.set_item("bytes", b"hello".as_slice()).await.unwrap();
        store
            .set_item_with("json", "{}", PutOptions::new().content_type("application/json"))
            .await
            .unwrap();

        let storage = store.storage();
        assert_eq!(
            storage.put_options("text").unwrap().content_type.as_deref(),
            Some(TEXT_CONTENT_TYPE)
        );
        assert_eq!(storage.put_options("bytes").unwrap().content_type, None);
        assert_eq!(
            storage.put_options("json").unwrap().content_type.as_deref(),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn test_options_are_passed_through() {
        let store = store(10);

        store
            .set_item_with(
                "doc",
                "body",
                PutOptions::new().cache_control("no-cache").metadata("owner", "kv"),
            )
            .await
            .unwrap();

        let options = store.storage().put_options("doc").unwrap();
        assert_eq!(options.cache_control.as_deref(), Some("no-cache"));
        assert_eq!(options.metadata.get("owner").map(String::as_str), Some("kv"));
        assert_eq!(store.get_item("doc").await.unwrap().as_deref(), Some("body"));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = store(10);
        store.set_item("k", "v").await.unwrap();

        store.remove_item("k").await.unwrap();
        store.remove_item("k").await.unwrap();

        assert!(!store.has_item("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_has_item() {
        let store = store(10);
        store.set_item("present", "v").await.unwrap();

        assert!(store.has_item("present").await.unwrap());
        assert!(!store.has_item("absent").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected() {
        let store = store(10);

        let err = store.set_item("", "v").await.unwrap_err();
        assert!(matches!(err, Error::EmptyKey));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        assert!(matches!(store.get_item("").await, Err(Error::EmptyKey)));
        assert!(matches!(store.remove_item("").await, Err(Error::EmptyKey)));
        assert!(store.storage().is_empty());
    }

    #[tokio::test]
    async fn test_list_yields_each_key_once_for_any_page_size() {
        for page_size in [1, 2, 25] {
            let store = store(page_size);
            for i in 0..25 {
                store.set_item(&format!("k{:02}", i), "v").await.unwrap();
            }

            let mut keys = store.keys().await.unwrap();
            assert_eq!(keys.len(), 25, "page size {}", page_size);

            keys.sort();
            keys.dedup();
            assert_eq!(keys.len(), 25, "page size {}", page_size);
        }
    }

    #[tokio::test]
    async fn test_list_restarts_on_each_call() {
        let store = store(2);
        for key in ["a", "b", "c"] {
            store.set_item(key, "v").await.unwrap();
        }

        let first: Vec<_> = store.list().take(2).collect().await;
        assert_eq!(first.len(), 2);

        assert_eq!(store.keys().await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_clear_then_list_is_empty() {
        let store = store(4);
        for i in 0..12 {
            store.set_item(&format!("k{}", i), "v").await.unwrap();
        }

        store.clear().await.unwrap();

        assert_eq!(store.storage().batch_delete_calls(), 3);
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_can_be_repeated() {
        let store = store(4);
        store.set_item("k", "v").await.unwrap();

        store.clear().await.unwrap();
        store.clear().await.unwrap();

        assert!(store.storage().is_empty());
    }

    #[tokio::test]
    async fn test_missing_bucket_propagates() {
        let store = store(10);
        store.storage().set_bucket_exists(false);

        let err = store.get_item("k").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BucketMissing);
        assert!(err.storage().is_some());

        assert_eq!(
            store.remove_item("k").await.unwrap_err().kind(),
            ErrorKind::BucketMissing
        );
        assert_eq!(
            store.has_item("k").await.unwrap_err().kind(),
            ErrorKind::BucketMissing
        );
        assert_eq!(store.clear().await.unwrap_err().kind(), ErrorKind::BucketMissing);
        assert_eq!(store.keys().await.unwrap_err().kind(), ErrorKind::BucketMissing);
    }

    #[tokio::test]
    async fn test_item_link_defaults_to_one_hour() {
        let store = store(10);

        let link = store.get_item_link("k", Verb::Read, None).await.unwrap();
        assert_eq!(link, "memory://kv/k?method=GET&expires=3600");

        let link = store
            .get_item_link(
                "k",
                Verb::Delete,
                Some(LinkOptions::default().expires_in(Duration::from_secs(60))),
            )
            .await
            .unwrap();
        assert_eq!(link, "memory://kv/k?method=DELETE&expires=60");
    }

    #[tokio::test]
    async fn test_public_link() {
        let store = store(10);
        assert_eq!(store.get_item_public_link("k"), None);

        let store = KeyValueStore::new(
            MemoryStorage::new("kv").with_public_endpoint("https://cdn.example.com/"),
        );
        assert_eq!(
            store.get_item_public_link("a/b.txt").as_deref(),
            Some("https://cdn.example.com/kv/a/b.txt")
        );
        assert_eq!(
            store.get_item_public_link("docs/q?#1 .txt").as_deref(),
            Some("https://cdn.example.com/kv/docs/q%3F%231%20.txt")
        );
    }

    #[tokio::test]
    async fn test_close_returns_backend() {
        let store = store(10);
        store.set_item("k", "v").await.unwrap();

        let storage = store.close();

        assert_eq!(storage.len(), 1);
    }
}
