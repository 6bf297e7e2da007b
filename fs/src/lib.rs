//! Local directory backend for [`bucketkv_sdk::KeyValueStore`].
//!
//! The directory plays the bucket. A key maps to a file below it, each `/`
//! in the key descending one directory. Listing is ordered by key and paged;
//! the cursor is the last key of the previous page.
//!
//! Every page walks and sorts the whole tree, so draining N files costs
//! O(N²/page size) directory reads. Fine for tests and small buckets.
//!
//! Entries whose names are not valid UTF-8 cannot be named by any key and are
//! left out of listings.

use std::{
    io,
    path::{Path, PathBuf},
};

use bucketkv_sdk::{
    BackendError, Bytes, ErrorKind, LinkOptions, ListPage, PutOptions, Storage, StorageFuture,
    Verb,
};
use log::{debug, trace};
use thiserror::Error;

pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no such key: {0}")]
    NoSuchKey(String),
    #[error("bucket directory {} does not exist", .0.display())]
    NoSuchBucket(PathBuf),
    #[error("key {0:?} does not name a file inside the bucket")]
    InvalidKey(String),
    #[error("{0} links are not supported by the filesystem backend")]
    Unsupported(&'static str),
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BackendError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::NoSuchKey(_) => ErrorKind::NotFound,
            Error::NoSuchBucket(_) => ErrorKind::BucketMissing,
            Error::InvalidKey(_) => ErrorKind::InvalidInput,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::Io { .. } => ErrorKind::Backend,
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> Error + '_ {
    move |source| Error::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub struct FileSystem {
    root: PathBuf,
    bucket: String,
    page_size: usize,
}

impl FileSystem {
    /// Bind to the directory at `root`. Its existence is checked on use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let bucket = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.to_string_lossy().into_owned());

        Self {
            root,
            bucket,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Create the directory at `root`, and its parents, then bind to it.
    pub async fn create(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let storage = Self::new(root);

        tokio::fs::create_dir_all(&storage.root)
            .await
            .map_err(io_error(&storage.root))?;

        Ok(storage)
    }

    /// Maximum number of keys per listing page. Zero is treated as one.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, Error> {
        let mut path = self.root.clone();

        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
                return Err(Error::InvalidKey(key.to_string()));
            }
            path.push(segment);
        }

        Ok(path)
    }

    async fn check_bucket(&self) -> Result<(), Error> {
        match tokio::fs::metadata(&self.root).await {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            Ok(_) => Err(Error::NoSuchBucket(self.root.clone())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(Error::NoSuchBucket(self.root.clone()))
            }
            Err(err) => Err(io_error(&self.root)(err)),
        }
    }

    /// Path of the existing file behind `key`.
    async fn object_file(&self, key: &str) -> Result<PathBuf, Error> {
        let path = self.key_path(key)?;
        self.check_bucket().await?;

        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(path),
            Ok(_) => Err(Error::NoSuchKey(key.to_string())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(Error::NoSuchKey(key.to_string()))
            }
            Err(err) => Err(io_error(&path)(err)),
        }
    }

    /// Every key below the root, sorted.
    async fn all_keys(&self) -> Result<Vec<String>, Error> {
        let mut keys = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_error(&dir))?;

            while let Some(entry) = entries.next_entry().await.map_err(io_error(&dir))? {
                let name = match entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(name) => {
                        debug!("skipping non UTF-8 entry {:?} in {}", name, dir.display());
                        continue;
                    }
                };
                let key = if prefix.is_empty() {
                    name
                } else {
                    format!("{prefix}/{name}")
                };

                let file_type = entry.file_type().await.map_err(io_error(&dir))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), key));
                } else if file_type.is_file() {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    /// Remove directories left empty between `path` and the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent();

        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            if tokio::fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }

    async fn remove_file(&self, key: &str) -> Result<(), Error> {
        let path = self.object_file(key).await?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NoSuchKey(key.to_string()))
            }
            Err(err) => return Err(io_error(&path)(err)),
        }

        self.prune_empty_parents(&path).await;
        Ok(())
    }
}

impl Storage for FileSystem {
    type Error = Error;

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn put_object<'a>(
        &'a self,
        key: &'a str,
        body: Bytes,
        _options: &'a PutOptions,
    ) -> StorageFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let path = self.key_path(key)?;
            self.check_bucket().await?;

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(io_error(parent))?;
            }

            tokio::fs::write(&path, &body)
                .await
                .map_err(io_error(&path))?;

            trace!("wrote {} bytes to {}", body.len(), path.display());
            Ok(())
        })
    }

    fn get_object<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Bytes, Self::Error> {
        Box::pin(async move {
            let path = self.object_file(key).await?;

            match tokio::fs::read(&path).await {
                Ok(buffer) => Ok(Bytes::from(buffer)),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    Err(Error::NoSuchKey(key.to_string()))
                }
                Err(err) => Err(io_error(&path)(err)),
            }
        })
    }

    fn head_object<'a>(&'a self, key: &'a str) -> StorageFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.object_file(key).await?;
            Ok(())
        })
    }

    fn delete_object<'a>(&'a self, key: &'a str) -> StorageFuture<'a, (), Self::Error> {
        Box::pin(self.remove_file(key))
    }

    fn list_page<'a>(
        &'a self,
        cursor: Option<&'a str>,
    ) -> StorageFuture<'a, ListPage, Self::Error> {
        Box::pin(async move {
            self.check_bucket().await?;
            let keys = self.all_keys().await?;

            let start = match cursor {
                Some(cursor) => keys.partition_point(|key| key.as_str() <= cursor),
                None => 0,
            };
            let remaining = &keys[start..];
            let page: Vec<String> = remaining.iter().take(self.page_size).cloned().collect();

            if remaining.len() > self.page_size {
                let cursor = page.last().cloned().unwrap_or_default();
                Ok(ListPage::more(page, cursor))
            } else {
                Ok(ListPage::last(page))
            }
        })
    }

    fn delete_objects<'a>(&'a self, keys: Vec<String>) -> StorageFuture<'a, (), Self::Error> {
        Box::pin(async move {
            for key in &keys {
                match self.remove_file(key).await {
                    Ok(()) | Err(Error::NoSuchKey(_)) => {}
                    Err(err) => return Err(err),
                }
            }
            Ok(())
        })
    }

    fn presign<'a>(
        &'a self,
        _key: &'a str,
        verb: Verb,
        _options: &'a LinkOptions,
    ) -> StorageFuture<'a, String, Self::Error> {
        Box::pin(async move { Err(Error::Unsupported(verb.http_method())) })
    }

    fn public_url(&self, _key: &str) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use bucketkv_sdk::KeyValueStore;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    use super::*;

    fn storage(page_size: usize) -> (TempDir, FileSystem) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystem::new(dir.path()).with_page_size(page_size);
        (dir, storage)
    }

    #[tokio::test]
    async fn test_create_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("bucket");

        let storage = FileSystem::create(&root).await.unwrap();

        assert_eq!(storage.root(), root.as_path());
        assert_eq!(storage.bucket(), "bucket");
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_put_get_and_delete_object() {
        let (_dir, storage) = storage(10);
        let buffer = Bytes::from_static(b"Hello, World!");

        storage
            .put_object("test.txt", buffer.clone(), &PutOptions::default())
            .await
            .unwrap();
        assert_eq!(storage.get_object("test.txt").await.unwrap(), buffer);

        storage.delete_object("test.txt").await.unwrap();
        let err = storage.get_object("test.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_nested_keys() {
        let (dir, storage) = storage(10);

        storage
            .put_object("users/42/profile.json", Bytes::from("{}"), &PutOptions::default())
            .await
            .unwrap();
        assert!(dir.path().join("users/42/profile.json").is_file());
        storage.head_object("users/42/profile.json").await.unwrap();

        let err = storage.head_object("users/42").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        storage.delete_object("users/42/profile.json").await.unwrap();
        assert!(!dir.path().join("users").exists());
    }

    #[tokio::test]
    async fn test_keys_cannot_escape_root() {
        let (_dir, storage) = storage(10);

        for key in ["../outside", "a//b", "/abs", "a/./b", "dir/"] {
            let err = storage
                .put_object(key, Bytes::from("x"), &PutOptions::default())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{key}");
        }
    }

    #[tokio::test]
    async fn test_list_pages_in_key_order() {
        let (_dir, storage) = storage(2);
        for key in ["b", "a/2", "a/1", "c"] {
            storage
                .put_object(key, Bytes::from("x"), &PutOptions::default())
                .await
                .unwrap();
        }

        let first = storage.list_page(None).await.unwrap();
        assert_eq!(first, ListPage::more(vec!["a/1".into(), "a/2".into()], "a/2"));

        let second = storage.list_page(Some("a/2")).await.unwrap();
        assert_eq!(second, ListPage::last(vec!["b".into(), "c".into()]));
    }

    #[tokio::test]
    async fn test_missing_directory_is_missing_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystem::new(dir.path().join("absent"));

        let err = storage.list_page(None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BucketMissing);

        let err = storage
            .put_object("k", Bytes::from("x"), &PutOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BucketMissing);
        assert!(!dir.path().join("absent").exists());
    }

    #[tokio::test]
    async fn test_links() {
        let (_dir, storage) = storage(10);

        let err = storage
            .presign("k", Verb::Read, &LinkOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(storage.public_url("k"), None);
    }

    #[tokio::test]
    async fn test_store_over_filesystem() {
        let (_dir, storage) = storage(3);
        let store = KeyValueStore::new(storage);

        for i in 0..10 {
            store.set_item(&format!("file{i}.txt"), "Hello, World!").await.unwrap();
        }
        store.remove_item("file3.txt").await.unwrap();
        store.remove_item("file3.txt").await.unwrap();

        let keys: Vec<String> = store.list().try_collect().await.unwrap();
        assert_eq!(keys.len(), 9);
        assert!(!keys.contains(&"file3.txt".to_string()));

        store.clear().await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
        assert_eq!(store.get_item("file0.txt").await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_utf8_names_are_not_listed() {
        use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

        let (dir, storage) = storage(10);
        let odd = dir.path().join(OsStr::from_bytes(b"bad\xff"));
        std::fs::write(&odd, b"x").unwrap();
        std::fs::create_dir(dir.path().join(OsStr::from_bytes(b"dir\xfe"))).unwrap();
        std::fs::write(dir.path().join("good.txt"), b"x").unwrap();

        let store = KeyValueStore::new(storage);
        assert_eq!(store.keys().await.unwrap(), vec!["good.txt".to_string()]);

        store.clear().await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
        assert!(odd.exists());
    }
}
