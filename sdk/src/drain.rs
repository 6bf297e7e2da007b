//! Cursor-paginated walk of a bucket listing.
//!
//! Pages are requested strictly one after another, each resuming at the
//! cursor of the previous response. The walk ends at the first page that is
//! not truncated. A truncated page without a cursor cannot be resumed and
//! ends the walk with [`Error::TruncatedWithoutCursor`].

use std::collections::VecDeque;

use futures::{stream, Stream};
use log::{debug, trace};

use crate::error::{Error, StoreResult};
use crate::storage::Storage;

/// Pages visited and keys deleted by [`PaginatedDrain::delete_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub pages: usize,
    pub deleted: usize,
}

pub struct PaginatedDrain<'a, S>
where
    S: Storage,
{
    storage: &'a S,
    cursor: Option<String>,
    truncated: bool,
    pages: usize,
}

impl<'a, S> PaginatedDrain<'a, S>
where
    S: Storage,
{
    /// A fresh walk starting at the first page.
    pub fn new(storage: &'a S) -> Self {
        Self {
            storage,
            cursor: None,
            truncated: true,
            pages: 0,
        }
    }

    /// Number of pages received so far.
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Fetch the next page's keys, or `None` once the listing is exhausted.
    ///
    /// After an error the walk is over: further calls return `None`.
    pub async fn next_page(&mut self) -> StoreResult<Option<Vec<String>>, S::Error> {
        if !self.truncated {
            return Ok(None);
        }

        // Stop here if anything below fails.
        self.truncated = false;

        let page = self
            .storage
            .list_page(self.cursor.as_deref())
            .await
            .map_err(Error::Storage)?;
        self.pages += 1;

        trace!(
            "bucket {} page {}: {} keys, truncated={}",
            self.storage.bucket(),
            self.pages,
            page.keys.len(),
            page.truncated
        );

        if page.truncated {
            match page.next_cursor.filter(|cursor| !cursor.is_empty()) {
                Some(cursor) => {
                    self.cursor = Some(cursor);
                    self.truncated = true;
                }
                None => return Err(Error::TruncatedWithoutCursor { page: self.pages }),
            }
        }

        Ok(Some(page.keys))
    }

    /// Lazy sequence of every key, one page request per exhausted buffer.
    ///
    /// The first error is yielded and ends the stream.
    pub fn into_keys(self) -> impl Stream<Item = StoreResult<String, S::Error>> + Send + 'a {
        stream::try_unfold(
            (self, VecDeque::<String>::new()),
            |(mut drain, mut buffered)| async move {
                loop {
                    if let Some(key) = buffered.pop_front() {
                        return Ok(Some((key, (drain, buffered))));
                    }

                    match drain.next_page().await {
                        Ok(Some(keys)) => buffered.extend(keys),
                        Ok(None) => return Ok(None),
                        Err(err) => return Err(err),
                    }
                }
            },
        )
    }

    /// Delete every page's keys with one batch request per non-empty page,
    /// each batch completing before the next page is requested.
    pub async fn delete_all(mut self) -> StoreResult<DrainSummary, S::Error> {
        let mut deleted = 0;

        while let Some(keys) = self.next_page().await? {
            if keys.is_empty() {
                continue;
            }

            let batch = keys.len();
            self.storage
                .delete_objects(keys)
                .await
                .map_err(Error::Storage)?;
            deleted += batch;

            debug!(
                "bucket {} page {}: deleted {} keys",
                self.storage.bucket(),
                self.pages,
                batch
            );
        }

        Ok(DrainSummary {
            pages: self.pages,
            deleted,
        })
    }
}
