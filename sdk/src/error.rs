use thiserror::Error;

use crate::storage::{BackendError, ErrorKind};
use crate::value::Encoding;

/// Failure of a [`KeyValueStore`](crate::KeyValueStore) operation.
///
/// Backend errors are carried untouched in [`Error::Storage`]; their display
/// and source chain are the backend's own.
#[derive(Debug, Error)]
pub enum Error<E>
where
    E: BackendError,
{
    #[error(transparent)]
    Storage(E),

    /// The backend reported more pages without saying where they start.
    #[error("listing page {page} is truncated but carries no continuation cursor")]
    TruncatedWithoutCursor { page: usize },

    #[error("key must not be empty")]
    EmptyKey,

    #[error("value at {key:?} is not valid {encoding}")]
    Decode { key: String, encoding: Encoding },
}

impl<E> Error<E>
where
    E: BackendError,
{
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Storage(err) => err.kind(),
            Error::TruncatedWithoutCursor { .. } => ErrorKind::ContractViolation,
            Error::EmptyKey => ErrorKind::InvalidInput,
            Error::Decode { .. } => ErrorKind::Decode,
        }
    }

    pub fn storage(&self) -> Option<&E> {
        match self {
            Error::Storage(err) => Some(err),
            _ => None,
        }
    }

    pub fn into_storage(self) -> Option<E> {
        match self {
            Error::Storage(err) => Some(err),
            _ => None,
        }
    }
}

pub type StoreResult<T, E> = Result<T, Error<E>>;
