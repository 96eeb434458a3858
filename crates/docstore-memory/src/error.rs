use crate::Operation;

use roster_docstore::{DocumentStoreError, UpdateError};
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The primary key is already used in the collection.
    #[error("duplicate key `{key}` in collection `{collection}`")]
    DuplicateKey {
        /// Collection name.
        collection: String,
        /// Offending primary key.
        key: String,
    },

    /// A configured fail point fired.
    #[error("fail point triggered on {operation}")]
    FailPoint {
        /// Operation that failed.
        operation: Operation,
        /// Collection the operation targeted, if any.
        collection: Option<String>,
    },

    /// A document without a string `_id` was written.
    #[error("document in collection `{0}` has no string `_id`")]
    MissingPrimaryKey(String),

    /// The transaction was already committed or aborted.
    #[error("transaction already completed")]
    TransactionCompleted,

    /// An upsert was requested with a filter that does not describe a document.
    #[error("upsert into `{0}` needs an equality filter")]
    UnsupportedUpsert(String),

    /// Applying an update expression failed.
    #[error(transparent)]
    Update(#[from] UpdateError),

    /// A document the transaction read or wrote was changed, inserted or
    /// removed by someone else before the transaction committed.
    #[error("write conflict on `{key}` in collection `{collection}`")]
    WriteConflict {
        /// Collection name.
        collection: String,
        /// Primary key of the conflicting document.
        key: String,
    },
}

impl DocumentStoreError for Error {
    fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }
}
