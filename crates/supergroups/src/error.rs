use crate::context::Interrupted;

use roster_docstore::DocumentStoreError;
use thiserror::Error;

/// Result type for super group operations.
pub type Result<T, DE> = std::result::Result<T, Error<DE>>;

/// Errors that can occur in this crate.
///
/// Backend errors are never discarded: every variant that wraps one exposes
/// it through [`std::error::Error::source`].
#[derive(Debug, Error)]
pub enum Error<DE>
where
    DE: DocumentStoreError,
{
    /// A transactional operation failed part way and was rolled back.
    /// Nothing it wrote is visible.
    #[error("{operation} aborted at {stage}")]
    Aborted {
        /// Name of the operation.
        operation: &'static str,
        /// The step that failed: the collection being written, or `commit`.
        stage: String,
        /// The underlying store error.
        #[source]
        source: DE,
    },

    /// A super group with this ID already exists.
    #[error("super group `{0}` already exists")]
    AlreadyExists(String),

    /// The caller cancelled the operation.
    #[error("{operation} cancelled")]
    Cancelled {
        /// Name of the operation.
        operation: &'static str,
    },

    /// A stored record could not be decoded, or a record could not be encoded.
    #[error("malformed record in `{collection}`")]
    Codec {
        /// Collection holding the record.
        collection: String,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// The caller's deadline passed before the operation finished.
    #[error("{operation} exceeded its deadline")]
    DeadlineExceeded {
        /// Name of the operation.
        operation: &'static str,
    },

    /// The requested record does not exist.
    #[error("`{id}` not found in `{collection}`")]
    NotFound {
        /// Collection that was searched.
        collection: String,
        /// Primary key that was looked up.
        id: String,
    },

    /// A non-transactional store call failed.
    #[error("{operation} failed on `{collection}`")]
    Storage {
        /// Name of the operation.
        operation: &'static str,
        /// Collection the call targeted.
        collection: String,
        /// The underlying store error.
        #[source]
        source: DE,
    },

    /// The store refused to start a transaction.
    #[error("{operation} could not start a transaction")]
    Transaction {
        /// Name of the operation.
        operation: &'static str,
        /// The underlying store error.
        #[source]
        source: DE,
    },
}

impl<DE> Error<DE>
where
    DE: DocumentStoreError,
{
    /// Whether the error means the looked-up record does not exist.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether a transactional operation was rolled back. The caller may
    /// retry it as a whole.
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    pub(crate) fn interrupted(operation: &'static str, interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::Cancelled => Self::Cancelled { operation },
            Interrupted::DeadlineExceeded => Self::DeadlineExceeded { operation },
        }
    }
}
