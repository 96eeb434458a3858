//! Abstract interface for transactional document storage.
//!
//! A backend exposes named collections of JSON documents keyed by a string
//! `_id`, a small vocabulary of filter and update expressions, and
//! multi-document transactions with a configurable read/write concern.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod concern;
mod document;
mod filter;
mod update;

pub use concern::{ReadConcern, TransactionOptions, WriteConcern};
pub use document::{Document, PRIMARY_KEY, from_document, primary_key, to_document};
pub use filter::Filter;
pub use update::{Update, UpdateError, UpdateOptions, UpdateResult};

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;

/// Marker trait for document store errors.
pub trait DocumentStoreError: Debug + Error + Send + Sync + 'static {
    /// Whether the error was caused by inserting a primary key that already
    /// exists in the collection.
    fn is_duplicate_key(&self) -> bool;
}

/// Collection-level reads and writes, available both on the store handle and
/// inside an open transaction.
#[async_trait]
pub trait DocumentOperations: Send + Sync + 'static {
    /// The error type for store operations.
    type Error: DocumentStoreError;

    /// Removes the first document matching `filter`. Returns the number of
    /// documents removed.
    async fn delete_one(&self, collection: &str, filter: Filter) -> Result<u64, Self::Error>;

    /// Returns every document matching `filter`.
    async fn find(&self, collection: &str, filter: Filter) -> Result<Vec<Document>, Self::Error>;

    /// Returns the first document matching `filter`, if any.
    async fn find_one(
        &self,
        collection: &str,
        filter: Filter,
    ) -> Result<Option<Document>, Self::Error>;

    /// Inserts a new document. Fails if its primary key is already taken.
    async fn insert_one(&self, collection: &str, document: Document) -> Result<(), Self::Error>;

    /// Applies `update` to every document matching `filter`.
    async fn update_many(
        &self,
        collection: &str,
        filter: Filter,
        update: Update,
    ) -> Result<UpdateResult, Self::Error>;

    /// Applies `update` to the first document matching `filter`.
    ///
    /// With [`UpdateOptions::upsert`], a document seeded from the filter is
    /// created when nothing matches.
    async fn update_one(
        &self,
        collection: &str,
        filter: Filter,
        update: Update,
        options: UpdateOptions,
    ) -> Result<UpdateResult, Self::Error>;
}

/// An open multi-document transaction.
///
/// Writes made through the transaction become visible to other readers only
/// once [`commit`](Self::commit) succeeds. Dropping the transaction without
/// committing discards its writes.
#[async_trait]
pub trait DocumentTransaction: DocumentOperations {
    /// The options the transaction was started with.
    fn options(&self) -> &TransactionOptions;

    /// Atomically applies every write made in the transaction.
    async fn commit(self) -> Result<(), Self::Error>;

    /// Discards every write made in the transaction.
    async fn abort(self) -> Result<(), Self::Error>;
}

/// A handle to a document store.
#[async_trait]
pub trait DocumentStore: DocumentOperations + Clone {
    /// The transaction type produced by this store.
    type Transaction: DocumentTransaction<Error = Self::Error>;

    /// Starts a new transaction.
    async fn start_transaction(
        &self,
        options: TransactionOptions,
    ) -> Result<Self::Transaction, Self::Error>;
}
