//! In-memory (single node) implementation of document storage for local
//! development and tests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod fail_point;
mod transaction;

pub use error::Error;
pub use fail_point::{FailAction, FailPoint, Operation};
pub use transaction::MemoryTransaction;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use roster_docstore::{
    Document, DocumentOperations, DocumentStore, Filter, TransactionOptions, Update,
    UpdateOptions, UpdateResult, primary_key,
};
use tokio::sync::RwLock;
use tracing::trace;

#[derive(Clone, Debug)]
pub(crate) struct Versioned {
    pub(crate) document: Document,
    pub(crate) version: u64,
}

/// Committed contents of every collection.
#[derive(Debug, Default)]
pub(crate) struct State {
    collections: HashMap<String, BTreeMap<String, Versioned>>,
    next_version: u64,
}

impl State {
    pub(crate) fn documents(&self, collection: &str) -> impl Iterator<Item = (&String, &Versioned)> {
        self.collections.get(collection).into_iter().flatten()
    }

    pub(crate) fn get(&self, collection: &str, key: &str) -> Option<&Versioned> {
        self.collections.get(collection)?.get(key)
    }

    pub(crate) fn version_of(&self, collection: &str, key: &str) -> Option<u64> {
        self.get(collection, key).map(|versioned| versioned.version)
    }

    pub(crate) fn put(&mut self, collection: &str, key: String, document: Document) {
        self.next_version += 1;
        let version = self.next_version;
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(key, Versioned { document, version });
    }

    pub(crate) fn remove(&mut self, collection: &str, key: &str) -> bool {
        self.collections
            .get_mut(collection)
            .is_some_and(|documents| documents.remove(key).is_some())
    }

    /// Primary keys and contents of the documents matching `filter`, in key
    /// order.
    fn matching(&self, collection: &str, filter: &Filter) -> Vec<(String, Document)> {
        if let Some(keys) = filter.primary_keys() {
            let mut matched: Vec<(String, Document)> = keys
                .into_iter()
                .filter_map(|key| {
                    self.get(collection, key)
                        .filter(|versioned| filter.matches(&versioned.document))
                        .map(|versioned| (key.to_string(), versioned.document.clone()))
                })
                .collect();
            matched.sort_by(|a, b| a.0.cmp(&b.0));
            matched.dedup_by(|a, b| a.0 == b.0);
            return matched;
        }

        self.documents(collection)
            .filter(|(_, versioned)| filter.matches(&versioned.document))
            .map(|(key, versioned)| (key.clone(), versioned.document.clone()))
            .collect()
    }
}

/// Builds the document an upsert creates when nothing matches.
pub(crate) fn upsert_document(
    collection: &str,
    filter: &Filter,
    update: &Update,
) -> Result<(String, Document), Error> {
    let mut document = filter
        .upsert_seed()
        .ok_or_else(|| Error::UnsupportedUpsert(collection.to_string()))?;
    update.apply(&mut document)?;

    let key = primary_key(&document)
        .ok_or_else(|| Error::MissingPrimaryKey(collection.to_string()))?
        .to_string();

    Ok((key, document))
}

/// In-memory document store.
///
/// Clones share the same underlying collections.
#[derive(Clone, Debug, Default)]
pub struct MemoryDocumentStore {
    fail_points: Arc<Mutex<Vec<FailPoint>>>,
    state: Arc<RwLock<State>>,
}

impl MemoryDocumentStore {
    /// Creates a new, empty `MemoryDocumentStore`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a fail point. Fail points are evaluated in the order they were
    /// added and the first one that fires wins.
    pub fn configure_fail_point(&self, fail_point: FailPoint) {
        self.fail_points.lock().push(fail_point);
    }

    /// Disarms every fail point.
    pub fn clear_fail_points(&self) {
        self.fail_points.lock().clear();
    }

    /// Number of documents currently committed in `collection`.
    pub async fn count(&self, collection: &str) -> usize {
        self.state.read().await.documents(collection).count()
    }

    pub(crate) const fn state(&self) -> &Arc<RwLock<State>> {
        &self.state
    }

    pub(crate) async fn check_fail_point(
        &self,
        operation: Operation,
        collection: Option<&str>,
    ) -> Result<(), Error> {
        let action = {
            let mut fail_points = self.fail_points.lock();
            let action = fail_points
                .iter_mut()
                .find_map(|fail_point| fail_point.trigger(operation, collection));
            fail_points.retain(|fail_point| !fail_point.is_exhausted());
            action
        };

        match action {
            None => Ok(()),
            Some(FailAction::Error) => {
                trace!(%operation, ?collection, "fail point returned error");
                Err(Error::FailPoint {
                    operation,
                    collection: collection.map(str::to_string),
                })
            }
            Some(FailAction::Delay(duration)) => {
                trace!(%operation, ?collection, ?duration, "fail point delaying operation");
                tokio::time::sleep(duration).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl DocumentOperations for MemoryDocumentStore {
    type Error = Error;

    async fn delete_one(&self, collection: &str, filter: Filter) -> Result<u64, Self::Error> {
        self.check_fail_point(Operation::Delete, Some(collection))
            .await?;

        let mut state = self.state.write().await;
        let Some((key, _)) = state.matching(collection, &filter).into_iter().next() else {
            return Ok(0);
        };

        Ok(u64::from(state.remove(collection, &key)))
    }

    async fn find(&self, collection: &str, filter: Filter) -> Result<Vec<Document>, Self::Error> {
        self.check_fail_point(Operation::Find, Some(collection))
            .await?;

        let state = self.state.read().await;
        Ok(state
            .matching(collection, &filter)
            .into_iter()
            .map(|(_, document)| document)
            .collect())
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Filter,
    ) -> Result<Option<Document>, Self::Error> {
        self.check_fail_point(Operation::Find, Some(collection))
            .await?;

        let state = self.state.read().await;
        Ok(state
            .matching(collection, &filter)
            .into_iter()
            .next()
            .map(|(_, document)| document))
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<(), Self::Error> {
        self.check_fail_point(Operation::Insert, Some(collection))
            .await?;

        let key = primary_key(&document)
            .ok_or_else(|| Error::MissingPrimaryKey(collection.to_string()))?
            .to_string();

        let mut state = self.state.write().await;
        if state.get(collection, &key).is_some() {
            return Err(Error::DuplicateKey {
                collection: collection.to_string(),
                key,
            });
        }

        state.put(collection, key, document);
        Ok(())
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Filter,
        update: Update,
    ) -> Result<UpdateResult, Self::Error> {
        self.check_fail_point(Operation::Update, Some(collection))
            .await?;

        let mut state = self.state.write().await;
        let mut result = UpdateResult::default();

        // Apply to copies first so a failing document leaves the collection untouched.
        let mut changed = Vec::new();
        for (key, mut document) in state.matching(collection, &filter) {
            result.matched += 1;
            if update.apply(&mut document)? {
                result.modified += 1;
                changed.push((key, document));
            }
        }

        for (key, document) in changed {
            state.put(collection, key, document);
        }

        Ok(result)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Filter,
        update: Update,
        options: UpdateOptions,
    ) -> Result<UpdateResult, Self::Error> {
        self.check_fail_point(Operation::Update, Some(collection))
            .await?;

        let mut state = self.state.write().await;
        match state.matching(collection, &filter).into_iter().next() {
            Some((key, mut document)) => {
                let modified = update.apply(&mut document)?;
                if modified {
                    state.put(collection, key, document);
                }
                Ok(UpdateResult {
                    matched: 1,
                    modified: u64::from(modified),
                    upserted_id: None,
                })
            }
            None if options.upsert => {
                let (key, document) = upsert_document(collection, &filter, &update)?;
                state.put(collection, key.clone(), document);
                Ok(UpdateResult {
                    upserted_id: Some(key),
                    ..UpdateResult::default()
                })
            }
            None => Ok(UpdateResult::default()),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    type Transaction = MemoryTransaction;

    async fn start_transaction(
        &self,
        options: TransactionOptions,
    ) -> Result<Self::Transaction, Self::Error> {
        self.check_fail_point(Operation::StartTransaction, None)
            .await?;

        trace!(?options, "starting transaction");
        Ok(MemoryTransaction::new(self.clone(), options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use serde_json::{Value, json};

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = MemoryDocumentStore::new();

        store
            .insert_one("groups", doc(json!({ "_id": "g1", "members": ["u1"] })))
            .await
            .unwrap();
        store
            .insert_one("groups", doc(json!({ "_id": "g2", "members": [] })))
            .await
            .unwrap();

        let found = store
            .find_one("groups", Filter::by_id("g1"))
            .await
            .unwrap();
        assert_eq!(found, Some(doc(json!({ "_id": "g1", "members": ["u1"] }))));

        let found = store
            .find("groups", Filter::is_in("_id", ["g2", "gX"]))
            .await
            .unwrap();
        assert_eq!(found, vec![doc(json!({ "_id": "g2", "members": [] }))]);

        let missing = store.find_one("other", Filter::by_id("g1")).await.unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_insert_duplicate_key() {
        let store = MemoryDocumentStore::new();

        store
            .insert_one("groups", doc(json!({ "_id": "g1" })))
            .await
            .unwrap();
        let result = store
            .insert_one("groups", doc(json!({ "_id": "g1" })))
            .await;

        assert_matches!(result, Err(Error::DuplicateKey { ref key, .. }) if key == "g1");
        assert!(roster_docstore::DocumentStoreError::is_duplicate_key(
            &result.unwrap_err()
        ));
    }

    #[tokio::test]
    async fn test_insert_requires_primary_key() {
        let store = MemoryDocumentStore::new();

        let result = store.insert_one("groups", doc(json!({ "name": "x" }))).await;

        assert_matches!(result, Err(Error::MissingPrimaryKey(_)));
    }

    #[tokio::test]
    async fn test_update_one_with_upsert() {
        let store = MemoryDocumentStore::new();

        let result = store
            .update_one(
                "users",
                Filter::by_id("u1"),
                Update::add_to_set("groups", ["g1"]),
                UpdateOptions::upsert(),
            )
            .await
            .unwrap();
        assert_eq!(result.upserted_id.as_deref(), Some("u1"));

        let result = store
            .update_one(
                "users",
                Filter::by_id("u1"),
                Update::add_to_set("groups", ["g1", "g2"]),
                UpdateOptions::upsert(),
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            UpdateResult {
                matched: 1,
                modified: 1,
                upserted_id: None
            }
        );

        let user = store.find_one("users", Filter::by_id("u1")).await.unwrap();
        assert_eq!(user, Some(doc(json!({ "_id": "u1", "groups": ["g1", "g2"] }))));
    }

    #[tokio::test]
    async fn test_update_one_without_upsert_matches_nothing() {
        let store = MemoryDocumentStore::new();

        let result = store
            .update_one(
                "users",
                Filter::by_id("u1"),
                Update::add_to_set("groups", ["g1"]),
                UpdateOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(result, UpdateResult::default());
        assert_eq!(store.count("users").await, 0);
    }

    #[tokio::test]
    async fn test_update_many_pulls_from_each_match() {
        let store = MemoryDocumentStore::new();
        for user in ["u1", "u2", "u3"] {
            store
                .insert_one("users", doc(json!({ "_id": user, "groups": ["g1", "g2"] })))
                .await
                .unwrap();
        }

        let result = store
            .update_many(
                "users",
                Filter::is_in("_id", ["u1", "u2"]),
                Update::pull("groups", ["g1"]),
            )
            .await
            .unwrap();
        assert_eq!(result.matched, 2);
        assert_eq!(result.modified, 2);

        let users = store
            .find("users", Filter::eq("groups", "g1"))
            .await
            .unwrap();
        assert_eq!(users, vec![doc(json!({ "_id": "u3", "groups": ["g1", "g2"] }))]);
    }

    #[tokio::test]
    async fn test_delete_one() {
        let store = MemoryDocumentStore::new();
        store
            .insert_one("groups", doc(json!({ "_id": "g1" })))
            .await
            .unwrap();

        assert_eq!(store.delete_one("groups", Filter::by_id("g1")).await.unwrap(), 1);
        assert_eq!(store.delete_one("groups", Filter::by_id("g1")).await.unwrap(), 0);
        assert_eq!(store.count("groups").await, 0);
    }

    #[tokio::test]
    async fn test_fail_point_leaves_data_untouched() {
        let store = MemoryDocumentStore::new();
        store
            .insert_one("groups", doc(json!({ "_id": "g1", "members": [] })))
            .await
            .unwrap();

        store.configure_fail_point(FailPoint::error(Operation::Update).in_collection("groups"));

        let result = store
            .update_one(
                "groups",
                Filter::by_id("g1"),
                Update::add_to_set("members", ["u1"]),
                UpdateOptions::default(),
            )
            .await;
        assert_matches!(
            result,
            Err(Error::FailPoint {
                operation: Operation::Update,
                ..
            })
        );

        // Fired once, so the retry goes through.
        store
            .update_one(
                "groups",
                Filter::by_id("g1"),
                Update::add_to_set("members", ["u1"]),
                UpdateOptions::default(),
            )
            .await
            .unwrap();

        let group = store.find_one("groups", Filter::by_id("g1")).await.unwrap();
        assert_eq!(group, Some(doc(json!({ "_id": "g1", "members": ["u1"] }))));
    }

    #[tokio::test]
    async fn test_clear_fail_points() {
        let store = MemoryDocumentStore::new();
        store.configure_fail_point(FailPoint::error(Operation::Find).always());
        assert!(store.find("groups", Filter::by_id("g1")).await.is_err());

        store.clear_fail_points();
        assert!(store.find("groups", Filter::by_id("g1")).await.is_ok());
    }
}
