//! Optimistic multi-document transactions.

use crate::{Error, MemoryDocumentStore, Operation, State, upsert_document};

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use roster_docstore::{
    Document, DocumentOperations, DocumentTransaction, Filter, TransactionOptions, Update,
    UpdateOptions, UpdateResult, primary_key,
};
use tokio::sync::Mutex;
use tracing::trace;

type StagedKey = (String, String);

#[derive(Debug, Default)]
struct Pending {
    /// Committed version of every document the transaction has looked at,
    /// `None` for keys that did not exist at the time.
    observed: HashMap<StagedKey, Option<u64>>,
    /// Buffered writes. `None` is a delete.
    staged: HashMap<StagedKey, Option<Document>>,
}

impl Pending {
    fn observe(&mut self, state: &State, collection: &str, key: &str) {
        self.observed
            .entry((collection.to_string(), key.to_string()))
            .or_insert_with(|| state.version_of(collection, key));
    }

    /// The transaction's view of a single document.
    fn visible(&self, state: &State, collection: &str, key: &str) -> Option<Document> {
        match self.staged.get(&(collection.to_string(), key.to_string())) {
            Some(staged) => staged.clone(),
            None => state
                .get(collection, key)
                .map(|versioned| versioned.document.clone()),
        }
    }

    /// Documents matching `filter` as seen by the transaction: committed
    /// state overlaid with its own writes.
    ///
    /// Matched documents are observed. A primary key filter also observes
    /// the keys that matched nothing, so a later insert of one of them fails
    /// the commit.
    fn matching(
        &mut self,
        state: &State,
        collection: &str,
        filter: &Filter,
    ) -> Vec<(String, Document)> {
        let keyed = filter.primary_keys();
        let observe_misses = keyed.is_some();
        let candidates: BTreeSet<String> = match keyed {
            Some(keys) => keys.into_iter().map(str::to_string).collect(),
            None => state
                .documents(collection)
                .map(|(key, _)| key.clone())
                .chain(
                    self.staged
                        .keys()
                        .filter(|(staged_collection, _)| staged_collection == collection)
                        .map(|(_, key)| key.clone()),
                )
                .collect(),
        };

        let mut matched = Vec::new();
        for key in candidates {
            let hit = self
                .visible(state, collection, &key)
                .filter(|document| filter.matches(document));

            if observe_misses || hit.is_some() {
                self.observe(state, collection, &key);
            }
            if let Some(document) = hit {
                matched.push((key, document));
            }
        }

        matched
    }

    fn stage(&mut self, state: &State, collection: &str, key: String, document: Option<Document>) {
        self.observe(state, collection, &key);
        self.staged.insert((collection.to_string(), key), document);
    }
}

/// A transaction against a [`MemoryDocumentStore`].
///
/// Writes are buffered until commit. Reads see the latest committed data plus
/// the transaction's own writes. At commit every document the transaction
/// read, updated or wrote must still be at the version it had when the
/// transaction first saw it, and keys it looked up without finding must still
/// be absent. Otherwise the commit fails with [`Error::WriteConflict`] and
/// nothing is applied.
pub struct MemoryTransaction {
    options: TransactionOptions,
    pending: Mutex<Option<Pending>>,
    store: MemoryDocumentStore,
}

impl MemoryTransaction {
    pub(crate) fn new(store: MemoryDocumentStore, options: TransactionOptions) -> Self {
        Self {
            options,
            pending: Mutex::new(Some(Pending::default())),
            store,
        }
    }
}

#[async_trait]
impl DocumentOperations for MemoryTransaction {
    type Error = Error;

    async fn delete_one(&self, collection: &str, filter: Filter) -> Result<u64, Self::Error> {
        self.store
            .check_fail_point(Operation::Delete, Some(collection))
            .await?;

        let mut pending = self.pending.lock().await;
        let pending = pending.as_mut().ok_or(Error::TransactionCompleted)?;
        let state = self.store.state().read().await;

        let Some((key, _)) = pending
            .matching(&state, collection, &filter)
            .into_iter()
            .next()
        else {
            return Ok(0);
        };

        pending.stage(&state, collection, key, None);
        Ok(1)
    }

    async fn find(&self, collection: &str, filter: Filter) -> Result<Vec<Document>, Self::Error> {
        self.store
            .check_fail_point(Operation::Find, Some(collection))
            .await?;

        let mut pending = self.pending.lock().await;
        let pending = pending.as_mut().ok_or(Error::TransactionCompleted)?;
        let state = self.store.state().read().await;

        Ok(pending
            .matching(&state, collection, &filter)
            .into_iter()
            .map(|(_, document)| document)
            .collect())
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Filter,
    ) -> Result<Option<Document>, Self::Error> {
        Ok(self.find(collection, filter).await?.into_iter().next())
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<(), Self::Error> {
        self.store
            .check_fail_point(Operation::Insert, Some(collection))
            .await?;

        let key = primary_key(&document)
            .ok_or_else(|| Error::MissingPrimaryKey(collection.to_string()))?
            .to_string();

        let mut pending = self.pending.lock().await;
        let pending = pending.as_mut().ok_or(Error::TransactionCompleted)?;
        let state = self.store.state().read().await;

        if !pending
            .matching(&state, collection, &Filter::by_id(key.clone()))
            .is_empty()
        {
            return Err(Error::DuplicateKey {
                collection: collection.to_string(),
                key,
            });
        }

        pending.stage(&state, collection, key, Some(document));
        Ok(())
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Filter,
        update: Update,
    ) -> Result<UpdateResult, Self::Error> {
        self.store
            .check_fail_point(Operation::Update, Some(collection))
            .await?;

        let mut pending = self.pending.lock().await;
        let pending = pending.as_mut().ok_or(Error::TransactionCompleted)?;
        let state = self.store.state().read().await;

        let mut result = UpdateResult::default();
        let mut changed = Vec::new();
        for (key, mut document) in pending.matching(&state, collection, &filter) {
            result.matched += 1;
            if update.apply(&mut document)? {
                result.modified += 1;
                changed.push((key, document));
            }
        }

        for (key, document) in changed {
            pending.stage(&state, collection, key, Some(document));
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
        self.store
            .check_fail_point(Operation::Update, Some(collection))
            .await?;

        let mut pending = self.pending.lock().await;
        let pending = pending.as_mut().ok_or(Error::TransactionCompleted)?;
        let state = self.store.state().read().await;

        match pending
            .matching(&state, collection, &filter)
            .into_iter()
            .next()
        {
            Some((key, mut document)) => {
                let modified = update.apply(&mut document)?;
                if modified {
                    pending.stage(&state, collection, key, Some(document));
                }
                Ok(UpdateResult {
                    matched: 1,
                    modified: u64::from(modified),
                    upserted_id: None,
                })
            }
            None if options.upsert => {
                let (key, document) = upsert_document(collection, &filter, &update)?;
                pending.stage(&state, collection, key.clone(), Some(document));
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
impl DocumentTransaction for MemoryTransaction {
    fn options(&self) -> &TransactionOptions {
        &self.options
    }

    async fn commit(self) -> Result<(), Self::Error> {
        let pending = self
            .pending
            .lock()
            .await
            .take()
            .ok_or(Error::TransactionCompleted)?;

        self.store
            .check_fail_point(Operation::Commit, None)
            .await?;

        let mut state = self.store.state().write().await;

        for ((collection, key), version) in &pending.observed {
            if state.version_of(collection, key) != *version {
                trace!(%collection, %key, "write conflict, discarding transaction");
                return Err(Error::WriteConflict {
                    collection: collection.clone(),
                    key: key.clone(),
                });
            }
        }

        let writes = pending.staged.len();
        for ((collection, key), document) in pending.staged {
            match document {
                Some(document) => state.put(&collection, key, document),
                None => {
                    state.remove(&collection, &key);
                }
            }
        }

        trace!(writes, options = ?self.options, "transaction committed");
        Ok(())
    }

    async fn abort(self) -> Result<(), Self::Error> {
        let pending = self
            .pending
            .lock()
            .await
            .take()
            .ok_or(Error::TransactionCompleted)?;

        trace!(discarded = pending.staged.len(), "transaction aborted");
        Ok(())
    }
}
