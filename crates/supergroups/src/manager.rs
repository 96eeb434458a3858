use crate::context::Interrupted;
use crate::{
    Context, Error, GROUP_IDS_FIELD, MEMBER_IDS_FIELD, Result, StoreError, SuperGroup,
    SuperGroupManagement, SuperGroupManagerOptions, UserSuperGroups,
};

use std::collections::HashSet;
use std::future::Future;

use async_trait::async_trait;
use roster_docstore::{
    Document, DocumentOperations, DocumentStore, DocumentStoreError, DocumentTransaction, Filter,
    PRIMARY_KEY, Update, UpdateOptions, from_document, primary_key, to_document,
};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

/// Super group membership backed by a transactional document store.
#[derive(Clone)]
pub struct SuperGroupManager<D>
where
    D: DocumentStore,
{
    options: SuperGroupManagerOptions,
    store: D,
}

impl<D> SuperGroupManager<D>
where
    D: DocumentStore,
{
    /// Creates a new manager over `store`.
    pub const fn new(store: D, options: SuperGroupManagerOptions) -> Self {
        Self { options, store }
    }

    /// The options the manager was created with.
    pub const fn options(&self) -> &SuperGroupManagerOptions {
        &self.options
    }

    fn groups(&self) -> &str {
        &self.options.group_collection
    }

    fn users(&self) -> &str {
        &self.options.user_collection
    }

    fn decode<T: DeserializeOwned>(
        collection: &str,
        document: Document,
    ) -> Result<T, StoreError<D>> {
        from_document(document).map_err(|source| Error::Codec {
            collection: collection.to_string(),
            source,
        })
    }

    async fn find_group<O>(
        &self,
        ops: &O,
        operation: &'static str,
        group_id: &str,
    ) -> Result<SuperGroup, StoreError<D>>
    where
        O: DocumentOperations<Error = StoreError<D>>,
    {
        let document = ops
            .find_one(self.groups(), Filter::by_id(group_id))
            .await
            .map_err(storage(operation, self.groups()))?
            .ok_or_else(|| Error::NotFound {
                collection: self.groups().to_string(),
                id: group_id.to_string(),
            })?;

        Self::decode(self.groups(), document)
    }

    async fn add_group_to_user<O>(
        &self,
        ops: &O,
        operation: &'static str,
        group_id: &str,
        user_id: &str,
    ) -> Result<bool, StoreError<D>>
    where
        O: DocumentOperations<Error = StoreError<D>>,
    {
        let result = ops
            .update_one(
                self.users(),
                Filter::by_id(user_id),
                Update::add_to_set(GROUP_IDS_FIELD, [group_id]),
                UpdateOptions::upsert(),
            )
            .await
            .map_err(storage(operation, self.users()))?;

        Ok(result.modified > 0 || result.upserted_id.is_some())
    }

    async fn remove_group_from_users<O>(
        &self,
        ops: &O,
        operation: &'static str,
        group_id: &str,
        user_ids: &[String],
    ) -> Result<(), StoreError<D>>
    where
        O: DocumentOperations<Error = StoreError<D>>,
    {
        if user_ids.is_empty() {
            return Ok(());
        }

        ops.update_many(
            self.users(),
            Filter::is_in(PRIMARY_KEY, user_ids.iter().map(String::as_str)),
            Update::pull(GROUP_IDS_FIELD, [group_id]),
        )
        .await
        .map_err(storage(operation, self.users()))?;

        Ok(())
    }

    async fn add_members_in(
        &self,
        txn: &D::Transaction,
        operation: &'static str,
        group_id: &str,
        user_ids: &[String],
    ) -> Result<(), StoreError<D>> {
        let result = txn
            .update_one(
                self.groups(),
                Filter::by_id(group_id),
                Update::add_to_set(MEMBER_IDS_FIELD, user_ids.iter().map(String::as_str)),
                UpdateOptions::default(),
            )
            .await
            .map_err(storage(operation, self.groups()))?;

        if result.matched == 0 {
            return Err(Error::NotFound {
                collection: self.groups().to_string(),
                id: group_id.to_string(),
            });
        }

        for user_id in user_ids {
            self.add_group_to_user(txn, operation, group_id, user_id)
                .await?;
        }

        Ok(())
    }

    async fn remove_members_in(
        &self,
        txn: &D::Transaction,
        operation: &'static str,
        group_id: &str,
        user_ids: &[String],
    ) -> Result<(), StoreError<D>> {
        txn.update_one(
            self.groups(),
            Filter::by_id(group_id),
            Update::pull(MEMBER_IDS_FIELD, user_ids.iter().map(String::as_str)),
            UpdateOptions::default(),
        )
        .await
        .map_err(storage(operation, self.groups()))?;

        self.remove_group_from_users(txn, operation, group_id, user_ids)
            .await
    }

    async fn repair_member_index_in(
        &self,
        txn: &D::Transaction,
        operation: &'static str,
        group_id: &str,
    ) -> Result<usize, StoreError<D>> {
        let group = self.find_group(txn, operation, group_id).await?;

        let mut repaired = 0;
        for user_id in &group.member_ids {
            if self
                .add_group_to_user(txn, operation, group_id, user_id)
                .await?
            {
                repaired += 1;
            }
        }

        Ok(repaired)
    }

    async fn prune_dangling_groups_in(
        &self,
        txn: &D::Transaction,
        operation: &'static str,
        user_id: &str,
    ) -> Result<Vec<String>, StoreError<D>> {
        let Some(document) = txn
            .find_one(self.users(), Filter::by_id(user_id))
            .await
            .map_err(storage(operation, self.users()))?
        else {
            return Ok(Vec::new());
        };

        let record: UserSuperGroups = Self::decode(self.users(), document)?;
        if record.group_ids.is_empty() {
            return Ok(Vec::new());
        }

        let existing: HashSet<String> = txn
            .find(
                self.groups(),
                Filter::is_in(PRIMARY_KEY, record.group_ids.iter().map(String::as_str)),
            )
            .await
            .map_err(storage(operation, self.groups()))?
            .iter()
            .filter_map(|document| primary_key(document).map(str::to_string))
            .collect();

        let dangling: Vec<String> = record
            .group_ids
            .into_iter()
            .filter(|group_id| !existing.contains(group_id))
            .collect();

        if !dangling.is_empty() {
            txn.update_one(
                self.users(),
                Filter::by_id(user_id),
                Update::pull(GROUP_IDS_FIELD, dangling.iter().map(String::as_str)),
                UpdateOptions::default(),
            )
            .await
            .map_err(storage(operation, self.users()))?;
        }

        Ok(dangling)
    }

    async fn start_transaction(
        &self,
        ctx: &Context,
        operation: &'static str,
    ) -> Result<D::Transaction, StoreError<D>> {
        guarded(ctx, operation, async {
            self.store
                .start_transaction(self.options.transaction)
                .await
                .map_err(|source| Error::Transaction { operation, source })
        })
        .await
    }

    /// Commits the transaction if the body succeeded and the context is still
    /// live, aborts it otherwise.
    async fn finish<T>(
        ctx: &Context,
        operation: &'static str,
        txn: D::Transaction,
        outcome: std::result::Result<Result<T, StoreError<D>>, Interrupted>,
    ) -> Result<T, StoreError<D>> {
        let error = match outcome {
            Ok(Ok(value)) => match ctx.interruption() {
                None => {
                    txn.commit().await.map_err(|source| Error::Aborted {
                        operation,
                        stage: "commit".to_string(),
                        source,
                    })?;
                    return Ok(value);
                }
                Some(interrupted) => Error::interrupted(operation, interrupted),
            },
            Ok(Err(error)) => into_aborted(error),
            Err(interrupted) => Error::interrupted(operation, interrupted),
        };

        if let Err(abort_error) = txn.abort().await {
            warn!(operation, %abort_error, "failed to abort transaction");
        }

        Err(error)
    }
}

#[async_trait]
impl<D> SuperGroupManagement for SuperGroupManager<D>
where
    D: DocumentStore,
{
    type Store = D;

    #[instrument(skip_all, fields(group_id = %group_id, users = user_ids.len()))]
    async fn add_members(
        &self,
        ctx: &Context,
        group_id: &str,
        user_ids: &[String],
    ) -> Result<(), StoreError<D>> {
        const OPERATION: &str = "add_members";

        let txn = self.start_transaction(ctx, OPERATION).await?;
        let outcome = ctx
            .run(self.add_members_in(&txn, OPERATION, group_id, user_ids))
            .await;
        Self::finish(ctx, OPERATION, txn, outcome).await?;

        debug!("members added");
        Ok(())
    }

    #[instrument(skip_all, fields(group_id = %group_id, members = initial_member_ids.len()))]
    async fn create_super_group(
        &self,
        ctx: &Context,
        group_id: &str,
        initial_member_ids: &[String],
    ) -> Result<(), StoreError<D>> {
        const OPERATION: &str = "create_super_group";

        let group = SuperGroup::new(group_id, initial_member_ids);
        let document = to_document(&group).map_err(|source| Error::Codec {
            collection: self.groups().to_string(),
            source,
        })?;

        guarded(ctx, OPERATION, async {
            self.store
                .insert_one(self.groups(), document)
                .await
                .map_err(|source| {
                    if source.is_duplicate_key() {
                        Error::AlreadyExists(group_id.to_string())
                    } else {
                        storage(OPERATION, self.groups())(source)
                    }
                })
        })
        .await?;

        for user_id in &group.member_ids {
            let indexed = guarded(
                ctx,
                OPERATION,
                self.add_group_to_user(&self.store, OPERATION, group_id, user_id),
            )
            .await;

            if let Err(error) = indexed {
                warn!(
                    %user_id,
                    %error,
                    "group record inserted but member index is incomplete"
                );
                return Err(error);
            }
        }

        debug!("super group created");
        Ok(())
    }

    #[instrument(skip_all, fields(group_id = %group_id))]
    async fn delete_super_group(&self, ctx: &Context, group_id: &str) -> Result<(), StoreError<D>> {
        const OPERATION: &str = "delete_super_group";

        let group = guarded(
            ctx,
            OPERATION,
            self.find_group(&self.store, OPERATION, group_id),
        )
        .await?;

        let deleted = guarded(ctx, OPERATION, async {
            self.store
                .delete_one(self.groups(), Filter::by_id(group_id))
                .await
                .map_err(storage(OPERATION, self.groups()))
        })
        .await?;

        // Someone else deleted it between our read and delete; they own the cleanup.
        if deleted == 0 {
            return Err(Error::NotFound {
                collection: self.groups().to_string(),
                id: group_id.to_string(),
            });
        }

        let cleaned = guarded(
            ctx,
            OPERATION,
            self.remove_group_from_users(&self.store, OPERATION, group_id, &group.member_ids),
        )
        .await;

        if let Err(error) = cleaned {
            warn!(
                members = group.member_ids.len(),
                %error,
                "group record deleted but member index still references it"
            );
            return Err(error);
        }

        debug!(members = group.member_ids.len(), "super group deleted");
        Ok(())
    }

    async fn get_groups_for_user(
        &self,
        ctx: &Context,
        user_id: &str,
    ) -> Result<UserSuperGroups, StoreError<D>> {
        const OPERATION: &str = "get_groups_for_user";

        let document = guarded(ctx, OPERATION, async {
            self.store
                .find_one(self.users(), Filter::by_id(user_id))
                .await
                .map_err(storage(OPERATION, self.users()))
        })
        .await?
        .ok_or_else(|| Error::NotFound {
            collection: self.users().to_string(),
            id: user_id.to_string(),
        })?;

        Self::decode(self.users(), document)
    }

    async fn get_super_group(
        &self,
        ctx: &Context,
        group_id: &str,
    ) -> Result<SuperGroup, StoreError<D>> {
        const OPERATION: &str = "get_super_group";

        guarded(
            ctx,
            OPERATION,
            self.find_group(&self.store, OPERATION, group_id),
        )
        .await
    }

    async fn get_super_groups(
        &self,
        ctx: &Context,
        group_ids: &[String],
    ) -> Result<Vec<SuperGroup>, StoreError<D>> {
        const OPERATION: &str = "get_super_groups";

        if group_ids.is_empty() {
            return Ok(Vec::new());
        }

        let documents = guarded(ctx, OPERATION, async {
            self.store
                .find(
                    self.groups(),
                    Filter::is_in(PRIMARY_KEY, group_ids.iter().map(String::as_str)),
                )
                .await
                .map_err(storage(OPERATION, self.groups()))
        })
        .await?;

        documents
            .into_iter()
            .map(|document| Self::decode(self.groups(), document))
            .collect()
    }

    #[instrument(skip_all, fields(user_id = %user_id))]
    async fn prune_dangling_groups(
        &self,
        ctx: &Context,
        user_id: &str,
    ) -> Result<Vec<String>, StoreError<D>> {
        const OPERATION: &str = "prune_dangling_groups";

        let txn = self.start_transaction(ctx, OPERATION).await?;
        let outcome = ctx
            .run(self.prune_dangling_groups_in(&txn, OPERATION, user_id))
            .await;
        let pruned = Self::finish(ctx, OPERATION, txn, outcome).await?;

        if !pruned.is_empty() {
            debug!(?pruned, "dangling group references removed");
        }
        Ok(pruned)
    }

    #[instrument(skip_all, fields(group_id = %group_id, users = user_ids.len()))]
    async fn remove_members(
        &self,
        ctx: &Context,
        group_id: &str,
        user_ids: &[String],
    ) -> Result<(), StoreError<D>> {
        const OPERATION: &str = "remove_members";

        let txn = self.start_transaction(ctx, OPERATION).await?;
        let outcome = ctx
            .run(self.remove_members_in(&txn, OPERATION, group_id, user_ids))
            .await;
        Self::finish(ctx, OPERATION, txn, outcome).await?;

        debug!("members removed");
        Ok(())
    }

    #[instrument(skip_all, fields(group_id = %group_id))]
    async fn repair_member_index(
        &self,
        ctx: &Context,
        group_id: &str,
    ) -> Result<usize, StoreError<D>> {
        const OPERATION: &str = "repair_member_index";

        let txn = self.start_transaction(ctx, OPERATION).await?;
        let outcome = ctx
            .run(self.repair_member_index_in(&txn, OPERATION, group_id))
            .await;
        let repaired = Self::finish(ctx, OPERATION, txn, outcome).await?;

        if repaired > 0 {
            debug!(repaired, "member index repaired");
        }
        Ok(repaired)
    }
}

/// Runs `future` under the caller's context.
async fn guarded<T, DE, F>(ctx: &Context, operation: &'static str, future: F) -> Result<T, DE>
where
    DE: DocumentStoreError,
    F: Future<Output = Result<T, DE>>,
{
    ctx.run(future)
        .await
        .map_err(|interrupted| Error::interrupted(operation, interrupted))?
}

fn storage<DE: DocumentStoreError>(
    operation: &'static str,
    collection: &str,
) -> impl FnOnce(DE) -> Error<DE> {
    move |source| Error::Storage {
        operation,
        collection: collection.to_string(),
        source,
    }
}

/// Inside a transaction a failed store call means the whole transaction is
/// rolled back.
fn into_aborted<DE: DocumentStoreError>(error: Error<DE>) -> Error<DE> {
    match error {
        Error::Storage {
            operation,
            collection,
            source,
        } => Error::Aborted {
            operation,
            stage: format!("`{collection}`"),
            source,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use roster_docstore_memory::{FailPoint, MemoryDocumentStore, Operation};

    fn manager() -> (MemoryDocumentStore, SuperGroupManager<MemoryDocumentStore>) {
        let store = MemoryDocumentStore::new();
        let manager = SuperGroupManager::new(store.clone(), SuperGroupManagerOptions::default());
        (store, manager)
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn test_incomplete_create_is_logged() {
        let (store, manager) = manager();
        store.configure_fail_point(
            FailPoint::error(Operation::Update)
                .in_collection("user_to_super_group")
                .skip(1),
        );

        let result = manager
            .create_super_group(&Context::background(), "g1", &ids(&["u1", "u2"]))
            .await;

        assert_matches!(result, Err(Error::Storage { .. }));
        assert!(logs_contain("member index is incomplete"));
        assert!(logs_contain("u2"));
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn test_incomplete_delete_is_logged() {
        let (store, manager) = manager();
        let ctx = Context::background();
        manager
            .create_super_group(&ctx, "g1", &ids(&["u1"]))
            .await
            .unwrap();
        store.configure_fail_point(
            FailPoint::error(Operation::Update).in_collection("user_to_super_group"),
        );

        let result = manager.delete_super_group(&ctx, "g1").await;

        assert_matches!(result, Err(Error::Storage { .. }));
        assert!(logs_contain("member index still references it"));
    }

    #[tokio::test]
    async fn test_storage_errors_become_aborted_inside_transactions() {
        let (store, manager) = manager();
        let ctx = Context::background();
        manager.create_super_group(&ctx, "g1", &[]).await.unwrap();
        store.configure_fail_point(FailPoint::error(Operation::Update).in_collection("super_group"));

        let result = manager.add_members(&ctx, "g1", &ids(&["u1"])).await;

        assert_matches!(
            result,
            Err(Error::Aborted { operation: "add_members", ref stage, .. }) if stage == "`super_group`"
        );
    }

    #[test]
    fn test_into_aborted_keeps_other_errors() {
        let error: Error<roster_docstore_memory::Error> = Error::AlreadyExists("g1".to_string());

        assert_matches!(into_aborted(error), Error::AlreadyExists(ref id) if id == "g1");
    }
}
