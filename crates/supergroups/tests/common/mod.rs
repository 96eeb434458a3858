#![allow(dead_code)]

use roster_docstore_memory::MemoryDocumentStore;
use roster_supergroups::{
    Context, SuperGroupManagement, SuperGroupManager, SuperGroupManagerOptions,
};

pub const GROUPS: &str = "super_group";
pub const USERS: &str = "user_to_super_group";

pub fn setup() -> (MemoryDocumentStore, SuperGroupManager<MemoryDocumentStore>) {
    let store = MemoryDocumentStore::new();
    let manager = SuperGroupManager::new(store.clone(), SuperGroupManagerOptions::default());
    (store, manager)
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

/// Groups `user_id` belongs to according to the member index, treating a
/// missing record as no groups.
pub async fn indexed_groups(
    manager: &SuperGroupManager<MemoryDocumentStore>,
    user_id: &str,
) -> Vec<String> {
    match manager
        .get_groups_for_user(&Context::background(), user_id)
        .await
    {
        Ok(record) => record.group_ids,
        Err(error) if error.is_not_found() => Vec::new(),
        Err(error) => panic!("unexpected error reading index of {user_id}: {error}"),
    }
}

/// Checks `user ∈ group.members ⇔ group ∈ user's index` over the given
/// universe of groups and users.
pub async fn assert_consistent(
    manager: &SuperGroupManager<MemoryDocumentStore>,
    group_ids: &[&str],
    user_ids: &[&str],
) {
    let ctx = Context::background();
    let groups = manager
        .get_super_groups(&ctx, &ids(group_ids))
        .await
        .unwrap();

    for user_id in user_ids {
        let indexed = indexed_groups(manager, user_id).await;

        for group in &groups {
            assert_eq!(
                group.has_member(user_id),
                indexed.contains(&group.group_id),
                "membership of {user_id} in {} disagrees with the index",
                group.group_id
            );
        }
    }
}
