//! Membership store for super groups.
//!
//! Keeps two collections in step: the group records (group to members) and
//! the member index (member to groups). A user appears in a group's member
//! list if and only if the group appears in that user's index record.
//!
//! Adding and removing members runs in a single majority-acknowledged
//! transaction, so readers never observe one side without the other.
//! Creating and deleting a group are multi-step and not transactional: a
//! failure part way leaves the collections out of step, which is reported
//! as an error and can be healed with
//! [`repair_member_index`](SuperGroupManagement::repair_member_index) and
//! [`prune_dangling_groups`](SuperGroupManagement::prune_dangling_groups).
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod context;
mod error;
mod group;
mod manager;
mod options;

pub use context::Context;
pub use error::{Error, Result};
pub use group::{GROUP_IDS_FIELD, MEMBER_IDS_FIELD, SuperGroup, UserSuperGroups};
pub use manager::SuperGroupManager;
pub use options::SuperGroupManagerOptions;

use async_trait::async_trait;
use roster_docstore::{DocumentOperations, DocumentStore};

/// Error type of the document store behind a [`SuperGroupManagement`].
pub type StoreError<D> = <D as DocumentOperations>::Error;

/// Trait for managing super group membership.
///
/// Implementations hold no mutable state of their own and are shared freely
/// between concurrent callers. Every method is a round trip to the store and
/// honours the cancellation and deadline of the supplied [`Context`]. No
/// method retries internally.
#[async_trait]
pub trait SuperGroupManagement
where
    Self: Clone + Send + Sync + 'static,
{
    /// The document store holding both collections.
    type Store: DocumentStore;

    /// Adds users to a group and the group to each user's index, atomically.
    ///
    /// Users that are already members are left as they are. If any step
    /// fails the whole change is rolled back and [`Error::Aborted`] is
    /// returned. A group that does not exist yields [`Error::NotFound`] and
    /// nothing is written.
    async fn add_members(
        &self,
        ctx: &Context,
        group_id: &str,
        user_ids: &[String],
    ) -> Result<(), StoreError<Self::Store>>;

    /// Creates a group with an initial member list and indexes each member.
    ///
    /// Repeated IDs in `initial_member_ids` are stored once. Returns
    /// [`Error::AlreadyExists`] if the group ID is taken.
    ///
    /// Not transactional: if indexing a member fails after the group record
    /// was inserted, the error is returned and the group record and any
    /// members indexed so far are kept. Call
    /// [`repair_member_index`](Self::repair_member_index) or retry.
    async fn create_super_group(
        &self,
        ctx: &Context,
        group_id: &str,
        initial_member_ids: &[String],
    ) -> Result<(), StoreError<Self::Store>>;

    /// Deletes a group and removes it from every former member's index.
    ///
    /// Not transactional: if the index cleanup fails after the group record
    /// was deleted, the error is returned and some members keep a dangling
    /// reference. Lookups of that group then report [`Error::NotFound`].
    /// Call [`prune_dangling_groups`](Self::prune_dangling_groups) for the
    /// affected users.
    ///
    /// The cleanup uses the member list read before the delete. Members added
    /// by an [`add_members`](Self::add_members) that commits between that
    /// read and the delete keep a dangling reference too, and are healed the
    /// same way.
    async fn delete_super_group(
        &self,
        ctx: &Context,
        group_id: &str,
    ) -> Result<(), StoreError<Self::Store>>;

    /// Returns the super groups `user_id` belongs to.
    ///
    /// A user who never joined a super group has no index record and yields
    /// [`Error::NotFound`]. Treat that as an empty set, for example with
    /// [`UserSuperGroups::empty`].
    async fn get_groups_for_user(
        &self,
        ctx: &Context,
        user_id: &str,
    ) -> Result<UserSuperGroups, StoreError<Self::Store>>;

    /// Returns a single group.
    async fn get_super_group(
        &self,
        ctx: &Context,
        group_id: &str,
    ) -> Result<SuperGroup, StoreError<Self::Store>>;

    /// Returns the groups among `group_ids` that exist. Missing IDs are
    /// skipped silently.
    async fn get_super_groups(
        &self,
        ctx: &Context,
        group_ids: &[String],
    ) -> Result<Vec<SuperGroup>, StoreError<Self::Store>>;

    /// Removes `user_id` index entries that point at groups which no longer
    /// exist. Returns the removed group IDs.
    async fn prune_dangling_groups(
        &self,
        ctx: &Context,
        user_id: &str,
    ) -> Result<Vec<String>, StoreError<Self::Store>>;

    /// Removes users from a group and the group from each user's index,
    /// atomically.
    ///
    /// Users that are not members are ignored.
    async fn remove_members(
        &self,
        ctx: &Context,
        group_id: &str,
        user_ids: &[String],
    ) -> Result<(), StoreError<Self::Store>>;

    /// Ensures every current member of the group has the group in their
    /// index record. Returns how many index records changed.
    async fn repair_member_index(
        &self,
        ctx: &Context,
        group_id: &str,
    ) -> Result<usize, StoreError<Self::Store>>;
}
