use roster_docstore::TransactionOptions;
use serde::Deserialize;

/// Options for creating a [`SuperGroupManager`](crate::SuperGroupManager).
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SuperGroupManagerOptions {
    /// Collection holding group records.
    pub group_collection: String,

    /// Collection holding member-index records.
    pub user_collection: String,

    /// Read and write concern for membership transactions.
    pub transaction: TransactionOptions,
}

impl Default for SuperGroupManagerOptions {
    fn default() -> Self {
        Self {
            group_collection: "super_group".to_string(),
            user_collection: "user_to_super_group".to_string(),
            transaction: TransactionOptions::majority(),
        }
    }
}
