use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Field of a super group record holding its member IDs.
pub const MEMBER_IDS_FIELD: &str = "member_id_list";

/// Field of a member-index record holding the user's super group IDs.
pub const GROUP_IDS_FIELD: &str = "group_id_list";

/// A super group and its members.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct SuperGroup {
    /// The unique identifier of the group.
    #[serde(rename = "_id")]
    pub group_id: String,

    /// Members in insertion order. Never contains duplicates.
    #[serde(rename = "member_id_list", default)]
    pub member_ids: Vec<String>,
}

impl SuperGroup {
    /// Creates a group record, dropping repeated member IDs while keeping the
    /// first occurrence of each.
    pub fn new<I, S>(group_id: impl Into<String>, member_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let member_ids = member_ids
            .into_iter()
            .map(Into::into)
            .filter(|member_id: &String| seen.insert(member_id.clone()))
            .collect();

        Self {
            group_id: group_id.into(),
            member_ids,
        }
    }

    /// Whether `user_id` is a member.
    #[must_use]
    pub fn has_member(&self, user_id: &str) -> bool {
        self.member_ids.iter().any(|member_id| member_id == user_id)
    }
}

/// The reverse index: every super group a user belongs to.
///
/// A user with no record and a user whose record has an empty list are both
/// members of no super groups.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct UserSuperGroups {
    /// The unique identifier of the user.
    #[serde(rename = "_id")]
    pub user_id: String,

    /// Super groups the user belongs to. Order carries no meaning.
    #[serde(rename = "group_id_list", default)]
    pub group_ids: Vec<String>,
}

impl UserSuperGroups {
    /// An index record for a user who belongs to no super groups.
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            group_ids: Vec::new(),
        }
    }

    /// Whether the user belongs to `group_id`.
    #[must_use]
    pub fn contains(&self, group_id: &str) -> bool {
        self.group_ids.iter().any(|id| id == group_id)
    }
}
