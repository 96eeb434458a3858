use std::fmt;
use std::time::Duration;

/// Store operations a fail point can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Committing a transaction.
    Commit,
    /// `delete_one`.
    Delete,
    /// `find` and `find_one`.
    Find,
    /// `insert_one`.
    Insert,
    /// Starting a transaction.
    StartTransaction,
    /// `update_one` and `update_many`.
    Update,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Commit => "commit",
            Self::Delete => "delete",
            Self::Find => "find",
            Self::Insert => "insert",
            Self::StartTransaction => "start_transaction",
            Self::Update => "update",
        };
        f.write_str(name)
    }
}

/// What happens when a fail point fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailAction {
    /// The operation returns [`Error::FailPoint`](crate::Error::FailPoint)
    /// without touching any data.
    Error,

    /// The operation is held back for the given duration, then runs normally.
    Delay(Duration),
}

/// Deterministic failure injection for a store operation.
///
/// ```
/// use roster_docstore_memory::{FailPoint, Operation};
///
/// // Fail the second update against `users`, once.
/// let fail_point = FailPoint::error(Operation::Update)
///     .in_collection("users")
///     .skip(1);
/// ```
#[derive(Clone, Debug)]
pub struct FailPoint {
    action: FailAction,
    collection: Option<String>,
    operation: Operation,
    remaining: Option<usize>,
    skip: usize,
}

impl FailPoint {
    /// Fails the next matching operation.
    #[must_use]
    pub const fn error(operation: Operation) -> Self {
        Self::new(operation, FailAction::Error)
    }

    /// Delays the next matching operation.
    #[must_use]
    pub const fn delay(operation: Operation, duration: Duration) -> Self {
        Self::new(operation, FailAction::Delay(duration))
    }

    const fn new(operation: Operation, action: FailAction) -> Self {
        Self {
            action,
            collection: None,
            operation,
            remaining: Some(1),
            skip: 0,
        }
    }

    /// Only fire for operations against `collection`.
    #[must_use]
    pub fn in_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Let the first `count` matching operations through untouched.
    #[must_use]
    pub const fn skip(mut self, count: usize) -> Self {
        self.skip = count;
        self
    }

    /// Fire for `count` matching operations, then disarm.
    #[must_use]
    pub const fn times(mut self, count: usize) -> Self {
        self.remaining = Some(count);
        self
    }

    /// Fire for every matching operation until cleared.
    #[must_use]
    pub const fn always(mut self) -> Self {
        self.remaining = None;
        self
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    pub(crate) fn trigger(
        &mut self,
        operation: Operation,
        collection: Option<&str>,
    ) -> Option<FailAction> {
        if self.operation != operation || self.is_exhausted() {
            return None;
        }

        if let Some(target) = &self.collection {
            if collection != Some(target.as_str()) {
                return None;
            }
        }

        if self.skip > 0 {
            self.skip -= 1;
            return None;
        }

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }

        Some(self.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_then_fire_once() {
        let mut fail_point = FailPoint::error(Operation::Update)
            .in_collection("users")
            .skip(1);

        assert_eq!(fail_point.trigger(Operation::Update, Some("users")), None);
        assert_eq!(
            fail_point.trigger(Operation::Update, Some("users")),
            Some(FailAction::Error)
        );
        assert!(fail_point.is_exhausted());
        assert_eq!(fail_point.trigger(Operation::Update, Some("users")), None);
    }

    #[test]
    fn test_ignores_other_operations_and_collections() {
        let mut fail_point = FailPoint::error(Operation::Update).in_collection("users");

        assert_eq!(fail_point.trigger(Operation::Insert, Some("users")), None);
        assert_eq!(fail_point.trigger(Operation::Update, Some("groups")), None);
        assert_eq!(fail_point.trigger(Operation::Update, None), None);
        assert!(!fail_point.is_exhausted());
    }

    #[test]
    fn test_always_never_exhausts() {
        let mut fail_point = FailPoint::delay(Operation::Commit, Duration::from_millis(5)).always();

        for _ in 0..3 {
            assert_eq!(
                fail_point.trigger(Operation::Commit, None),
                Some(FailAction::Delay(Duration::from_millis(5)))
            );
        }
        assert!(!fail_point.is_exhausted());
    }
}
