use crate::document::Document;

use serde_json::Value;
use thiserror::Error;

/// Errors raised while applying an update to a document.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UpdateError {
    /// A set operator targeted a field that is not an array.
    #[error("field `{0}` is not an array")]
    NotAnArray(String),
}

/// A set-semantics modification of an array field.
#[derive(Clone, Debug, PartialEq)]
pub enum Update {
    /// Appends each value not already present. Creates the field if missing.
    AddToSet {
        /// Array field name.
        field: String,
        /// Values to add.
        values: Vec<Value>,
    },

    /// Removes every element equal to one of the values.
    Pull {
        /// Array field name.
        field: String,
        /// Values to remove.
        values: Vec<Value>,
    },
}

impl Update {
    /// Adds `values` to the array `field`, skipping those already present.
    pub fn add_to_set<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::AddToSet {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Removes all occurrences of `values` from the array `field`.
    pub fn pull<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Pull {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Applies the update in place. Returns whether the document changed.
    ///
    /// # Errors
    ///
    /// Fails if the target field exists and is not an array.
    pub fn apply(&self, document: &mut Document) -> Result<bool, UpdateError> {
        match self {
            Self::AddToSet { field, values } => {
                let elements = document
                    .entry(field.clone())
                    .or_insert_with(|| Value::Array(Vec::new()))
                    .as_array_mut()
                    .ok_or_else(|| UpdateError::NotAnArray(field.clone()))?;

                let before = elements.len();
                for value in values {
                    if !elements.contains(value) {
                        elements.push(value.clone());
                    }
                }
                Ok(elements.len() != before)
            }
            Self::Pull { field, values } => {
                let Some(existing) = document.get_mut(field) else {
                    return Ok(false);
                };
                let elements = existing
                    .as_array_mut()
                    .ok_or_else(|| UpdateError::NotAnArray(field.clone()))?;

                let before = elements.len();
                elements.retain(|element| !values.contains(element));
                Ok(elements.len() != before)
            }
        }
    }
}

/// Options for single-document updates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Create the document when nothing matches the filter.
    pub upsert: bool,
}

impl UpdateOptions {
    /// Options with upsert enabled.
    #[must_use]
    pub const fn upsert() -> Self {
        Self { upsert: true }
    }
}

/// Outcome of an update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateResult {
    /// Number of documents that matched the filter.
    pub matched: u64,

    /// Number of matched documents that actually changed.
    pub modified: u64,

    /// Primary key of the document created by an upsert.
    pub upserted_id: Option<String>,
}
