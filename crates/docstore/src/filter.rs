use crate::document::{Document, PRIMARY_KEY};

use serde_json::Value;

/// Selects the documents an operation applies to.
///
/// When the field holds an array, a value matches if any element of the array
/// equals it.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// The field equals `value`.
    Eq {
        /// Field name.
        field: String,
        /// Value to compare with.
        value: Value,
    },

    /// The field equals one of `values`.
    In {
        /// Field name.
        field: String,
        /// Accepted values.
        values: Vec<Value>,
    },
}

impl Filter {
    /// Matches documents whose `field` equals `value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Matches the document with the given primary key.
    pub fn by_id(id: impl Into<String>) -> Self {
        Self::eq(PRIMARY_KEY, id.into())
    }

    /// Matches documents whose `field` equals any of `values`.
    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Tests a document against the filter.
    #[must_use]
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Self::Eq { field, value } => document
                .get(field)
                .is_some_and(|actual| value_matches(actual, value)),
            Self::In { field, values } => document
                .get(field)
                .is_some_and(|actual| values.iter().any(|value| value_matches(actual, value))),
        }
    }

    /// The primary keys this filter is restricted to, when it is an equality
    /// or set membership test on `_id`. Non-string values never match a key
    /// and are skipped.
    #[must_use]
    pub fn primary_keys(&self) -> Option<Vec<&str>> {
        match self {
            Self::Eq { field, value } if field == PRIMARY_KEY => {
                Some(value.as_str().into_iter().collect())
            }
            Self::In { field, values } if field == PRIMARY_KEY => {
                Some(values.iter().filter_map(Value::as_str).collect())
            }
            _ => None,
        }
    }

    /// The document an upsert starts from when nothing matches.
    ///
    /// Only equality filters describe a single document to create.
    #[must_use]
    pub fn upsert_seed(&self) -> Option<Document> {
        match self {
            Self::Eq { field, value } => {
                let mut document = Document::new();
                document.insert(field.clone(), value.clone());
                Some(document)
            }
            Self::In { .. } => None,
        }
    }
}

fn value_matches(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(elements) if !expected.is_array() => elements.contains(expected),
        _ => actual == expected,
    }
}
