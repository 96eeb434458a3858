use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::ser::Error as _;
use serde_json::{Map, Value};

/// A stored document.
pub type Document = Map<String, Value>;

/// Name of the primary key field present in every document.
pub const PRIMARY_KEY: &str = "_id";

/// Returns the document's primary key, if it has a string `_id`.
#[must_use]
pub fn primary_key(document: &Document) -> Option<&str> {
    document.get(PRIMARY_KEY).and_then(Value::as_str)
}

/// Serializes a record into a document.
///
/// # Errors
///
/// Fails if the record does not serialize to a JSON object.
pub fn to_document<T: Serialize>(record: &T) -> serde_json::Result<Document> {
    match serde_json::to_value(record)? {
        Value::Object(document) => Ok(document),
        other => Err(serde_json::Error::custom(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// Deserializes a record from a document.
///
/// # Errors
///
/// Fails if the document does not match the record's shape.
pub fn from_document<T: DeserializeOwned>(document: Document) -> serde_json::Result<T> {
    serde_json::from_value(Value::Object(document))
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct Record {
        #[serde(rename = "_id")]
        id: String,
        tags: Vec<String>,
    }

    #[test]
    fn test_record_through_document() {
        let record = Record {
            id: "r1".to_string(),
            tags: vec!["a".to_string()],
        };

        let document = to_document(&record).unwrap();
        assert_eq!(primary_key(&document), Some("r1"));
        assert_eq!(document.get("tags"), Some(&json!(["a"])));

        let decoded: Record = from_document(document).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(to_document(&vec![1, 2, 3]).is_err());
    }

    #[test]
    fn test_primary_key_must_be_string() {
        let document = json!({ "_id": 7 }).as_object().cloned().unwrap();
        assert_eq!(primary_key(&document), None);
    }
}
