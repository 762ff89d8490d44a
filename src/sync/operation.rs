//! Queued mutations

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Kind of mutation to replay against the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Create => write!(f, "create"),
            OperationType::Update => write!(f, "update"),
            OperationType::Delete => write!(f, "delete"),
        }
    }
}

/// A mutation waiting to be applied remotely
///
/// Persisted as `{ id, type, collection, data, timestamp }`. Handlers should
/// apply operations idempotently (e.g. upsert keyed by `id`): a batch is
/// replayed whole when it fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: String,

    #[serde(rename = "type")]
    pub op_type: OperationType,

    /// Backend collection, e.g. `workouts`
    pub collection: String,

    pub data: Value,

    /// Enqueue time, epoch milliseconds
    pub timestamp: i64,
}

/// Mutation as submitted by callers; id and timestamp are assigned on enqueue
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub op_type: OperationType,
    pub collection: String,
    pub data: Value,
}

impl NewOperation {
    pub fn new(op_type: OperationType, collection: impl Into<String>, data: Value) -> Self {
        Self {
            op_type,
            collection: collection.into(),
            data,
        }
    }

    pub fn create(collection: impl Into<String>, data: Value) -> Self {
        Self::new(OperationType::Create, collection, data)
    }

    pub fn update(collection: impl Into<String>, data: Value) -> Self {
        Self::new(OperationType::Update, collection, data)
    }

    pub fn delete(collection: impl Into<String>, data: Value) -> Self {
        Self::new(OperationType::Delete, collection, data)
    }

    /// Stamp the operation with an id and enqueue time
    pub(crate) fn into_operation(self, now_millis: i64) -> SyncOperation {
        SyncOperation {
            id: generate_operation_id(now_millis),
            op_type: self.op_type,
            collection: self.collection,
            data: self.data,
            timestamp: now_millis,
        }
    }
}

/// `<epoch ms><9 random hex chars>`
fn generate_operation_id(now_millis: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}{}", now_millis, &suffix[..9])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_blob_layout() {
        let op = NewOperation::create("weightLog", json!({ "kg": 80.2 })).into_operation(1_700_000_000_000);

        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["type"], "create");
        assert_eq!(value["collection"], "weightLog");
        assert_eq!(value["data"]["kg"], 80.2);
        assert_eq!(value["timestamp"], 1_700_000_000_000i64);
        assert!(value["id"].as_str().unwrap().starts_with("1700000000000"));

        let parsed: SyncOperation = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, op);
    }

    #[test]
    fn test_ids_are_unique_within_same_millisecond() {
        let a = NewOperation::delete("goals", json!({ "id": "g1" })).into_operation(42);
        let b = NewOperation::delete("goals", json!({ "id": "g1" })).into_operation(42);

        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), "42".len() + 9);
    }

    #[test]
    fn test_operation_type_names() {
        assert_eq!(OperationType::Update.to_string(), "update");
        let parsed: OperationType = serde_json::from_str("\"delete\"").unwrap();
        assert_eq!(parsed, OperationType::Delete);
    }
}
