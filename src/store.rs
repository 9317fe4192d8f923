use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::Collection;

/// A store row: a flat JSON object, nullable columns written as explicit `null`.
pub type Row = Map<String, Value>;

/// Change notifications for one collection, in delivery order.
pub type ChangeStream = BoxStream<'static, Result<RowChange, StoreError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One notification from the store's publish/subscribe channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub kind: ChangeKind,
    /// Row after the change; absent on DELETE.
    pub new: Option<Row>,
    /// Row before the change; may carry only the key.
    pub old: Option<Row>,
}

impl RowChange {
    /// The row that identifies the changed entity: `new`, falling back to `old`.
    pub fn row(&self) -> Option<&Row> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store answered and refused the request.
    Rejected(String),
    /// The request never completed.
    Network(String),
    /// A subscriber fell behind and missed this many notifications.
    Lagged(u64),
    /// The subscription is gone.
    Closed,
}

impl StoreError {
    pub fn is_network(&self) -> bool {
        matches!(self, StoreError::Network(_))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Rejected(msg) => write!(f, "store rejected request: {msg}"),
            StoreError::Network(msg) => write!(f, "network failure: {msg}"),
            StoreError::Lagged(n) => write!(f, "subscription lagged by {n} notifications"),
            StoreError::Closed => write!(f, "subscription closed"),
        }
    }
}

impl std::error::Error for StoreError {}

/// The remote row store, consumed only through these primitives.
///
/// Every write addresses a single row by its `id` column.
#[async_trait]
pub trait RowStore: Send + Sync + 'static {
    async fn select(&self, collection: Collection) -> Result<Vec<Row>, StoreError>;

    async fn insert(&self, collection: Collection, row: Row) -> Result<(), StoreError>;

    /// Overwrite the given columns of the row with this id.
    async fn update(&self, collection: Collection, id: &str, fields: Row) -> Result<(), StoreError>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError>;

    async fn subscribe(&self, collection: Collection) -> Result<ChangeStream, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Row {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn change_row_prefers_new() {
        let change = RowChange {
            kind: ChangeKind::Update,
            new: Some(obj(json!({"id": "T1", "status": "FREE"}))),
            old: Some(obj(json!({"id": "T1"}))),
        };
        assert_eq!(change.row().unwrap().get("status"), Some(&json!("FREE")));

        let delete = RowChange {
            kind: ChangeKind::Delete,
            new: None,
            old: Some(obj(json!({"id": "r9"}))),
        };
        assert_eq!(delete.row().unwrap().get("id"), Some(&json!("r9")));
    }

    #[test]
    fn error_display() {
        assert!(StoreError::Network("timeout".into()).is_network());
        assert!(!StoreError::Rejected("constraint".into()).is_network());
        assert_eq!(
            StoreError::Lagged(7).to_string(),
            "subscription lagged by 7 notifications"
        );
    }

    #[test]
    fn change_kind_wire_names() {
        assert_eq!(serde_json::to_string(&ChangeKind::Delete).unwrap(), "\"DELETE\"");
    }
}
