use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{stream, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Semaphore};
use ulid::Ulid;

use crate::model::Collection;
use crate::notify::ChangeHub;
use crate::store::*;

/// In-process row store with publish/subscribe, used by tests, the stress
/// bench and the demo host. Rows live in memory only.
///
/// Writes can be made to fail (`fail_next_write`, `set_offline`) or to park
/// until released (`with_write_gate`), to exercise the client's failure paths.
pub struct MemoryStore {
    tables: DashMap<String, Row>,
    reservations: DashMap<String, Row>,
    hub: ChangeHub,
    scripted: Mutex<VecDeque<Result<(), StoreError>>>,
    offline: AtomicBool,
    write_gate: Option<Arc<Semaphore>>,
    latency: Option<Duration>,
    writes: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            reservations: DashMap::new(),
            hub: ChangeHub::new(),
            scripted: Mutex::new(VecDeque::new()),
            offline: AtomicBool::new(false),
            write_gate: None,
            latency: None,
            writes: AtomicU64::new(0),
        }
    }

    /// Every write waits for a permit from `release_writes` before it runs.
    pub fn with_write_gate(mut self) -> Self {
        self.write_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Delay every request by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Notification channel depth per collection.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.hub = ChangeHub::with_capacity(capacity);
        self
    }

    fn rows(&self, collection: Collection) -> &DashMap<String, Row> {
        match collection {
            Collection::Tables => &self.tables,
            Collection::Reservations => &self.reservations,
        }
    }

    /// Provision rows directly, without notifications.
    pub fn seed(&self, collection: Collection, rows: impl IntoIterator<Item = Row>) {
        for row in rows {
            if let Some(Value::String(id)) = row.get("id") {
                self.rows(collection).insert(id.clone(), row);
            }
        }
    }

    pub fn row(&self, collection: Collection, id: &str) -> Option<Row> {
        self.rows(collection).get(id).map(|r| r.value().clone())
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.rows(collection).len()
    }

    pub fn is_empty(&self, collection: Collection) -> bool {
        self.rows(collection).is_empty()
    }

    /// Number of writes that reached the store, failed ones included.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// The next unscripted write fails with `err` (queued, one per call).
    pub fn fail_next_write(&self, err: StoreError) {
        self.script(Err(err));
    }

    /// The next unscripted write goes through; lets a later one be made to fail.
    pub fn pass_next_write(&self) {
        self.script(Ok(()));
    }

    fn script(&self, outcome: Result<(), StoreError>) {
        if let Ok(mut queue) = self.scripted.lock() {
            queue.push_back(outcome);
        }
    }

    /// While offline every request fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Let `n` parked writes proceed.
    pub fn release_writes(&self, n: usize) {
        if let Some(gate) = &self.write_gate {
            gate.add_permits(n);
        }
    }

    /// Publish a change as if another client had written it.
    pub fn inject(&self, collection: Collection, change: RowChange) {
        self.hub.send(collection, &change);
    }

    /// Close all subscriptions.
    pub fn shutdown(&self) {
        self.hub.close(Collection::Tables);
        self.hub.close(Collection::Reservations);
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Network("store unreachable".into()));
        }
        Ok(())
    }

    async fn begin_write(&self) -> Result<(), StoreError> {
        if let Some(gate) = &self.write_gate {
            gate.acquire().await.map_err(|_| StoreError::Closed)?.forget();
        }
        self.simulate_latency().await;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.scripted
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or(Ok(()))
    }
}

fn into_stream(rx: broadcast::Receiver<RowChange>) -> ChangeStream {
    stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(change) => Some((Ok(change), rx)),
            Err(RecvError::Lagged(n)) => Some((Err(StoreError::Lagged(n)), rx)),
            Err(RecvError::Closed) => None,
        }
    })
    .boxed()
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn select(&self, collection: Collection) -> Result<Vec<Row>, StoreError> {
        self.simulate_latency().await;
        self.check_online()?;
        let mut rows: Vec<(String, Row)> = self
            .rows(collection)
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    async fn insert(&self, collection: Collection, mut row: Row) -> Result<(), StoreError> {
        self.begin_write().await?;
        let id = match row.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                let id = Ulid::new().to_string();
                row.insert("id".into(), Value::String(id.clone()));
                id
            }
        };
        {
            let rows = self.rows(collection);
            if rows.contains_key(&id) {
                return Err(StoreError::Rejected(format!("duplicate key {id}")));
            }
            rows.insert(id, row.clone());
        }
        self.hub.send(
            collection,
            &RowChange {
                kind: ChangeKind::Insert,
                new: Some(row),
                old: None,
            },
        );
        Ok(())
    }

    async fn update(&self, collection: Collection, id: &str, fields: Row) -> Result<(), StoreError> {
        self.begin_write().await?;
        let change = {
            let Some(mut entry) = self.rows(collection).get_mut(id) else {
                // Predicate matched nothing.
                return Ok(());
            };
            let old = entry.value().clone();
            entry.value_mut().extend(fields);
            RowChange {
                kind: ChangeKind::Update,
                new: Some(entry.value().clone()),
                old: Some(old),
            }
        };
        self.hub.send(collection, &change);
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        self.begin_write().await?;
        if let Some((_, old)) = self.rows(collection).remove(id) {
            self.hub.send(
                collection,
                &RowChange {
                    kind: ChangeKind::Delete,
                    new: None,
                    old: Some(old),
                },
            );
        }
        Ok(())
    }

    async fn subscribe(&self, collection: Collection) -> Result<ChangeStream, StoreError> {
        self.check_online()?;
        Ok(into_stream(self.hub.subscribe(collection)))
    }
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

    #[tokio::test]
    async fn insert_update_delete_notify() {
        let store = MemoryStore::new();
        let mut feed = store.subscribe(Collection::Reservations).await.unwrap();

        store
            .insert(Collection::Reservations, obj(json!({"id": "r1", "name": "A"})))
            .await
            .unwrap();
        store
            .update(Collection::Reservations, "r1", obj(json!({"name": "B"})))
            .await
            .unwrap();
        store.delete(Collection::Reservations, "r1").await.unwrap();

        let first = feed.next().await.unwrap().unwrap();
        assert_eq!(first.kind, ChangeKind::Insert);
        let second = feed.next().await.unwrap().unwrap();
        assert_eq!(second.kind, ChangeKind::Update);
        assert_eq!(second.new.unwrap().get("name"), Some(&json!("B")));
        assert_eq!(second.old.unwrap().get("name"), Some(&json!("A")));
        let third = feed.next().await.unwrap().unwrap();
        assert_eq!(third.kind, ChangeKind::Delete);
        assert!(store.is_empty(Collection::Reservations));
    }

    #[tokio::test]
    async fn insert_assigns_missing_id() {
        let store = MemoryStore::new();
        store
            .insert(Collection::Reservations, obj(json!({"name": "A"})))
            .await
            .unwrap();
        let rows = store.select(Collection::Reservations).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].get("id").and_then(Value::as_str).is_some());
    }

    #[tokio::test]
    async fn duplicate_insert_rejected() {
        let store = MemoryStore::new();
        let row = obj(json!({"id": "r1"}));
        store.insert(Collection::Reservations, row.clone()).await.unwrap();
        let err = store.insert(Collection::Reservations, row).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
    }

    #[tokio::test]
    async fn update_missing_row_is_silent() {
        let store = MemoryStore::new();
        let mut feed = store.subscribe(Collection::Tables).await.unwrap();
        store
            .update(Collection::Tables, "T404", obj(json!({"status": "FREE"})))
            .await
            .unwrap();
        store.shutdown();
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn scripted_failures_apply_once() {
        let store = MemoryStore::new();
        store.seed(Collection::Tables, [obj(json!({"id": "T1", "status": "FREE"}))]);
        store.fail_next_write(StoreError::Rejected("nope".into()));

        let first = store
            .update(Collection::Tables, "T1", obj(json!({"status": "SEATED"})))
            .await;
        assert_eq!(first, Err(StoreError::Rejected("nope".into())));
        assert_eq!(
            store.row(Collection::Tables, "T1").unwrap().get("status"),
            Some(&json!("FREE"))
        );

        store
            .update(Collection::Tables, "T1", obj(json!({"status": "SEATED"})))
            .await
            .unwrap();
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn scripted_outcomes_run_in_order() {
        let store = MemoryStore::new();
        store.seed(Collection::Tables, [obj(json!({"id": "T1", "status": "FREE"}))]);
        store.pass_next_write();
        store.fail_next_write(StoreError::Network("reset".into()));

        let fields = obj(json!({"status": "SEATED"}));
        assert!(store.update(Collection::Tables, "T1", fields.clone()).await.is_ok());
        assert!(store.update(Collection::Tables, "T1", fields.clone()).await.unwrap_err().is_network());
        assert!(store.update(Collection::Tables, "T1", fields).await.is_ok());
    }

    #[tokio::test]
    async fn offline_fails_with_network_error() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let err = store.select(Collection::Tables).await.unwrap_err();
        assert!(err.is_network());
        store.set_offline(false);
        assert!(store.select(Collection::Tables).await.is_ok());
    }

    #[tokio::test]
    async fn lagging_subscriber_sees_lag() {
        let store = MemoryStore::new().with_channel_capacity(2);
        let mut feed = store.subscribe(Collection::Reservations).await.unwrap();
        for i in 0..5 {
            store
                .insert(Collection::Reservations, obj(json!({"id": format!("r{i}")})))
                .await
                .unwrap();
        }
        assert!(matches!(feed.next().await, Some(Err(StoreError::Lagged(_)))));
    }

    #[tokio::test]
    async fn gated_writes_wait_for_release() {
        let store = Arc::new(MemoryStore::new().with_write_gate());
        store.seed(Collection::Tables, [obj(json!({"id": "T1", "status": "FREE"}))]);

        let writer = store.clone();
        let task = tokio::spawn(async move {
            writer
                .update(Collection::Tables, "T1", obj(json!({"status": "SEATED"})))
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(store.write_count(), 0);

        store.release_writes(1);
        task.await.unwrap().unwrap();
        assert_eq!(store.write_count(), 1);
    }
}
