use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Collection;
use crate::store::RowChange;

const CHANNEL_CAPACITY: usize = 256;

/// Fans row changes out to every client watching a collection.
pub struct ChangeHub {
    channels: DashMap<Collection, broadcast::Sender<RowChange>>,
    capacity: usize,
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Subscribers that fall more than `capacity` notifications behind lag.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Watch a collection's row changes. The first watcher opens its channel.
    pub fn subscribe(&self, collection: Collection) -> broadcast::Receiver<RowChange> {
        let sender = self
            .channels
            .entry(collection)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        sender.subscribe()
    }

    /// Publish a row change to the collection's watchers, if any are open.
    pub fn send(&self, collection: Collection, change: &RowChange) {
        if let Some(sender) = self.channels.get(&collection) {
            let _ = sender.send(change.clone());
        }
    }

    /// Stop a collection's feed; its watchers see the stream end.
    pub fn close(&self, collection: Collection) {
        self.channels.remove(&collection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChangeKind;

    fn change(id: &str) -> RowChange {
        let mut row = crate::store::Row::new();
        row.insert("id".into(), serde_json::Value::String(id.into()));
        RowChange {
            kind: ChangeKind::Insert,
            new: Some(row),
            old: None,
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = ChangeHub::new();
        let mut rx = hub.subscribe(Collection::Tables);

        let c = change("T1");
        hub.send(Collection::Tables, &c);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, c);
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let hub = ChangeHub::new();
        let mut tables = hub.subscribe(Collection::Tables);
        let _reservations = hub.subscribe(Collection::Reservations);

        hub.send(Collection::Reservations, &change("r1"));
        assert!(tables.try_recv().is_err());
    }

    #[tokio::test]
    async fn change_without_watchers_is_dropped() {
        let hub = ChangeHub::new();
        // A change nobody watches is dropped.
        hub.send(Collection::Tables, &change("T1"));
    }

    #[tokio::test]
    async fn close_ends_subscriptions() {
        let hub = ChangeHub::new();
        let mut rx = hub.subscribe(Collection::Tables);
        hub.close(Collection::Tables);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
