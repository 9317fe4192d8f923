use std::sync::Arc;

use chrono::Local;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::engine::{self, decode_reservations, decode_tables, EngineHandle, LocalState};
use crate::feed::run_feed;
use crate::model::*;
use crate::rows::encode_table;
use crate::store::{RowStore, StoreError};
use crate::sweeper::run_sweeper;

/// One client's live view of a venue: the engine plus the background tasks
/// feeding it. Dropping it stops the tasks.
pub struct Venue {
    engine: EngineHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl Venue {
    /// Subscribe to both collections, hydrate from a full read, then start the
    /// engine, the change feeds and the sweeper.
    ///
    /// Subscriptions are opened before the read so no change between the two
    /// is missed; replaying one that the read already contains is harmless.
    pub async fn open(store: Arc<dyn RowStore>, config: &Config) -> Result<Self, StoreError> {
        let table_changes = store.subscribe(Collection::Tables).await?;
        let reservation_changes = store.subscribe(Collection::Reservations).await?;

        let tables = decode_tables(&store.select(Collection::Tables).await?);
        let reservations =
            decode_reservations(&store.select(Collection::Reservations).await?, now_ms(), &Local);
        info!(
            tables = tables.len(),
            reservations = reservations.len(),
            "venue hydrated"
        );

        let engine = engine::spawn(
            store.clone(),
            LocalState::hydrate(tables, reservations),
            config.queue_depth,
        );
        let tasks = vec![
            tokio::spawn(run_feed(
                Collection::Tables,
                table_changes,
                engine.clone(),
                store.clone(),
            )),
            tokio::spawn(run_feed(
                Collection::Reservations,
                reservation_changes,
                engine.clone(),
                store.clone(),
            )),
            tokio::spawn(run_sweeper(
                engine.clone(),
                store,
                config.sweep_interval,
                config.no_show_minutes,
            )),
        ];
        Ok(Self { engine, tasks })
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Stop feeds and sweeper. The engine drains once the last handle is dropped.
    pub fn shutdown(self) {
        info!("venue shutting down");
    }
}

impl Drop for Venue {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Insert the configured roster if the store has no tables yet.
/// Returns how many tables were created.
pub async fn provision_tables(store: &dyn RowStore, config: &Config) -> Result<usize, StoreError> {
    if !store.select(Collection::Tables).await?.is_empty() {
        return Ok(0);
    }
    let roster = default_roster(
        config.table_count,
        config.default_capacity,
        &config.capacity_overrides,
    );
    for table in &roster {
        store.insert(Collection::Tables, encode_table(table)).await?;
    }
    info!("provisioned {} tables", roster.len());
    Ok(roster.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::{ChangeKind, RowChange};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn provisions_once() {
        let store = MemoryStore::new();
        let mut config = Config::default();
        config.table_count = 3;
        config.capacity_overrides.insert("T2".into(), 6);

        assert_eq!(provision_tables(&store, &config).await.unwrap(), 3);
        assert_eq!(provision_tables(&store, &config).await.unwrap(), 0);
        assert_eq!(store.len(Collection::Tables), 3);
        assert_eq!(
            store.row(Collection::Tables, "T2").unwrap().get("capacity"),
            Some(&json!(6))
        );
    }

    #[tokio::test]
    async fn hydration_drops_malformed_rows() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            Collection::Tables,
            [
                encode_table(&Table::new("T1", 4)),
                json!({"id": "T2", "capacity": 4, "status": "ON_FIRE"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            ],
        );
        let venue = Venue::open(store, &Config::default()).await.unwrap();
        let snapshot = venue.engine().snapshot().await.unwrap();
        assert_eq!(snapshot.tables, vec![Table::new("T1", 4)]);
        venue.shutdown();
    }

    #[tokio::test]
    async fn offline_store_fails_open() {
        let store = Arc::new(MemoryStore::new());
        store.set_offline(true);
        let err = Venue::open(store, &Config::default()).await.err().unwrap();
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn foreign_changes_are_merged() {
        let store = Arc::new(MemoryStore::new());
        store.seed(Collection::Tables, [encode_table(&Table::new("T1", 4))]);
        let venue = Venue::open(store.clone(), &Config::default()).await.unwrap();

        let mut seated = Table::new("T1", 4);
        seated.status = TableStatus::Seated;
        seated.since = Some(1_000);
        store.inject(
            Collection::Tables,
            RowChange {
                kind: ChangeKind::Update,
                new: Some(encode_table(&seated)),
                old: None,
            },
        );
        store.inject(
            Collection::Tables,
            RowChange {
                kind: ChangeKind::Insert,
                new: Some(json!({"capacity": 2, "status": "FREE"}).as_object().cloned().unwrap()),
                old: None,
            },
        );

        for _ in 0..200 {
            if venue.engine().table("T1").await.unwrap() == Some(seated.clone()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let snapshot = venue.engine().snapshot().await.unwrap();
        assert_eq!(snapshot.tables, vec![seated]);
        venue.shutdown();
    }
}
