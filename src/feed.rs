use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::engine::{EngineError, EngineHandle};
use crate::model::Collection;
use crate::store::{ChangeStream, RowStore, StoreError};

/// Forward one collection's change notifications into the engine, in
/// delivery order. Ends when the subscription closes or the engine is gone.
pub async fn run_feed(
    collection: Collection,
    mut changes: ChangeStream,
    engine: EngineHandle,
    store: Arc<dyn RowStore>,
) {
    while let Some(item) = changes.next().await {
        let forwarded = match item {
            Ok(change) => engine.merge(collection, change).await,
            Err(StoreError::Lagged(missed)) => {
                warn!(%collection, missed, "subscription lagged, resyncing");
                resync(collection, store.as_ref(), &engine).await
            }
            Err(e) => {
                warn!(%collection, "subscription error: {e}");
                Ok(())
            }
        };
        if forwarded.is_err() {
            debug!(%collection, "engine gone, stopping feed");
            return;
        }
    }
    info!(%collection, "change feed closed");
}

const RESYNC_BACKOFF_START: Duration = Duration::from_millis(50);
const RESYNC_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Re-read the whole collection and hand it to the engine as a replacement.
///
/// The skipped notifications are gone, so a failed read is retried with
/// doubling backoff until it succeeds or the engine shuts down.
pub async fn resync(
    collection: Collection,
    store: &dyn RowStore,
    engine: &EngineHandle,
) -> Result<(), EngineError> {
    let mut backoff = RESYNC_BACKOFF_START;
    loop {
        match store.select(collection).await {
            Ok(rows) => {
                info!(%collection, rows = rows.len(), "resynced");
                return engine.replace(collection, rows).await;
            }
            Err(e) => {
                if engine.is_closed() {
                    return Err(EngineError::ShutDown);
                }
                warn!(%collection, retry_in = ?backoff, "resync failed: {e}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RESYNC_BACKOFF_MAX);
            }
        }
    }
}
